//! Dump WAL command implementation.

use super::{emit, open, CliResult};
use revdb_core::wal::{DeleteTarget, IndexDocument, WalOperation, WalRecord};
use serde::Serialize;
use std::path::Path;

/// WAL record representation for output.
#[derive(Debug, Serialize)]
pub struct WalRecordInfo {
    /// Offset in the WAL file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Batch number (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
    /// Generation (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// One-line description of the operation (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Runs the dump-wal command.
///
/// Opening the repository replays the log into the index but does not
/// trim it, so every record still on disk is listed.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> CliResult {
    let repo = open(path)?;
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    for item in repo.wal_records()?.take(max_records) {
        let (offset, record) = item?;
        records.push(describe(offset, &record));
    }
    emit(&records, format, |records| print_text_output(records))
}

fn describe(offset: u64, record: &WalRecord) -> WalRecordInfo {
    let mut info = WalRecordInfo {
        offset,
        record_type: format!("{:?}", record.record_type()).to_uppercase(),
        batch: None,
        generation: None,
        operation: None,
    };
    match record {
        WalRecord::Header { generation, .. } | WalRecord::Generation { generation } => {
            info.generation = Some(generation.as_u64());
        }
        WalRecord::Begin { batch } | WalRecord::Commit { batch } => info.batch = Some(*batch),
        WalRecord::Operation { batch, op } => {
            info.batch = Some(*batch);
            info.operation = Some(describe_op(op));
        }
    }
    info
}

fn describe_op(op: &WalOperation) -> String {
    match op {
        WalOperation::Index(IndexDocument::Revision(row)) => {
            format!("index revision {} created={}", row.key, row.created)
        }
        WalOperation::Index(IndexDocument::Commit(commit)) => format!(
            "index commit {} on {} ({} containers)",
            commit.timestamp,
            commit.branch,
            commit.changes.len()
        ),
        WalOperation::Index(IndexDocument::Branch(branch)) => format!(
            "index branch {} segment={} head={} {}",
            branch.path, branch.segment_id, branch.head_timestamp, branch.state
        ),
        WalOperation::Delete(DeleteTarget::Revision(key)) => format!("delete revision {key}"),
        WalOperation::Delete(DeleteTarget::Commit(ts)) => format!("delete commit {ts}"),
        WalOperation::BulkUpdate(marks) => format!("mark {} rows revised", marks.len()),
    }
}

fn print_text_output(records: &[WalRecordInfo]) {
    println!("WAL Records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!("[{:08}] {:10}", record.offset, record.record_type);
        if let Some(generation) = record.generation {
            print!(" gen={generation}");
        }
        if let Some(batch) = record.batch {
            print!(" batch={batch}");
        }
        if let Some(op) = &record.operation {
            print!(" {op}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::{BranchPath, Generation, Repository};

    #[test]
    fn describes_batch_framing() {
        let begin = describe(11, &WalRecord::Begin { batch: 3 });
        assert_eq!(begin.record_type, "BEGIN");
        assert_eq!(begin.batch, Some(3));

        let roll = describe(
            40,
            &WalRecord::Generation {
                generation: Generation::new(7),
            },
        );
        assert_eq!(roll.record_type, "GENERATION");
        assert_eq!(roll.generation, Some(7));
        assert!(roll.operation.is_none());
    }

    #[test]
    fn describes_logged_operations() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        repo.create_branch(&BranchPath::main(), "draft").unwrap();

        let ops: Vec<String> = repo
            .wal_records()
            .unwrap()
            .filter_map(|item| describe(0, &item.unwrap().1).operation)
            .collect();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].starts_with("index branch MAIN/draft"));
    }
}
