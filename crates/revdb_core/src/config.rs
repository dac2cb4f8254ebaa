//! Repository configuration.

use std::time::Duration;

/// Configuration for opening a repository.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the repository directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to flush the log after every appended batch.
    pub sync_on_write: bool,

    /// Operations applied since the last checkpoint that trigger an
    /// automatic flush of the document store.
    pub flush_threshold: usize,

    /// Upper bound on waiting for a branch lock.
    pub lock_timeout: Duration,

    /// Retries of a single-document commit after a lock timeout.
    pub max_commit_retries: u32,

    /// Revision rows deleted per purge batch.
    pub purge_batch_size: usize,

    /// Sample size used by compare when the caller passes none.
    pub default_compare_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            flush_threshold: 1024,
            lock_timeout: Duration::from_secs(5),
            max_commit_retries: 3,
            purge_batch_size: 512,
            default_compare_limit: 100,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the repository if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to flush the log after every batch.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic flush threshold. Zero disables automatic flushes.
    #[must_use]
    pub const fn flush_threshold(mut self, ops: usize) -> Self {
        self.flush_threshold = ops;
        self
    }

    /// Sets the branch lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets how often a single-document commit retries a lock timeout.
    #[must_use]
    pub const fn max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }

    /// Sets the purge batch size. Values below one are treated as one.
    #[must_use]
    pub const fn purge_batch_size(mut self, size: usize) -> Self {
        self.purge_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the default compare sample size.
    #[must_use]
    pub const fn default_compare_limit(mut self, limit: usize) -> Self {
        self.default_compare_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_write);
        assert_eq!(config.flush_threshold, 1024);
        assert_eq!(config.max_commit_retries, 3);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .sync_on_write(false)
            .flush_threshold(0)
            .lock_timeout(Duration::from_millis(50))
            .purge_batch_size(0);

        assert!(!config.sync_on_write);
        assert_eq!(config.flush_threshold, 0);
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
        assert_eq!(config.purge_batch_size, 1);
    }
}
