//! Rewrites caller queries into snapshot-scoped search requests.

use crate::branch::SegmentView;
use crate::error::{CoreError, CoreResult};
use crate::index::{Expression, Mappings, SearchRequest, StampField, Target};
use crate::search::Query;

/// A filter matching rows visible in `view`: created inside some bound
/// and not revised inside any.
#[must_use]
pub fn branch_filter(view: &SegmentView) -> Expression {
    let stamps = |field: StampField| -> Vec<Expression> {
        view.iter()
            .map(|(segment, upper)| Expression::Stamp {
                field,
                segment,
                upper,
            })
            .collect()
    };
    Expression::Bool {
        must: Vec::new(),
        should: stamps(StampField::Created),
        must_not: stamps(StampField::Revised),
        minimum_should_match: 1,
    }
}

/// Scopes `query` to `view`.
///
/// Top-level types get the branch filter ANDed to the caller filter.
/// Nested types are evaluated through their container: the request
/// targets the nested documents and the branch filter moves into a
/// has-parent clause.
///
/// # Errors
///
/// [`CoreError::UnsupportedOperation`] for a partial projection over a
/// nested type.
pub fn rewrite(query: &Query, view: &SegmentView, mappings: &Mappings) -> CoreResult<SearchRequest> {
    let doc_type = query.doc_type().clone();
    let (target, filter) = match mappings.container_of(&doc_type) {
        None => (
            Target::Type(doc_type),
            query.filter().clone().and(branch_filter(view)),
        ),
        Some(_) if query.is_partial() => {
            return Err(CoreError::unsupported(format!(
                "partial projection over nested type {doc_type}"
            )));
        }
        Some(parent) => (
            Target::Nested {
                doc_type,
                parent: parent.clone(),
            },
            query.filter().clone().and(Expression::HasParent {
                parent_type: parent.clone(),
                query: Box::new(branch_filter(view)),
            }),
        ),
    };
    Ok(SearchRequest {
        target,
        filter,
        sort: query.sort().to_vec(),
        offset: query.offset(),
        limit: query.limit(),
        fields: query.fields().map(<[String]>::to_vec),
        with_scores: query.with_scores(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::DocType;
    use crate::types::{SegmentId, Timestamp};

    fn view() -> SegmentView {
        SegmentView::from_bounds([
            (SegmentId::new(0), Timestamp::new(10)),
            (SegmentId::new(2), Timestamp::new(30)),
        ])
    }

    #[test]
    fn top_level_query_is_anded_with_branch_filter() {
        let query = Query::select("concept")
            .where_(Expression::exact("active", true))
            .build();
        let request = rewrite(&query, &view(), &Mappings::new()).unwrap();
        assert_eq!(request.target, Target::Type(DocType::new("concept")));
        let Expression::Bool { must, .. } = &request.filter else {
            panic!("expected conjunction");
        };
        assert_eq!(must[1], branch_filter(&view()));

        let Expression::Bool {
            should,
            must_not,
            minimum_should_match,
            ..
        } = branch_filter(&view())
        else {
            panic!("expected bool");
        };
        assert_eq!(should.len(), 2);
        assert_eq!(must_not.len(), 2);
        assert_eq!(minimum_should_match, 1);
    }

    #[test]
    fn nested_query_goes_through_container() {
        let mappings = Mappings::new().nested("description", "concept");
        let query = Query::select("description").build();
        let request = rewrite(&query, &view(), &mappings).unwrap();
        assert_eq!(
            request.target,
            Target::Nested {
                doc_type: DocType::new("description"),
                parent: DocType::new("concept"),
            }
        );
        assert!(matches!(request.filter, Expression::HasParent { .. }));
    }

    #[test]
    fn partial_projection_over_nested_type_is_unsupported() {
        let mappings = Mappings::new().nested("description", "concept");
        let query = Query::select_fields(["term"]).from("description").build();
        assert!(matches!(
            rewrite(&query, &view(), &mappings),
            Err(CoreError::UnsupportedOperation { .. })
        ));

        let top = Query::select_fields(["term"]).from("concept").build();
        let request = rewrite(&top, &view(), &mappings).unwrap();
        assert_eq!(request.fields, Some(vec!["term".to_string()]));
    }
}
