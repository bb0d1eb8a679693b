//! Query plan description for the in-memory engine
//!
//! Mirrors the shape of the server's `explain` output closely enough that
//! the same report code can print either.

use super::query::matches_filter;
use crate::database::types::{DatabaseError, ExplainVerbosity, FindQuery, IndexSpec};
use mongodb::bson::{doc, Bson, Document};

/// Index chosen for a filter, with the number of leading key fields it covers
struct IndexChoice<'a> {
    index: &'a IndexSpec,
    prefix: Vec<&'a str>,
}

/// Pick the index whose leading keys cover the most filter fields.
/// Ties go to the index created first.
fn choose_index<'a>(filter: &Document, indexes: &'a [IndexSpec]) -> Option<IndexChoice<'a>> {
    let mut best: Option<IndexChoice<'a>> = None;

    for index in indexes {
        let prefix: Vec<&str> = index
            .fields()
            .into_iter()
            .take_while(|field| filter.contains_key(*field))
            .collect();

        if prefix.is_empty() {
            continue;
        }
        if best.as_ref().map_or(true, |b| prefix.len() > b.prefix.len()) {
            best = Some(IndexChoice { index, prefix });
        }
    }

    best
}

fn wrap(stage: &str, details: Document, input: Document) -> Document {
    let mut wrapped = doc! { "stage": stage };
    for (key, value) in details {
        wrapped.insert(key, value);
    }
    wrapped.insert("inputStage", input);
    wrapped
}

/// Build an explain document for `query` over `documents`
pub(crate) fn explain_find(
    namespace: &str,
    documents: &[Document],
    indexes: &[IndexSpec],
    query: &FindQuery,
    verbosity: ExplainVerbosity,
) -> Result<Document, DatabaseError> {
    let choice = choose_index(&query.filter, indexes);

    let mut returned = 0usize;
    for doc in documents {
        if matches_filter(doc, &query.filter)? {
            returned += 1;
        }
    }
    let skip = query.skip.unwrap_or(0) as usize;
    returned = returned.saturating_sub(skip);
    if let Some(limit) = query.limit.filter(|l| *l != 0) {
        returned = returned.min(limit.unsigned_abs() as usize);
    }

    let (mut plan, keys_examined, docs_examined) = match choice {
        Some(ref choice) => {
            let mut index_filter = Document::new();
            for field in &choice.prefix {
                if let Some(condition) = query.filter.get(*field) {
                    index_filter.insert(*field, condition.clone());
                }
            }

            let mut scanned = 0usize;
            for doc in documents {
                if matches_filter(doc, &index_filter)? {
                    scanned += 1;
                }
            }

            let ixscan = doc! {
                "stage": "IXSCAN",
                "keyPattern": choice.index.keys.clone(),
                "indexName": choice.index.resolved_name(),
                "isMultiKey": false,
                "direction": "forward",
            };
            let mut fetch_details = Document::new();
            if query.filter.len() > choice.prefix.len() {
                fetch_details.insert("filter", query.filter.clone());
            }
            (wrap("FETCH", fetch_details, ixscan), scanned, scanned)
        }
        None => (
            doc! {
                "stage": "COLLSCAN",
                "filter": query.filter.clone(),
                "direction": "forward",
            },
            0,
            documents.len(),
        ),
    };

    if let Some(ref sort) = query.sort {
        plan = wrap("SORT", doc! { "sortPattern": sort.clone() }, plan);
    }
    if let Some(skip) = query.skip.filter(|s| *s > 0) {
        plan = wrap("SKIP", doc! { "skipAmount": clamp_i64(skip) }, plan);
    }
    if let Some(limit) = query.limit.filter(|l| *l != 0) {
        plan = wrap("LIMIT", doc! { "limitAmount": clamp_i64(limit.unsigned_abs()) }, plan);
    }
    if let Some(ref projection) = query.projection {
        plan = wrap("PROJECTION_SIMPLE", doc! { "transformBy": projection.clone() }, plan);
    }

    let mut explained = doc! {
        "explainVersion": "1",
        "queryPlanner": {
            "namespace": namespace,
            "indexFilterSet": false,
            "parsedQuery": query.filter.clone(),
            "winningPlan": plan,
            "rejectedPlans": Bson::Array(Vec::new()),
        },
    };

    if verbosity != ExplainVerbosity::QueryPlanner {
        explained.insert(
            "executionStats",
            doc! {
                "executionSuccess": true,
                "nReturned": returned as i64,
                "executionTimeMillis": 0_i64,
                "totalKeysExamined": keys_examined as i64,
                "totalDocsExamined": docs_examined as i64,
            },
        );
    }
    explained.insert("ok", 1.0);

    Ok(explained)
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
