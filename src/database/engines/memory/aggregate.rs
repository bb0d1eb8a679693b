//! Aggregation pipeline evaluation

use super::query::{
    add_numbers, apply_projection, as_f64, as_integer, compare_values, lookup_path,
    matches_filter, sort_documents, values_equal,
};
use crate::database::types::DatabaseError;
use mongodb::bson::{doc, Bson, Document};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    Count,
}

impl Accumulator {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            "$count" => Accumulator::Count,
            _ => return None,
        })
    }

    fn finalize(self, values: Vec<Bson>) -> Bson {
        match self {
            Accumulator::Sum => values
                .iter()
                .filter(|v| as_f64(v).is_some())
                .fold(Bson::Int32(0), |total, v| {
                    add_numbers(&total, v).unwrap_or(total)
                }),
            Accumulator::Count => count_value(values.len()),
            Accumulator::Avg => {
                let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
                if numbers.is_empty() {
                    Bson::Null
                } else {
                    Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            Accumulator::Min => extreme(values, Ordering::Less),
            Accumulator::Max => extreme(values, Ordering::Greater),
            Accumulator::First => values.into_iter().next().unwrap_or(Bson::Null),
            Accumulator::Last => values.into_iter().last().unwrap_or(Bson::Null),
            Accumulator::Push => Bson::Array(values),
        }
    }
}

/// Int32 while the count fits, Int64 beyond
fn count_value(n: usize) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

/// `$min` / `$max` ignore nulls and missing values
fn extreme(values: Vec<Bson>, wanted: Ordering) -> Bson {
    values
        .into_iter()
        .filter(|v| !matches!(v, Bson::Null | Bson::Undefined))
        .reduce(|best, v| {
            if compare_values(&v, &best) == wanted {
                v
            } else {
                best
            }
        })
        .unwrap_or(Bson::Null)
}

struct AccumulatorField {
    output: String,
    accumulator: Accumulator,
    expression: Bson,
}

struct Group {
    key: Bson,
    values: Vec<Vec<Bson>>,
}

/// Evaluate a field path (`"$price"`), a document of expressions, or a literal
pub(crate) fn evaluate_expression(doc: &Document, expression: &Bson) -> Bson {
    match expression {
        Bson::String(path) if path.starts_with('$') => lookup_path(doc, &path[1..])
            .cloned()
            .unwrap_or(Bson::Null),
        Bson::Document(fields) => Bson::Document(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), evaluate_expression(doc, v)))
                .collect(),
        ),
        literal => literal.clone(),
    }
}

fn parse_group_spec(spec: &Document) -> Result<(Bson, Vec<AccumulatorField>), DatabaseError> {
    let key = spec.get("_id").cloned().ok_or_else(|| {
        DatabaseError::InvalidQuery("a group specification must include an _id".to_string())
    })?;

    let mut fields = Vec::new();
    for (output, definition) in spec {
        if output == "_id" {
            continue;
        }

        let not_accumulator = || {
            DatabaseError::InvalidQuery(format!(
                "The field '{}' must be an accumulator object",
                output
            ))
        };

        let definition = definition.as_document().ok_or_else(not_accumulator)?;
        let (name, expression) = match (definition.len(), definition.iter().next()) {
            (1, Some(entry)) => entry,
            _ => return Err(not_accumulator()),
        };
        let accumulator = Accumulator::parse(name).ok_or_else(|| {
            DatabaseError::InvalidQuery(format!("unknown group operator '{}'", name))
        })?;

        fields.push(AccumulatorField {
            output: output.clone(),
            accumulator,
            expression: expression.clone(),
        });
    }

    Ok((key, fields))
}

fn group(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, DatabaseError> {
    let (key_expression, fields) = parse_group_spec(spec)?;
    let mut groups: Vec<Group> = Vec::new();

    for doc in &documents {
        let key = evaluate_expression(doc, &key_expression);
        let index = match groups.iter().position(|g| values_equal(&g.key, &key)) {
            Some(index) => index,
            None => {
                groups.push(Group {
                    key,
                    values: vec![Vec::new(); fields.len()],
                });
                groups.len() - 1
            }
        };

        for (slot, field) in fields.iter().enumerate() {
            let value = match field.accumulator {
                Accumulator::Count => Bson::Int32(1),
                _ => evaluate_expression(doc, &field.expression),
            };
            groups[index].values[slot].push(value);
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let mut out = doc! { "_id": group.key };
            for (field, values) in fields.iter().zip(group.values) {
                out.insert(field.output.clone(), field.accumulator.finalize(values));
            }
            out
        })
        .collect())
}

fn stage_document<'a>(stage: &str, spec: &'a Bson) -> Result<&'a Document, DatabaseError> {
    spec.as_document().ok_or_else(|| {
        DatabaseError::InvalidQuery(format!("the {} stage specification must be an object", stage))
    })
}

fn stage_count(stage: &str, spec: &Bson, allow_zero: bool) -> Result<usize, DatabaseError> {
    match as_integer(spec) {
        Some(n) if n > 0 || (allow_zero && n == 0) => Ok(n as usize),
        _ => Err(DatabaseError::InvalidQuery(format!(
            "invalid argument to {} stage: {}",
            stage, spec
        ))),
    }
}

/// Run a pipeline over a snapshot of the collection
pub(crate) fn run_pipeline(
    documents: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, DatabaseError> {
    let mut current = documents;

    for stage in pipeline {
        let (name, spec) = match (stage.len(), stage.iter().next()) {
            (1, Some(entry)) => entry,
            _ => {
                return Err(DatabaseError::InvalidQuery(
                    "A pipeline stage specification object must contain exactly one field."
                        .to_string(),
                ))
            }
        };

        current = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, spec)?;
                let mut matched = Vec::with_capacity(current.len());
                for doc in current {
                    if matches_filter(&doc, filter)? {
                        matched.push(doc);
                    }
                }
                matched
            }
            "$group" => group(current, stage_document(name, spec)?)?,
            "$sort" => {
                sort_documents(&mut current, stage_document(name, spec)?)?;
                current
            }
            "$limit" => {
                current.truncate(stage_count(name, spec, false)?);
                current
            }
            "$skip" => {
                let skip = stage_count(name, spec, true)?;
                current.into_iter().skip(skip).collect()
            }
            "$project" => {
                let projection = stage_document(name, spec)?;
                current
                    .iter()
                    .map(|doc| apply_projection(doc, projection))
                    .collect::<Result<Vec<_>, _>>()?
            }
            "$count" => {
                let field = match spec.as_str() {
                    Some(field) if !field.is_empty() && !field.starts_with('$') => field,
                    _ => {
                        return Err(DatabaseError::InvalidQuery(
                            "the count field must be a non-empty string not starting with '$'"
                                .to_string(),
                        ))
                    }
                };
                if current.is_empty() {
                    Vec::new()
                } else {
                    vec![doc! { field: count_value(current.len()) }]
                }
            }
            other => {
                return Err(DatabaseError::InvalidQuery(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    other
                )))
            }
        };
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> Vec<Document> {
        vec![
            doc! { "title": "A", "author": "Orwell", "genre": "Fiction", "price": 10 },
            doc! { "title": "B", "author": "Austen", "genre": "Romance", "price": 7.5 },
            doc! { "title": "C", "author": "Orwell", "genre": "Fiction", "price": 20.0 },
            doc! { "title": "D", "author": "Orwell", "genre": "Satire", "price": 8.5 },
            doc! { "title": "E", "author": "Austen", "genre": "Romance" },
        ]
    }

    #[test]
    fn test_group_average_by_genre() {
        let pipeline = vec![doc! {
            "$group": { "_id": "$genre", "avgPrice": { "$avg": "$price" } }
        }];

        let result = run_pipeline(books(), &pipeline).unwrap();
        assert_eq!(result.len(), 3);

        // First-seen order, missing prices ignored
        assert_eq!(result[0], doc! { "_id": "Fiction", "avgPrice": 15.0 });
        assert_eq!(result[1], doc! { "_id": "Romance", "avgPrice": 7.5 });
        assert_eq!(result[2], doc! { "_id": "Satire", "avgPrice": 8.5 });
    }

    #[test]
    fn test_top_author() {
        let pipeline = vec![
            doc! { "$group": { "_id": "$author", "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1 } },
            doc! { "$limit": 1 },
        ];

        let result = run_pipeline(books(), &pipeline).unwrap();
        assert_eq!(result, vec![doc! { "_id": "Orwell", "count": 3 }]);
    }

    #[test]
    fn test_accumulators() {
        let pipeline = vec![doc! {
            "$group": {
                "_id": null,
                "total": { "$sum": "$price" },
                "cheapest": { "$min": "$price" },
                "dearest": { "$max": "$price" },
                "first": { "$first": "$title" },
                "last": { "$last": "$title" },
                "titles": { "$push": "$title" },
                "n": { "$count": {} },
            }
        }];

        let result = run_pipeline(books(), &pipeline).unwrap();
        assert_eq!(result.len(), 1);
        let totals = &result[0];
        assert_eq!(totals.get("_id"), Some(&Bson::Null));
        assert_eq!(totals.get_f64("total").unwrap(), 46.0);
        assert_eq!(totals.get_f64("cheapest").unwrap(), 7.5);
        assert_eq!(totals.get_f64("dearest").unwrap(), 20.0);
        assert_eq!(totals.get_str("first").unwrap(), "A");
        assert_eq!(totals.get_str("last").unwrap(), "E");
        assert_eq!(totals.get_array("titles").unwrap().len(), 5);
        assert_eq!(totals.get_i32("n").unwrap(), 5);
    }

    #[test]
    fn test_compound_group_key() {
        let pipeline = vec![
            doc! { "$group": { "_id": { "author": "$author", "genre": "$genre" }, "n": { "$sum": 1 } } },
            doc! { "$match": { "n": { "$gt": 1 } } },
        ];

        let result = run_pipeline(books(), &pipeline).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(
            result[0].get_document("_id").unwrap(),
            &doc! { "author": "Orwell", "genre": "Fiction" }
        );
    }

    #[test]
    fn test_match_skip_project_count() {
        let pipeline = vec![
            doc! { "$match": { "author": "Orwell" } },
            doc! { "$skip": 1 },
            doc! { "$project": { "title": 1, "_id": 0 } },
        ];
        let result = run_pipeline(books(), &pipeline).unwrap();
        assert_eq!(result, vec![doc! { "title": "C" }, doc! { "title": "D" }]);

        let counted = run_pipeline(books(), &[doc! { "$count": "books" }]).unwrap();
        assert_eq!(counted, vec![doc! { "books": 5 }]);

        let empty = run_pipeline(Vec::new(), &[doc! { "$count": "books" }]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_count_widens_past_i32() {
        assert_eq!(count_value(0), Bson::Int32(0));
        assert_eq!(count_value(3), Bson::Int32(3));
        assert_eq!(count_value(i32::MAX as usize), Bson::Int32(i32::MAX));
        assert_eq!(
            count_value(i32::MAX as usize + 1),
            Bson::Int64(i64::from(i32::MAX) + 1)
        );
    }

    #[test]
    fn test_invalid_stages() {
        let unknown = run_pipeline(books(), &[doc! { "$bucket": {} }]);
        assert!(matches!(unknown, Err(DatabaseError::InvalidQuery(_))));

        let zero_limit = run_pipeline(books(), &[doc! { "$limit": 0 }]);
        assert!(zero_limit.is_err());

        let two_fields = run_pipeline(books(), &[doc! { "$limit": 1, "$skip": 1 }]);
        assert!(two_fields.is_err());

        let missing_id = run_pipeline(books(), &[doc! { "$group": { "n": { "$sum": 1 } } }]);
        assert!(missing_id.is_err());

        let bad_accumulator =
            run_pipeline(books(), &[doc! { "$group": { "_id": null, "n": { "$median": 1 } } }]);
        assert!(bad_accumulator.is_err());
    }
}
