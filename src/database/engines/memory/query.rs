//! Filter, projection, sort and update evaluation over BSON documents

use crate::database::types::DatabaseError;
use mongodb::bson::{Bson, Document};
use std::cmp::Ordering;

const NUMBER_RANK: u8 = 2;
const OTHER_RANK: u8 = 12;

/// Canonical type bracket used when comparing values of different types
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => NUMBER_RANK,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => OTHER_RANK,
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn as_exact_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

/// Integer value of a number, accepting integral doubles
pub(crate) fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        other => as_exact_i64(other),
    }
}

fn compare_numbers(a: &Bson, b: &Bson) -> Ordering {
    if let (Some(x), Some(y)) = (as_exact_i64(a), as_exact_i64(b)) {
        return x.cmp(&y);
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ordering = compare_values(va, vb).then_with(|| ka.cmp(kb));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Total order over BSON values: type bracket first, then value
pub(crate) fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        _ if rank_a == NUMBER_RANK => compare_numbers(a, b),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let ordering = compare_values(va, vb);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        _ => Ordering::Equal,
    }
}

/// Equality with numeric values compared across int/double
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    let rank = type_rank(a);
    if rank != type_rank(b) {
        return false;
    }
    if rank == OTHER_RANK || matches!(a, Bson::Binary(_) | Bson::Timestamp(_) | Bson::RegularExpression(_)) {
        return a == b;
    }
    compare_values(a, b) == Ordering::Equal
}

pub(crate) fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

/// Resolve a dotted path such as `address.city`
pub(crate) fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Bson::Document(inner) => lookup_path(inner, rest),
            _ => None,
        },
    }
}

/// Evaluate a query filter against a document
pub(crate) fn matches_filter(doc: &Document, filter: &Document) -> Result<bool, DatabaseError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in logical_clauses(key, condition)? {
                    if !matches_filter(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in logical_clauses(key, condition)? {
                    if matches_filter(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in logical_clauses(key, condition)? {
                    if matches_filter(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(DatabaseError::InvalidQuery(format!(
                    "unknown top level operator: {}",
                    op
                )));
            }
            path => matches_condition(lookup_path(doc, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_clauses<'a>(op: &str, value: &'a Bson) -> Result<Vec<&'a Document>, DatabaseError> {
    let items = match value {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(DatabaseError::InvalidQuery(format!(
                "{} must be a nonempty array",
                op
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                DatabaseError::InvalidQuery(format!("{} argument's entries must be objects", op))
            })
        })
        .collect()
}

fn is_operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(doc) if doc.keys().next().is_some_and(|k| k.starts_with('$')) => Some(doc),
        _ => None,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool, DatabaseError> {
    match is_operator_document(condition) {
        Some(operators) => {
            for (op, operand) in operators {
                if !evaluate_operator(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => Ok(matches_equality(value, condition)),
    }
}

fn matches_equality(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) => {
            values_equal(&Bson::Array(items.clone()), expected)
                || items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn matches_range(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let satisfies = |candidate: &Bson| {
        type_rank(candidate) == type_rank(operand) && accept(compare_values(candidate, operand))
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(satisfies),
        Some(actual) => satisfies(actual),
    }
}

fn evaluate_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> Result<bool, DatabaseError> {
    match op {
        "$eq" => Ok(matches_equality(value, operand)),
        "$ne" => Ok(!matches_equality(value, operand)),
        "$gt" => Ok(matches_range(value, operand, |o| o == Ordering::Greater)),
        "$gte" => Ok(matches_range(value, operand, |o| o != Ordering::Less)),
        "$lt" => Ok(matches_range(value, operand, |o| o == Ordering::Less)),
        "$lte" => Ok(matches_range(value, operand, |o| o != Ordering::Greater)),
        "$in" | "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                DatabaseError::InvalidQuery(format!("{} needs an array", op))
            })?;
            let found = candidates
                .iter()
                .any(|candidate| matches_equality(value, candidate));
            Ok(if op == "$in" { found } else { !found })
        }
        "$exists" => Ok(is_truthy(operand) == value.is_some()),
        "$not" => match operand {
            Bson::Document(_) => Ok(!matches_condition(value, operand)?),
            _ => Err(DatabaseError::InvalidQuery(
                "$not needs a regex or a document".to_string(),
            )),
        },
        other => Err(DatabaseError::InvalidQuery(format!("unknown operator: {}", other))),
    }
}

/// Apply an inclusion or exclusion projection
pub(crate) fn apply_projection(
    doc: &Document,
    projection: &Document,
) -> Result<Document, DatabaseError> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let include_id = projection.get("_id").map(is_truthy).unwrap_or(true);
    let mut inclusion: Option<bool> = None;
    for (field, spec) in projection {
        if field == "_id" {
            continue;
        }
        let include = is_truthy(spec);
        match inclusion {
            None => inclusion = Some(include),
            Some(mode) if mode != include => {
                let (action, kind) = if include {
                    ("inclusion", "exclusion")
                } else {
                    ("exclusion", "inclusion")
                };
                return Err(DatabaseError::InvalidQuery(format!(
                    "Cannot do {} on field {} in {} projection",
                    action, field, kind
                )));
            }
            _ => {}
        }
    }

    let projected = if inclusion == Some(true) {
        doc.iter()
            .filter(|(key, _)| {
                if key.as_str() == "_id" {
                    include_id
                } else {
                    projection.get(key.as_str()).is_some_and(is_truthy)
                }
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    } else {
        let mut out = doc.clone();
        for (field, spec) in projection {
            if field == "_id" {
                if !include_id {
                    out.remove("_id");
                }
            } else if !is_truthy(spec) {
                out.remove(field);
            }
        }
        out
    };

    Ok(projected)
}

fn parse_sort(sort: &Document) -> Result<Vec<(String, bool)>, DatabaseError> {
    sort.iter()
        .map(|(field, direction)| match as_integer(direction) {
            Some(1) => Ok((field.clone(), true)),
            Some(-1) => Ok((field.clone(), false)),
            _ => Err(DatabaseError::InvalidQuery(format!(
                "$sort key ordering must be 1 (for ascending) or -1 (for descending): {}",
                field
            ))),
        })
        .collect()
}

/// Stable multi-key sort; missing fields sort as null
pub(crate) fn sort_documents(docs: &mut [Document], sort: &Document) -> Result<(), DatabaseError> {
    let keys = parse_sort(sort)?;
    let null = Bson::Null;

    docs.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let va = lookup_path(a, field).unwrap_or(&null);
            let vb = lookup_path(b, field).unwrap_or(&null);
            let ordering = compare_values(va, vb);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(())
}

/// Add two numbers, widening Int32 -> Int64 -> Double as needed
pub(crate) fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => Some(
            x.checked_add(*y)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(i64::from(*x) + i64::from(*y))),
        ),
        _ => match (as_exact_i64(a), as_exact_i64(b)) {
            (Some(x), Some(y)) => Some(
                x.checked_add(y)
                    .map(Bson::Int64)
                    .unwrap_or(Bson::Double(x as f64 + y as f64)),
            ),
            _ => Some(Bson::Double(as_f64(a)? + as_f64(b)?)),
        },
    }
}

/// Apply an update document; returns whether the document changed
pub(crate) fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, DatabaseError> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(DatabaseError::InvalidQuery(
            "update document requires atomic operators".to_string(),
        ));
    }

    let before = doc.clone();
    for (op, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            DatabaseError::InvalidQuery(format!(
                "Modifiers operate on fields but we found another type instead: {}",
                op
            ))
        })?;

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(DatabaseError::InvalidQuery(
                    "Performing an update on the path '_id' would modify the immutable field '_id'"
                        .to_string(),
                ));
            }

            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$unset" => remove_path(doc, path),
                "$inc" => {
                    let current = lookup_path(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    let sum = as_f64(value)
                        .and(as_f64(&current))
                        .and_then(|_| add_numbers(&current, value))
                        .ok_or_else(|| {
                            DatabaseError::InvalidQuery(format!(
                                "Cannot apply $inc to a value of non-numeric type at {}",
                                path
                            ))
                        })?;
                    set_path(doc, path, sum)?;
                }
                other => {
                    return Err(DatabaseError::InvalidQuery(format!(
                        "Unknown modifier: {}",
                        other
                    )))
                }
            }
        }
    }

    Ok(*doc != before)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), DatabaseError> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DatabaseError::InvalidQuery(format!(
                    "Cannot create field '{}' in element {{{}}}",
                    rest, head
                ))),
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn book(title: &str, year: i32, price: f64, in_stock: bool) -> Document {
        doc! {
            "title": title,
            "author": "Author",
            "genre": "Fiction",
            "published_year": year,
            "price": price,
            "in_stock": in_stock,
        }
    }

    #[test]
    fn test_equality_and_range() {
        let doc = book("Dune", 1965, 9.99, true);

        assert!(matches_filter(&doc, &doc! { "title": "Dune" }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "title": "Emma" }).unwrap());
        assert!(matches_filter(&doc, &doc! { "published_year": { "$gt": 1950 } }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "published_year": { "$gt": 1965 } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "published_year": { "$gte": 1965, "$lt": 2000 } }).unwrap());
        // int and double compare numerically
        assert!(matches_filter(&doc, &doc! { "published_year": 1965.0 }).unwrap());
        assert!(matches_filter(&doc, &doc! { "price": { "$lt": 10 } }).unwrap());
    }

    #[test]
    fn test_range_requires_same_type_bracket() {
        let doc = doc! { "published_year": "1965" };
        assert!(!matches_filter(&doc, &doc! { "published_year": { "$gt": 1950 } }).unwrap());
    }

    #[test]
    fn test_implicit_and_logical_operators() {
        let doc = book("Dune", 1965, 9.99, true);

        let filter = doc! { "in_stock": true, "published_year": { "$gt": 2010 } };
        assert!(!matches_filter(&doc, &filter).unwrap());

        let filter = doc! { "$or": [ { "title": "Emma" }, { "title": "Dune" } ] };
        assert!(matches_filter(&doc, &filter).unwrap());

        let filter = doc! { "$nor": [ { "title": "Dune" } ] };
        assert!(!matches_filter(&doc, &filter).unwrap());

        assert!(matches_filter(&doc, &doc! { "title": { "$in": ["Emma", "Dune"] } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "title": { "$nin": ["Emma"] } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "isbn": { "$exists": false } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "isbn": null }).unwrap());
    }

    #[test]
    fn test_array_membership() {
        let doc = doc! { "tags": ["classic", "sea"] };
        assert!(matches_filter(&doc, &doc! { "tags": "sea" }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "tags": "space" }).unwrap());
    }

    #[test]
    fn test_dotted_paths() {
        let doc = doc! { "publisher": { "name": "Penguin", "city": "London" } };
        assert!(matches_filter(&doc, &doc! { "publisher.city": "London" }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "publisher.city": "Paris" }).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_invalid_query() {
        let doc = book("Dune", 1965, 9.99, true);
        let result = matches_filter(&doc, &doc! { "price": { "$between": [1, 2] } });
        assert!(matches!(result, Err(DatabaseError::InvalidQuery(_))));

        let result = matches_filter(&doc, &doc! { "$where": "true" });
        assert!(matches!(result, Err(DatabaseError::InvalidQuery(_))));
    }

    #[test]
    fn test_inclusion_projection_excluding_id() {
        let doc = doc! { "_id": 1, "title": "Dune", "author": "Herbert", "price": 9.99, "genre": "SF" };
        let projected =
            apply_projection(&doc, &doc! { "title": 1, "author": 1, "price": 1, "_id": 0 }).unwrap();

        let keys: Vec<&str> = projected.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "author", "price"]);
    }

    #[test]
    fn test_exclusion_projection() {
        let doc = doc! { "_id": 1, "title": "Dune", "price": 9.99 };
        let projected = apply_projection(&doc, &doc! { "price": 0 }).unwrap();
        assert_eq!(projected, doc! { "_id": 1, "title": "Dune" });
    }

    #[test]
    fn test_mixed_projection_rejected() {
        let doc = doc! { "_id": 1, "title": "Dune", "price": 9.99 };
        let result = apply_projection(&doc, &doc! { "title": 1, "price": 0 });
        assert!(matches!(result, Err(DatabaseError::InvalidQuery(_))));
    }

    #[test]
    fn test_sort_ascending_descending_and_stable() {
        let mut docs = vec![
            doc! { "title": "c", "price": 12.5 },
            doc! { "title": "a", "price": 7.99 },
            doc! { "title": "b", "price": 12.5 },
            doc! { "title": "d" },
        ];

        sort_documents(&mut docs, &doc! { "price": 1 }).unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.get_str("title").unwrap()).collect();
        // missing sorts as null (first); equal prices keep their order
        assert_eq!(titles, vec!["d", "a", "c", "b"]);

        sort_documents(&mut docs, &doc! { "price": -1, "title": 1 }).unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.get_str("title").unwrap()).collect();
        assert_eq!(titles, vec!["b", "c", "a", "d"]);

        assert!(sort_documents(&mut docs, &doc! { "price": 2 }).is_err());
    }

    #[test]
    fn test_set_update() {
        let mut doc = book("Pride and Prejudice", 1813, 7.99, true);
        let changed = apply_update(&mut doc, &doc! { "$set": { "price": 15.00 } }).unwrap();
        assert!(changed);
        assert_eq!(doc.get_f64("price").unwrap(), 15.00);

        let changed = apply_update(&mut doc, &doc! { "$set": { "price": 15.00 } }).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_unset_inc_and_nested_set() {
        let mut doc = doc! { "title": "Emma", "stock": 3, "price": 5.0 };
        apply_update(&mut doc, &doc! { "$inc": { "stock": 2 }, "$unset": { "price": "" } }).unwrap();
        assert_eq!(doc.get_i32("stock").unwrap(), 5);
        assert!(!doc.contains_key("price"));

        apply_update(&mut doc, &doc! { "$set": { "publisher.city": "London" } }).unwrap();
        assert_eq!(lookup_path(&doc, "publisher.city"), Some(&Bson::String("London".into())));
    }

    #[test]
    fn test_update_requires_operators() {
        let mut doc = doc! { "title": "Emma" };
        assert!(apply_update(&mut doc, &doc! { "title": "Persuasion" }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 5 } }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$inc": { "title": 1 } }).is_err());
    }

    #[test]
    fn test_add_numbers_widening() {
        assert_eq!(add_numbers(&Bson::Int32(1), &Bson::Int32(2)), Some(Bson::Int32(3)));
        assert_eq!(
            add_numbers(&Bson::Int32(i32::MAX), &Bson::Int32(1)),
            Some(Bson::Int64(i64::from(i32::MAX) + 1))
        );
        assert_eq!(add_numbers(&Bson::Int32(1), &Bson::Double(0.5)), Some(Bson::Double(1.5)));
        assert_eq!(add_numbers(&Bson::String("x".into()), &Bson::Int32(1)), None);
    }
}
