//! Database Types
//!
//! Query, index and outcome types shared by every engine

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported engine kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    MongoDB,
    Memory,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::MongoDB => write!(f, "mongodb"),
            EngineType::Memory => write!(f, "memory"),
        }
    }
}

/// Filtered find with optional projection, sort and pagination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Query filter
    pub filter: Document,
    /// Field projection
    pub projection: Option<Document>,
    /// Sort specification
    pub sort: Option<Document>,
    /// Number of documents to skip
    pub skip: Option<u64>,
    /// Maximum number of documents to return
    pub limit: Option<i64>,
}

impl FindQuery {
    /// Create a query for the given filter
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Restrict returned fields
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Order results
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Skip leading results
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Index key specification
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Ordered key pattern, e.g. `{ author: 1, published_year: 1 }`
    pub keys: Document,
    /// Explicit index name; the server default is derived from the keys
    pub name: Option<String>,
}

impl IndexSpec {
    /// Create an index spec from a key pattern
    pub fn new(keys: Document) -> Self {
        Self { keys, name: None }
    }

    /// Use an explicit index name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name the server gives this index: `field_direction` pairs joined by `_`
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, key_direction(direction)))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Explicit name, or the server default
    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.default_name())
    }

    /// Field names in key order
    pub fn fields(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }
}

fn key_direction(value: &Bson) -> String {
    match value {
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) if v.fract() == 0.0 => format!("{}", *v as i64),
        Bson::Double(v) => v.to_string(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Explain verbosity modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExplainVerbosity {
    QueryPlanner,
    ExecutionStats,
    AllPlansExecution,
}

impl ExplainVerbosity {
    /// Verbosity string understood by the server
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainVerbosity::QueryPlanner => "queryPlanner",
            ExplainVerbosity::ExecutionStats => "executionStats",
            ExplainVerbosity::AllPlansExecution => "allPlansExecution",
        }
    }
}

/// Result of a bulk insert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted_count: u64,
}

/// Result of a single-document update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Documents matched by the filter (0 or 1)
    pub matched_count: u64,
    /// Documents actually changed (0 or 1)
    pub modified_count: u64,
}

/// Result of a delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// Database layer error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Index conflict: {0}")]
    IndexConflict(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<mongodb::bson::ser::Error> for DatabaseError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        DatabaseError::SerializationError(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for DatabaseError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        DatabaseError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_index_default_name() {
        let single = IndexSpec::new(doc! { "title": 1 });
        assert_eq!(single.default_name(), "title_1");

        let compound = IndexSpec::new(doc! { "author": 1, "published_year": -1 });
        assert_eq!(compound.default_name(), "author_1_published_year_-1");
        assert_eq!(compound.fields(), vec!["author", "published_year"]);

        let named = IndexSpec::new(doc! { "title": 1 }).with_name("by_title");
        assert_eq!(named.resolved_name(), "by_title");
    }

    #[test]
    fn test_find_query_builder() {
        let query = FindQuery::new(doc! { "in_stock": true })
            .projection(doc! { "title": 1, "_id": 0 })
            .sort(doc! { "price": 1 })
            .skip(0)
            .limit(5);

        assert_eq!(query.skip, Some(0));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.sort, Some(doc! { "price": 1 }));
    }

    #[test]
    fn test_explain_verbosity_strings() {
        assert_eq!(ExplainVerbosity::ExecutionStats.as_str(), "executionStats");
        assert_eq!(ExplainVerbosity::QueryPlanner.as_str(), "queryPlanner");
    }
}
