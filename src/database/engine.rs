//! Database Engine Abstraction Layer
//!
//! Uniform interface over the MongoDB driver and the in-memory engine

use super::types::{
    DatabaseError, DeleteOutcome, EngineType, ExplainVerbosity, FindQuery, IndexSpec,
    InsertOutcome, UpdateOutcome,
};
use crate::config::RunnerConfig;
use async_trait::async_trait;
use mongodb::bson::Document;

/// Database engine abstraction
///
/// Produces collection handles bound to the configured namespace
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Engine kind
    fn engine_type(&self) -> EngineType;

    /// Open a connection and bind it to `config.database_name.config.collection_name`
    async fn connect(
        &self,
        config: &RunnerConfig,
    ) -> Result<Box<dyn DocumentCollection>, DatabaseError>;
}

/// Collection handle
///
/// Every method is a thin pass-through to the backend's native operation.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// `<database>.<collection>`
    fn namespace(&self) -> String;

    /// Filtered find with optional projection, sort, skip and limit
    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, DatabaseError>;

    /// Insert documents, assigning `_id` where missing
    async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertOutcome, DatabaseError>;

    /// Update the first matching document
    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, DatabaseError>;

    /// Delete the first matching document
    async fn delete_one(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError>;

    /// Delete every matching document
    async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError>;

    /// Run an aggregation pipeline
    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, DatabaseError>;

    /// Create an index, returning its name. Re-creating an identical index is a no-op.
    async fn create_index(&self, index: IndexSpec) -> Result<String, DatabaseError>;

    /// Names of all indexes on the collection
    async fn list_indexes(&self) -> Result<Vec<String>, DatabaseError>;

    /// Describe how the server executes a find
    async fn explain(
        &self,
        query: FindQuery,
        verbosity: ExplainVerbosity,
    ) -> Result<Document, DatabaseError>;

    /// Verify the server is reachable
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Drop the collection and its indexes
    async fn drop(&self) -> Result<(), DatabaseError>;

    /// Release the connection
    async fn close(&self) -> Result<(), DatabaseError>;
}
