//! Database access layer
//!
//! Engine traits, query types and the concrete MongoDB and in-memory engines.

pub mod engine;
pub mod engines;
pub mod pipeline;
pub mod types;

pub use engine::{DatabaseEngine, DocumentCollection};
pub use engines::memory::MemoryEngine;
pub use engines::mongodb::MongoEngine;
pub use pipeline::{AggregationPipeline, AggregationStage};
pub use types::{
    DatabaseError, DeleteOutcome, EngineType, ExplainVerbosity, FindQuery, IndexSpec,
    InsertOutcome, UpdateOutcome,
};
