//! In-memory Database Engine
//!
//! Evaluates filters, projections, sorts, updates, aggregation pipelines and
//! explain plans in-process. Used by tests in place of a server.

mod aggregate;
pub mod engine;
mod explain;
mod query;

pub use engine::{MemoryCollection, MemoryEngine};
