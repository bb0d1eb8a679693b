//! # plp-bookstore
//!
//! Runs a fixed sequence of CRUD, aggregation and index operations against the
//! `plp_bookstore.books` MongoDB collection and prints the results.
//!
//! The database is reached through the [`database::DatabaseEngine`] trait, so
//! the same [`runner::QueryRunner`] drives either the MongoDB driver or the
//! in-memory engine used by the tests.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod runner;
pub mod seed;

pub use config::{ConfigLoader, RunnerConfig};
pub use database::{DatabaseEngine, DatabaseError, MemoryEngine, MongoEngine};
pub use error::{Error, Result};
pub use runner::{QueryRunner, RunFailure, RunReport, Step};
