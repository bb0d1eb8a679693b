//! MongoDB Database Engine
//!
//! Collection operations backed by the official mongodb driver.

pub mod connection;
pub mod engine;

pub use connection::MongoConnection;
pub use engine::MongoEngine;

use crate::database::types::DatabaseError;

/// Server error codes for conflicting index definitions
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

/// MongoDB specific error conversion
pub(crate) fn convert_mongodb_error(err: mongodb::error::Error) -> DatabaseError {
    match err.kind.as_ref() {
        mongodb::error::ErrorKind::Authentication { .. } => {
            DatabaseError::AuthenticationFailed(err.to_string())
        }
        mongodb::error::ErrorKind::ServerSelection { .. }
        | mongodb::error::ErrorKind::ConnectionPoolCleared { .. }
        | mongodb::error::ErrorKind::DnsResolve { .. }
        | mongodb::error::ErrorKind::Io(_) => DatabaseError::ConnectionFailed(err.to_string()),
        mongodb::error::ErrorKind::InvalidArgument { .. } => {
            DatabaseError::InvalidQuery(format!("Invalid argument: {}", err))
        }
        mongodb::error::ErrorKind::Command(command)
            if command.code == INDEX_OPTIONS_CONFLICT || command.code == INDEX_KEY_SPECS_CONFLICT =>
        {
            DatabaseError::IndexConflict(command.message.clone())
        }
        _ => DatabaseError::QueryFailed(err.to_string()),
    }
}
