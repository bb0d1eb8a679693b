//! MongoDB Engine Implementation
//!
//! Main MongoDB engine entry point

use super::connection::MongoConnection;
use crate::config::RunnerConfig;
use crate::database::{
    engine::{DatabaseEngine, DocumentCollection},
    types::{DatabaseError, EngineType},
};
use async_trait::async_trait;
use tracing::info;

/// MongoDB Database Engine
#[derive(Clone, Debug, Default)]
pub struct MongoEngine;

impl MongoEngine {
    /// Create new MongoDB engine
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseEngine for MongoEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::MongoDB
    }

    async fn connect(
        &self,
        config: &RunnerConfig,
    ) -> Result<Box<dyn DocumentCollection>, DatabaseError> {
        config.validate()?;

        let connection = MongoConnection::new(config).await?;
        let server_version = connection
            .get_server_version()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        info!(
            server_version = %server_version,
            database = %config.database_name,
            collection = %config.collection_name,
            "Connected to MongoDB"
        );
        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mongo_engine_type() {
        assert_eq!(MongoEngine::new().engine_type(), EngineType::MongoDB);
    }

    #[tokio::test]
    async fn test_mongo_connect_rejects_invalid_config() {
        let config = RunnerConfig {
            uri: String::new(),
            ..Default::default()
        };

        let result = MongoEngine::new().connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::ConfigurationError(_))));
    }
}
