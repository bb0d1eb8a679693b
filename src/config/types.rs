use crate::database::types::DatabaseError;
use crate::logging::LogSettings;
use serde::{Deserialize, Serialize};

/// Runner configuration
///
/// Everything the query runner needs to reach its collection and which
/// parameters to use for each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Connection string (`mongodb://` or `mongodb+srv://`)
    pub uri: String,

    /// Database name
    pub database_name: String,

    /// Collection name
    pub collection_name: String,

    /// Driver connection options
    pub connection: ConnectionOptions,

    /// Step parameters
    pub plan: QueryPlan,

    /// Logging configuration
    pub logging: LogSettings,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database_name: "plp_bookstore".to_string(),
            collection_name: "books".to_string(),
            connection: ConnectionOptions::default(),
            plan: QueryPlan::default(),
            logging: LogSettings::default(),
        }
    }
}

impl RunnerConfig {
    /// Create configuration for the given namespace with default options
    pub fn new(
        uri: impl Into<String>,
        database_name: impl Into<String>,
        collection_name: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database_name: database_name.into(),
            collection_name: collection_name.into(),
            ..Default::default()
        }
    }

    /// `<database>.<collection>`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database_name, self.collection_name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.uri.is_empty() {
            return Err(DatabaseError::ConfigurationError(
                "MongoDB URI cannot be empty".to_string(),
            ));
        }
        if !(self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://")) {
            return Err(DatabaseError::ConfigurationError(format!(
                "MongoDB URI must start with mongodb:// or mongodb+srv://: {}",
                self.uri
            )));
        }
        if self.database_name.is_empty() {
            return Err(DatabaseError::ConfigurationError(
                "Database name cannot be empty".to_string(),
            ));
        }
        if let Some(c) = self
            .database_name
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$'))
        {
            return Err(DatabaseError::ConfigurationError(format!(
                "Database name '{}' contains invalid character '{}'",
                self.database_name, c
            )));
        }
        if self.collection_name.is_empty() {
            return Err(DatabaseError::ConfigurationError(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if self.collection_name.contains('$') || self.collection_name.starts_with("system.") {
            return Err(DatabaseError::ConfigurationError(format!(
                "Invalid collection name: {}",
                self.collection_name
            )));
        }
        if self.plan.page_limit <= 0 {
            return Err(DatabaseError::ConfigurationError(format!(
                "Page limit must be positive, got {}",
                self.plan.page_limit
            )));
        }
        Ok(())
    }
}

/// Driver connection options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Server selection timeout in milliseconds
    pub server_selection_timeout_ms: u64,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Application name reported to the server
    pub app_name: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            server_selection_timeout_ms: 30_000,
            max_pool_size: 10,
            min_pool_size: 0,
            app_name: Some("plp-bookstore".to_string()),
        }
    }
}

/// Parameters for the fixed step sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPlan {
    /// Author for the equality find
    pub author: String,
    /// Year threshold for the range find
    pub published_after: i32,
    /// Genre for the equality find
    pub genre: String,
    /// Title whose price is updated
    pub update_title: String,
    /// New price for `update_title`
    pub new_price: f64,
    /// Title that is deleted
    pub delete_title: String,
    /// Year threshold for the in-stock page
    pub in_stock_published_after: i32,
    /// Pagination offset for the in-stock page
    pub page_skip: u64,
    /// Pagination size for the in-stock page
    pub page_limit: i64,
    /// Title used for the single-field explain
    pub explain_title: String,
    /// Author used for the compound explain
    pub explain_author: String,
    /// Year used for the compound explain
    pub explain_year: i32,
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self {
            author: "Herman Melville".to_string(),
            published_after: 1950,
            genre: "Fiction".to_string(),
            update_title: "Pride and Prejudice".to_string(),
            new_price: 15.00,
            delete_title: "Moby Dick".to_string(),
            in_stock_published_after: 2010,
            page_skip: 0,
            page_limit: 5,
            explain_title: "1984".to_string(),
            explain_author: "George Orwell".to_string(),
            explain_year: 1949,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.uri, "mongodb://localhost:27017");
        assert_eq!(config.namespace(), "plp_bookstore.books");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let valid = RunnerConfig::new("mongodb+srv://cluster.example.net", "shop", "books");
        assert!(valid.validate().is_ok());

        let empty_uri = RunnerConfig::new("", "shop", "books");
        assert!(empty_uri.validate().is_err());

        let bad_scheme = RunnerConfig::new("http://localhost:27017", "shop", "books");
        assert!(bad_scheme.validate().is_err());

        let empty_db = RunnerConfig::new("mongodb://localhost:27017", "", "books");
        assert!(empty_db.validate().is_err());

        let dotted_db = RunnerConfig::new("mongodb://localhost:27017", "plp.bookstore", "books");
        assert!(dotted_db.validate().is_err());

        let empty_collection = RunnerConfig::new("mongodb://localhost:27017", "shop", "");
        assert!(empty_collection.validate().is_err());

        let system_collection =
            RunnerConfig::new("mongodb://localhost:27017", "shop", "system.users");
        assert!(system_collection.validate().is_err());
    }

    #[test]
    fn test_page_limit_must_be_positive() {
        let mut config = RunnerConfig::default();
        config.plan.page_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(DatabaseError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_default_plan_matches_bookstore_script() {
        let plan = QueryPlan::default();
        assert_eq!(plan.author, "Herman Melville");
        assert_eq!(plan.published_after, 1950);
        assert_eq!(plan.update_title, "Pride and Prejudice");
        assert_eq!(plan.new_price, 15.00);
        assert_eq!(plan.delete_title, "Moby Dick");
        assert_eq!(plan.page_limit, 5);
    }
}
