//! MongoDB Connection Implementation
//!
//! Provides a collection handle using the official mongodb driver

use super::convert_mongodb_error;
use crate::config::{ConnectionOptions, RunnerConfig};
use crate::database::{
    engine::DocumentCollection,
    types::{
        DatabaseError, DeleteOutcome, ExplainVerbosity, FindQuery, IndexSpec, InsertOutcome,
        UpdateOutcome,
    },
};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    options::{ClientOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use std::time::Duration;
use tracing::debug;

/// MongoDB collection connection
pub struct MongoConnection {
    client: Client,
    database: Database,
    collection: Collection<Document>,
}

impl MongoConnection {
    /// Create a new connection and verify it with a ping
    pub async fn new(config: &RunnerConfig) -> Result<Self, DatabaseError> {
        let mut client_options = ClientOptions::parse(&config.uri)
            .await
            .map_err(convert_mongodb_error)?;

        apply_connection_options(&mut client_options, &config.connection);

        let client = Client::with_options(client_options).map_err(convert_mongodb_error)?;

        // Ping to verify connection; the driver connects lazily otherwise
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        let database = client.database(&config.database_name);
        let collection = database.collection::<Document>(&config.collection_name);

        debug!(namespace = %collection.namespace(), "MongoDB connection established");

        Ok(Self {
            client,
            database,
            collection,
        })
    }

    /// Get server version
    pub async fn get_server_version(&self) -> Result<String, DatabaseError> {
        let build_info = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        Ok(build_info
            .get_str("version")
            .unwrap_or("unknown")
            .to_string())
    }
}

fn apply_connection_options(client_options: &mut ClientOptions, options: &ConnectionOptions) {
    client_options.max_pool_size = Some(options.max_pool_size);
    client_options.min_pool_size = Some(options.min_pool_size);
    client_options.connect_timeout = Some(Duration::from_millis(options.connect_timeout_ms));
    client_options.server_selection_timeout =
        Some(Duration::from_millis(options.server_selection_timeout_ms));

    if let Some(ref app_name) = options.app_name {
        client_options.app_name = Some(app_name.clone());
    }
}

/// Build the `find` command document that `explain` wraps
fn find_command(collection: &str, query: &FindQuery) -> Document {
    let mut command = doc! {
        "find": collection,
        "filter": query.filter.clone(),
    };
    if let Some(ref projection) = query.projection {
        command.insert("projection", projection.clone());
    }
    if let Some(ref sort) = query.sort {
        command.insert("sort", sort.clone());
    }
    if let Some(skip) = query.skip {
        command.insert("skip", skip as i64);
    }
    if let Some(limit) = query.limit {
        command.insert("limit", limit);
    }
    command
}

/// Index model carrying an explicit name only when one was given
fn index_model(index: &IndexSpec) -> IndexModel {
    let options = index
        .name
        .clone()
        .map(|name| IndexOptions::builder().name(name).build());

    IndexModel::builder()
        .keys(index.keys.clone())
        .options(options)
        .build()
}

#[async_trait]
impl DocumentCollection for MongoConnection {
    fn namespace(&self) -> String {
        self.collection.namespace().to_string()
    }

    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, DatabaseError> {
        let mut action = self.collection.find(query.filter);
        if let Some(projection) = query.projection {
            action = action.projection(projection);
        }
        if let Some(sort) = query.sort {
            action = action.sort(sort);
        }
        if let Some(skip) = query.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = query.limit {
            action = action.limit(limit);
        }

        let cursor = action.await.map_err(convert_mongodb_error)?;
        cursor.try_collect().await.map_err(convert_mongodb_error)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertOutcome, DatabaseError> {
        if documents.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let result = self
            .collection
            .insert_many(documents)
            .await
            .map_err(convert_mongodb_error)?;

        Ok(InsertOutcome {
            inserted_count: result.inserted_ids.len() as u64,
        })
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let result = self
            .collection
            .update_one(filter, update)
            .await
            .map_err(convert_mongodb_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn delete_one(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError> {
        let result = self
            .collection
            .delete_one(filter)
            .await
            .map_err(convert_mongodb_error)?;

        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError> {
        let result = self
            .collection
            .delete_many(filter)
            .await
            .map_err(convert_mongodb_error)?;

        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, DatabaseError> {
        let cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .map_err(convert_mongodb_error)?;

        cursor.try_collect().await.map_err(convert_mongodb_error)
    }

    async fn create_index(&self, index: IndexSpec) -> Result<String, DatabaseError> {
        let result = self
            .collection
            .create_index(index_model(&index))
            .await
            .map_err(convert_mongodb_error)?;

        Ok(result.index_name)
    }

    async fn list_indexes(&self) -> Result<Vec<String>, DatabaseError> {
        self.collection
            .list_index_names()
            .await
            .map_err(convert_mongodb_error)
    }

    async fn explain(
        &self,
        query: FindQuery,
        verbosity: ExplainVerbosity,
    ) -> Result<Document, DatabaseError> {
        let command = doc! {
            "explain": find_command(self.collection.name(), &query),
            "verbosity": verbosity.as_str(),
        };

        self.database
            .run_command(command)
            .await
            .map_err(convert_mongodb_error)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        Ok(())
    }

    async fn drop(&self) -> Result<(), DatabaseError> {
        self.collection.drop().await.map_err(convert_mongodb_error)
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
