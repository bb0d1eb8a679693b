//! In-memory engine
//!
//! Process-local collections with the same observable behavior as the
//! server for every operation the runner issues. Clones share state, so a
//! test can keep a handle to inspect what a run did.

use super::{aggregate::run_pipeline, explain::explain_find, query};
use crate::config::RunnerConfig;
use crate::database::{
    engine::{DatabaseEngine, DocumentCollection},
    types::{
        DatabaseError, DeleteOutcome, EngineType, ExplainVerbosity, FindQuery, IndexSpec,
        InsertOutcome, UpdateOutcome,
    },
};
use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

const ID_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexSpec::new(doc! { "_id": 1 }).with_name(ID_INDEX_NAME)],
        }
    }
}

impl CollectionState {
    fn insert(&mut self, mut document: Document) -> Result<(), DatabaseError> {
        if !document.contains_key("_id") {
            // keep _id first, as the server does
            let mut with_id = doc! { "_id": ObjectId::new() };
            for (key, value) in document {
                with_id.insert(key, value);
            }
            document = with_id;
        }

        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if self
            .documents
            .iter()
            .any(|existing| existing.get("_id").is_some_and(|e| query::values_equal(e, &id)))
        {
            return Err(DatabaseError::QueryFailed(format!(
                "E11000 duplicate key error dup key: {{ _id: {} }}",
                id
            )));
        }

        self.documents.push(document);
        Ok(())
    }

    fn first_match(&self, filter: &Document) -> Result<Option<usize>, DatabaseError> {
        for (index, doc) in self.documents.iter().enumerate() {
            if query::matches_filter(doc, filter)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    connect: Option<String>,
    operation: Option<(usize, String)>,
}

#[derive(Debug, Default)]
struct Shared {
    collections: RwLock<HashMap<String, CollectionState>>,
    faults: Mutex<FaultPlan>,
    connects: AtomicUsize,
    operations: AtomicUsize,
    closes: AtomicUsize,
}

/// In-memory database engine
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert documents directly, without counting as collection operations
    pub async fn insert_documents(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), DatabaseError> {
        let mut collections = self.shared.collections.write().await;
        let state = collections
            .entry(namespace(database, collection))
            .or_default();
        for document in documents {
            state.insert(document)?;
        }
        Ok(())
    }

    /// Snapshot of a collection's documents in insertion order
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.shared
            .collections
            .read()
            .await
            .get(&namespace(database, collection))
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent `connect` fail
    pub fn fail_connect(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.connect = Some(message.into());
        }
    }

    /// Make the n-th collection operation from now (1-based) fail
    pub fn fail_operation(&self, nth: usize, message: impl Into<String>) {
        let target = self.shared.operations.load(Ordering::SeqCst) + nth.max(1);
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.operation = Some((target, message.into()));
        }
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            *faults = FaultPlan::default();
        }
    }

    /// Number of `connect` calls, successful or not
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of collection operations attempted
    pub fn operation_count(&self) -> usize {
        self.shared.operations.load(Ordering::SeqCst)
    }

    /// Number of connections closed
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

#[async_trait]
impl DatabaseEngine for MemoryEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Memory
    }

    async fn connect(
        &self,
        config: &RunnerConfig,
    ) -> Result<Box<dyn DocumentCollection>, DatabaseError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        config.validate()?;

        let injected = self
            .shared
            .faults
            .lock()
            .ok()
            .and_then(|faults| faults.connect.clone());
        if let Some(message) = injected {
            return Err(DatabaseError::ConnectionFailed(message));
        }

        debug!(namespace = %config.namespace(), "memory connection opened");

        Ok(Box::new(MemoryCollection {
            shared: Arc::clone(&self.shared),
            namespace: config.namespace(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Collection handle for the in-memory engine
pub struct MemoryCollection {
    shared: Arc<Shared>,
    namespace: String,
    closed: AtomicBool,
}

impl MemoryCollection {
    /// Count the operation and apply any injected fault
    fn begin(&self, operation: &str) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionFailed(
                "connection already closed".to_string(),
            ));
        }

        let number = self.shared.operations.fetch_add(1, Ordering::SeqCst) + 1;
        let injected = self.shared.faults.lock().ok().and_then(|faults| {
            faults
                .operation
                .as_ref()
                .filter(|(target, _)| *target == number)
                .map(|(_, message)| message.clone())
        });

        match injected {
            Some(message) => Err(DatabaseError::QueryFailed(format!(
                "{} failed: {}",
                operation, message
            ))),
            None => Ok(()),
        }
    }
}

fn validate_index_keys(keys: &Document) -> Result<(), DatabaseError> {
    if keys.is_empty() {
        return Err(DatabaseError::InvalidQuery(
            "Index keys cannot be empty".to_string(),
        ));
    }
    for (field, direction) in keys {
        let valid = match direction {
            Bson::String(kind) => matches!(kind.as_str(), "text" | "hashed" | "2dsphere" | "2d"),
            other => matches!(query::as_integer(other), Some(1) | Some(-1)),
        };
        if !valid {
            return Err(DatabaseError::InvalidQuery(format!(
                "bad index key pattern for field '{}': {}",
                field, direction
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, DatabaseError> {
        self.begin("find")?;
        let collections = self.shared.collections.read().await;
        let Some(state) = collections.get(&self.namespace) else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for doc in &state.documents {
            if query::matches_filter(doc, &query.filter)? {
                matched.push(doc.clone());
            }
        }
        drop(collections);

        if let Some(ref sort) = query.sort {
            query::sort_documents(&mut matched, sort)?;
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let mut page: Vec<Document> = matched.into_iter().skip(skip).collect();
        if let Some(limit) = query.limit.filter(|l| *l != 0) {
            page.truncate(limit.unsigned_abs() as usize);
        }

        match query.projection {
            Some(ref projection) => page
                .iter()
                .map(|doc| query::apply_projection(doc, projection))
                .collect(),
            None => Ok(page),
        }
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertOutcome, DatabaseError> {
        self.begin("insert_many")?;
        let mut collections = self.shared.collections.write().await;
        let state = collections.entry(self.namespace.clone()).or_default();

        let mut inserted_count = 0;
        for document in documents {
            state.insert(document)?;
            inserted_count += 1;
        }

        Ok(InsertOutcome { inserted_count })
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, DatabaseError> {
        self.begin("update_one")?;
        let mut collections = self.shared.collections.write().await;
        let Some(state) = collections.get_mut(&self.namespace) else {
            // validate the update even when nothing can match
            query::apply_update(&mut Document::new(), &update)?;
            return Ok(UpdateOutcome::default());
        };

        let Some(index) = state.first_match(&filter)? else {
            query::apply_update(&mut Document::new(), &update)?;
            return Ok(UpdateOutcome::default());
        };

        let mut updated = state.documents[index].clone();
        let modified = query::apply_update(&mut updated, &update)?;
        state.documents[index] = updated;

        Ok(UpdateOutcome {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    async fn delete_one(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError> {
        self.begin("delete_one")?;
        let mut collections = self.shared.collections.write().await;
        let Some(state) = collections.get_mut(&self.namespace) else {
            return Ok(DeleteOutcome::default());
        };

        match state.first_match(&filter)? {
            Some(index) => {
                state.documents.remove(index);
                Ok(DeleteOutcome { deleted_count: 1 })
            }
            None => Ok(DeleteOutcome::default()),
        }
    }

    async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome, DatabaseError> {
        self.begin("delete_many")?;
        let mut collections = self.shared.collections.write().await;
        let Some(state) = collections.get_mut(&self.namespace) else {
            return Ok(DeleteOutcome::default());
        };

        let mut kept = Vec::with_capacity(state.documents.len());
        let mut deleted_count = 0;
        for doc in state.documents.drain(..) {
            if query::matches_filter(&doc, &filter)? {
                deleted_count += 1;
            } else {
                kept.push(doc);
            }
        }
        state.documents = kept;

        Ok(DeleteOutcome { deleted_count })
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, DatabaseError> {
        self.begin("aggregate")?;
        let snapshot = self
            .shared
            .collections
            .read()
            .await
            .get(&self.namespace)
            .map(|state| state.documents.clone())
            .unwrap_or_default();

        run_pipeline(snapshot, &pipeline)
    }

    async fn create_index(&self, index: IndexSpec) -> Result<String, DatabaseError> {
        self.begin("create_index")?;
        validate_index_keys(&index.keys)?;

        let name = index.resolved_name();
        let mut collections = self.shared.collections.write().await;
        let state = collections.entry(self.namespace.clone()).or_default();

        if let Some(existing) = state.indexes.iter().find(|i| i.resolved_name() == name) {
            if existing.keys == index.keys {
                debug!(index = %name, "index already exists");
                return Ok(name);
            }
            return Err(DatabaseError::IndexConflict(format!(
                "An existing index has the same name as the requested index: {}",
                name
            )));
        }

        if let Some(existing) = state.indexes.iter().find(|i| i.keys == index.keys) {
            return Err(DatabaseError::IndexConflict(format!(
                "Index already exists with a different name: {}",
                existing.resolved_name()
            )));
        }

        state.indexes.push(IndexSpec::new(index.keys).with_name(name.clone()));
        Ok(name)
    }

    async fn list_indexes(&self) -> Result<Vec<String>, DatabaseError> {
        self.begin("list_indexes")?;
        let collections = self.shared.collections.read().await;
        let state = collections.get(&self.namespace).ok_or_else(|| {
            DatabaseError::QueryFailed(format!("ns does not exist: {}", self.namespace))
        })?;

        Ok(state.indexes.iter().map(IndexSpec::resolved_name).collect())
    }

    async fn explain(
        &self,
        query: FindQuery,
        verbosity: ExplainVerbosity,
    ) -> Result<Document, DatabaseError> {
        self.begin("explain")?;
        let collections = self.shared.collections.read().await;
        let empty = CollectionState::default();
        let state = collections.get(&self.namespace).unwrap_or(&empty);

        explain_find(
            &self.namespace,
            &state.documents,
            &state.indexes,
            &query,
            verbosity,
        )
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.begin("ping")
    }

    async fn drop(&self) -> Result<(), DatabaseError> {
        self.begin("drop")?;
        self.shared.collections.write().await.remove(&self.namespace);
        Ok(())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            debug!(namespace = %self.namespace, "memory connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected(engine: &MemoryEngine) -> Box<dyn DocumentCollection> {
        engine.connect(&RunnerConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_rejects_duplicates() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;

        let outcome = collection
            .insert_many(vec![doc! { "title": "Emma" }, doc! { "_id": 7, "title": "Persuasion" }])
            .await
            .unwrap();
        assert_eq!(outcome.inserted_count, 2);

        let documents = engine.documents("plp_bookstore", "books").await;
        assert!(matches!(documents[0].get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(documents[0].keys().next().map(String::as_str), Some("_id"));

        let duplicate = collection.insert_many(vec![doc! { "_id": 7 }]).await;
        assert!(matches!(duplicate, Err(DatabaseError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_update_and_delete_affect_at_most_one() {
        let engine = MemoryEngine::new();
        engine
            .insert_documents(
                "plp_bookstore",
                "books",
                vec![
                    doc! { "title": "Twin", "price": 1.0 },
                    doc! { "title": "Twin", "price": 2.0 },
                ],
            )
            .await
            .unwrap();
        let collection = connected(&engine).await;

        let updated = collection
            .update_one(doc! { "title": "Twin" }, doc! { "$set": { "price": 9.0 } })
            .await
            .unwrap();
        assert_eq!(updated, UpdateOutcome { matched_count: 1, modified_count: 1 });

        let prices: Vec<f64> = engine
            .documents("plp_bookstore", "books")
            .await
            .iter()
            .map(|d| d.get_f64("price").unwrap())
            .collect();
        assert_eq!(prices, vec![9.0, 2.0]);

        let deleted = collection.delete_one(doc! { "title": "Twin" }).await.unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert_eq!(engine.documents("plp_bookstore", "books").await.len(), 1);

        let missing = collection.delete_one(doc! { "title": "Nope" }).await.unwrap();
        assert_eq!(missing.deleted_count, 0);

        let missing = collection
            .update_one(doc! { "title": "Nope" }, doc! { "$set": { "price": 1.0 } })
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::default());
    }

    #[tokio::test]
    async fn test_update_without_match_still_validates() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;

        let result = collection
            .update_one(doc! { "title": "Nope" }, doc! { "price": 1.0 })
            .await;
        assert!(matches!(result, Err(DatabaseError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;

        let first = collection.create_index(IndexSpec::new(doc! { "title": 1 })).await.unwrap();
        let second = collection.create_index(IndexSpec::new(doc! { "title": 1 })).await.unwrap();
        assert_eq!(first, "title_1");
        assert_eq!(first, second);

        let names = collection.list_indexes().await.unwrap();
        assert_eq!(names, vec!["_id_".to_string(), "title_1".to_string()]);
    }

    #[tokio::test]
    async fn test_create_index_conflicts() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;

        collection
            .create_index(IndexSpec::new(doc! { "title": 1 }).with_name("by_title"))
            .await
            .unwrap();

        let same_name = collection
            .create_index(IndexSpec::new(doc! { "author": 1 }).with_name("by_title"))
            .await;
        assert!(matches!(same_name, Err(DatabaseError::IndexConflict(_))));

        let same_keys = collection.create_index(IndexSpec::new(doc! { "title": 1 })).await;
        assert!(matches!(same_keys, Err(DatabaseError::IndexConflict(_))));

        let bad_keys = collection.create_index(IndexSpec::new(doc! { "title": 5 })).await;
        assert!(matches!(bad_keys, Err(DatabaseError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_list_indexes_on_missing_collection() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;
        assert!(collection.list_indexes().await.is_err());
    }

    #[tokio::test]
    async fn test_fault_injection_and_counters() {
        let engine = MemoryEngine::new();
        let collection = connected(&engine).await;

        engine.fail_operation(2, "injected");
        assert!(collection.ping().await.is_ok());
        assert!(collection.ping().await.is_err());
        assert!(collection.ping().await.is_ok());
        assert_eq!(engine.operation_count(), 3);

        collection.close().await.unwrap();
        collection.close().await.unwrap();
        assert_eq!(engine.close_count(), 1);
        assert!(collection.ping().await.is_err());

        engine.fail_connect("unreachable");
        assert!(engine.connect(&RunnerConfig::default()).await.is_err());
        assert_eq!(engine.connect_count(), 2);

        engine.clear_faults();
        assert!(engine.connect(&RunnerConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_with_page_and_projection() {
        let engine = MemoryEngine::new();
        engine
            .insert_documents(
                "plp_bookstore",
                "books",
                (1..=8_i32)
                    .map(|i| doc! { "title": format!("Book {}", i), "price": f64::from(10 - i) })
                    .collect(),
            )
            .await
            .unwrap();
        let collection = connected(&engine).await;

        let page = collection
            .find(
                FindQuery::new(doc! {})
                    .projection(doc! { "title": 1, "_id": 0 })
                    .sort(doc! { "price": 1 })
                    .skip(1)
                    .limit(3),
            )
            .await
            .unwrap();

        assert_eq!(
            page,
            vec![
                doc! { "title": "Book 7" },
                doc! { "title": "Book 6" },
                doc! { "title": "Book 5" },
            ]
        );
    }
}
