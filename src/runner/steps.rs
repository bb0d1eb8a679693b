//! The fixed step sequence
//!
//! Each operation is a single call into the collection handle. Printing lives
//! in `report`; these functions only talk to the database.

use crate::config::QueryPlan;
use crate::database::{
    AggregationPipeline, DatabaseError, DeleteOutcome, DocumentCollection, ExplainVerbosity,
    FindQuery, IndexSpec, UpdateOutcome,
};
use crate::models::{AuthorBookCount, GenreAveragePrice};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

type StepResult<T> = Result<T, DatabaseError>;

/// Named stage of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Connect,
    FindByAuthor,
    FindPublishedAfter,
    FindByGenre,
    UpdatePrice,
    DeleteByTitle,
    InStockPage,
    AveragePriceByGenre,
    TopAuthor,
    CreateIndexes,
    Explain,
}

impl Step {
    /// The ten collection steps, in the order they run
    pub const SEQUENCE: [Step; 10] = [
        Step::FindByAuthor,
        Step::FindPublishedAfter,
        Step::FindByGenre,
        Step::UpdatePrice,
        Step::DeleteByTitle,
        Step::InStockPage,
        Step::AveragePriceByGenre,
        Step::TopAuthor,
        Step::CreateIndexes,
        Step::Explain,
    ];

    /// 1-based position in the sequence; `Connect` is 0
    pub fn number(&self) -> usize {
        match self {
            Step::Connect => 0,
            other => Step::SEQUENCE
                .iter()
                .position(|step| step == other)
                .map_or(0, |index| index + 1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::FindByAuthor => "find_by_author",
            Step::FindPublishedAfter => "find_published_after",
            Step::FindByGenre => "find_by_genre",
            Step::UpdatePrice => "update_price",
            Step::DeleteByTitle => "delete_by_title",
            Step::InStockPage => "in_stock_page",
            Step::AveragePriceByGenre => "average_price_by_genre",
            Step::TopAuthor => "top_author",
            Step::CreateIndexes => "create_indexes",
            Step::Explain => "explain",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Explain output for the two diagnostic queries
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainOutput {
    /// Single-field query on `title`
    pub title_query: Document,
    /// Compound query on `author` and `published_year`
    pub compound_query: Document,
}

pub(crate) async fn find_by_author(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<Vec<Document>> {
    collection
        .find(FindQuery::new(doc! { "author": plan.author.as_str() }))
        .await
}

pub(crate) async fn find_published_after(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<Vec<Document>> {
    collection
        .find(FindQuery::new(
            doc! { "published_year": { "$gt": plan.published_after } },
        ))
        .await
}

pub(crate) async fn find_by_genre(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<Vec<Document>> {
    collection
        .find(FindQuery::new(doc! { "genre": plan.genre.as_str() }))
        .await
}

/// Set the price of the first book with the configured title
pub(crate) async fn update_price(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<UpdateOutcome> {
    collection
        .update_one(
            doc! { "title": plan.update_title.as_str() },
            doc! { "$set": { "price": plan.new_price } },
        )
        .await
}

pub(crate) async fn delete_by_title(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<DeleteOutcome> {
    collection
        .delete_one(doc! { "title": plan.delete_title.as_str() })
        .await
}

/// In-stock books after a year, cheapest first, one page
pub(crate) fn in_stock_query(plan: &QueryPlan) -> FindQuery {
    FindQuery::new(doc! {
        "in_stock": true,
        "published_year": { "$gt": plan.in_stock_published_after },
    })
    .projection(doc! { "title": 1, "author": 1, "price": 1, "_id": 0 })
    .sort(doc! { "price": 1 })
    .skip(plan.page_skip)
    .limit(plan.page_limit)
}

pub(crate) async fn in_stock_page(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<Vec<Document>> {
    collection.find(in_stock_query(plan)).await
}

pub(crate) fn average_price_pipeline() -> AggregationPipeline {
    AggregationPipeline::new()
        .group_stage(doc! { "_id": "$genre", "avgPrice": { "$avg": "$price" } })
}

pub(crate) async fn average_price_by_genre(
    collection: &dyn DocumentCollection,
) -> StepResult<Vec<GenreAveragePrice>> {
    let rows = collection
        .aggregate(average_price_pipeline().to_documents())
        .await?;
    Ok(rows.into_iter().map(GenreAveragePrice::from).collect())
}

pub(crate) fn top_author_pipeline() -> AggregationPipeline {
    AggregationPipeline::new()
        .group_stage(doc! { "_id": "$author", "count": { "$sum": 1 } })
        .sort_stage(doc! { "count": -1 })
        .limit_stage(1)
}

pub(crate) async fn top_author(
    collection: &dyn DocumentCollection,
) -> StepResult<Vec<AuthorBookCount>> {
    let rows = collection
        .aggregate(top_author_pipeline().to_documents())
        .await?;
    Ok(rows.into_iter().map(AuthorBookCount::from).collect())
}

pub(crate) fn index_specs() -> [IndexSpec; 2] {
    [
        IndexSpec::new(doc! { "title": 1 }),
        IndexSpec::new(doc! { "author": 1, "published_year": 1 }),
    ]
}

/// Create the title index and the author/year compound index
pub(crate) async fn create_indexes(
    collection: &dyn DocumentCollection,
) -> StepResult<Vec<String>> {
    let mut created = Vec::with_capacity(2);
    for spec in index_specs() {
        created.push(collection.create_index(spec).await?);
    }
    Ok(created)
}

pub(crate) async fn explain(
    collection: &dyn DocumentCollection,
    plan: &QueryPlan,
) -> StepResult<ExplainOutput> {
    let title_query = collection
        .explain(
            FindQuery::new(doc! { "title": plan.explain_title.as_str() }),
            ExplainVerbosity::ExecutionStats,
        )
        .await?;

    let compound_query = collection
        .explain(
            FindQuery::new(doc! {
                "author": plan.explain_author.as_str(),
                "published_year": plan.explain_year,
            }),
            ExplainVerbosity::ExecutionStats,
        )
        .await?;

    Ok(ExplainOutput {
        title_query,
        compound_query,
    })
}
