//! Aggregation pipeline builder

use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

/// Aggregation pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationPipeline {
    /// Pipeline stages
    pub stages: Vec<AggregationStage>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationStage {
    /// $match - filter documents
    Match(Document),
    /// $group - group and accumulate
    Group(Document),
    /// $sort - order documents
    Sort(Document),
    /// $limit - cap the number of documents
    Limit(i64),
    /// $skip - drop leading documents
    Skip(i64),
    /// $project - reshape documents
    Project(Document),
    /// $count - replace the stream with a single count document
    Count(String),
}

impl AggregationStage {
    /// Stage as a server pipeline document
    pub fn to_document(&self) -> Document {
        match self {
            AggregationStage::Match(spec) => doc! { "$match": spec.clone() },
            AggregationStage::Group(spec) => doc! { "$group": spec.clone() },
            AggregationStage::Sort(spec) => doc! { "$sort": spec.clone() },
            AggregationStage::Limit(n) => doc! { "$limit": Bson::Int64(*n) },
            AggregationStage::Skip(n) => doc! { "$skip": Bson::Int64(*n) },
            AggregationStage::Project(spec) => doc! { "$project": spec.clone() },
            AggregationStage::Count(field) => doc! { "$count": field.clone() },
        }
    }
}

impl AggregationPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Add a match stage
    pub fn match_stage(mut self, filter: Document) -> Self {
        self.stages.push(AggregationStage::Match(filter));
        self
    }

    /// Add a group stage
    pub fn group_stage(mut self, group_spec: Document) -> Self {
        self.stages.push(AggregationStage::Group(group_spec));
        self
    }

    /// Add a sort stage
    pub fn sort_stage(mut self, sort_spec: Document) -> Self {
        self.stages.push(AggregationStage::Sort(sort_spec));
        self
    }

    /// Add a limit stage
    pub fn limit_stage(mut self, limit: i64) -> Self {
        self.stages.push(AggregationStage::Limit(limit));
        self
    }

    /// Add a skip stage
    pub fn skip_stage(mut self, skip: i64) -> Self {
        self.stages.push(AggregationStage::Skip(skip));
        self
    }

    /// Add a project stage
    pub fn project_stage(mut self, projection: Document) -> Self {
        self.stages.push(AggregationStage::Project(projection));
        self
    }

    /// Add a count stage
    pub fn count_stage(mut self, field: impl Into<String>) -> Self {
        self.stages.push(AggregationStage::Count(field.into()));
        self
    }

    /// Pipeline in the form the driver expects
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(AggregationStage::to_document).collect()
    }
}
