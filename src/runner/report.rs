//! Run results and console rendering

use super::steps::{ExplainOutput, Step};
use crate::config::QueryPlan;
use crate::database::{DeleteOutcome, UpdateOutcome};
use crate::error::{Error, Result};
use crate::models::{AuthorBookCount, GenreAveragePrice};
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

/// How the runner reacts to a failing step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop at the first failing step; later steps are not attempted
    #[default]
    AbortOnFirstFailure,
}

/// Named result per step. `None` means the step did not complete.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub connected: bool,
    pub by_author: Option<Vec<Document>>,
    pub published_after: Option<Vec<Document>>,
    pub by_genre: Option<Vec<Document>>,
    pub price_update: Option<UpdateOutcome>,
    pub deletion: Option<DeleteOutcome>,
    pub in_stock_page: Option<Vec<Document>>,
    pub average_price_by_genre: Option<Vec<GenreAveragePrice>>,
    pub top_author: Option<Vec<AuthorBookCount>>,
    pub indexes: Option<Vec<String>>,
    pub explain: Option<ExplainOutput>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            connected: false,
            by_author: None,
            published_after: None,
            by_genre: None,
            price_update: None,
            deletion: None,
            in_stock_page: None,
            average_price_by_genre: None,
            top_author: None,
            indexes: None,
            explain: None,
        }
    }

    /// Whether `step` produced a result
    pub fn has_result(&self, step: Step) -> bool {
        match step {
            Step::Connect => self.connected,
            Step::FindByAuthor => self.by_author.is_some(),
            Step::FindPublishedAfter => self.published_after.is_some(),
            Step::FindByGenre => self.by_genre.is_some(),
            Step::UpdatePrice => self.price_update.is_some(),
            Step::DeleteByTitle => self.deletion.is_some(),
            Step::InStockPage => self.in_stock_page.is_some(),
            Step::AveragePriceByGenre => self.average_price_by_genre.is_some(),
            Step::TopAuthor => self.top_author.is_some(),
            Step::CreateIndexes => self.indexes.is_some(),
            Step::Explain => self.explain.is_some(),
        }
    }

    /// Collection steps that completed, in sequence order
    pub fn completed_steps(&self) -> impl Iterator<Item = Step> + '_ {
        Step::SEQUENCE
            .into_iter()
            .filter(move |step| self.has_result(*step))
    }

    pub fn is_complete(&self) -> bool {
        self.completed_steps().count() == Step::SEQUENCE.len()
    }
}

/// A run that stopped at `step`
#[derive(Debug, thiserror::Error)]
#[error("step {step} failed: {source}")]
pub struct RunFailure {
    pub step: Step,
    pub source: Error,
    /// Results of the steps that ran before the failure
    pub report: Box<RunReport>,
}

fn field_text(document: &Document, key: &str) -> String {
    match document.get(key) {
        Some(Bson::String(value)) => value.clone(),
        Some(Bson::Int32(value)) => value.to_string(),
        Some(Bson::Int64(value)) => value.to_string(),
        Some(Bson::Double(value)) => value.to_string(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

/// Relaxed extended JSON, the same shape the shell prints
pub(crate) fn document_json(document: &Document) -> serde_json::Value {
    Bson::Document(document.clone()).into_relaxed_extjson()
}

pub(crate) fn write_line<W: Write>(out: &mut W, line: impl AsRef<str>) -> Result<()> {
    writeln!(out, "{}", line.as_ref()).map_err(Error::from)
}

pub(crate) fn print_books_by_author<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    books: &[Document],
) -> Result<()> {
    writeln!(out, "\nThese are the books written by {}:", plan.author)?;
    for book in books {
        writeln!(
            out,
            "- {} ({})",
            field_text(book, "title"),
            field_text(book, "published_year")
        )?;
    }
    Ok(())
}

pub(crate) fn print_books_published_after<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    books: &[Document],
) -> Result<()> {
    writeln!(out, "\nThese are the books published after {}:", plan.published_after)?;
    for book in books {
        writeln!(
            out,
            "- {} ({})",
            field_text(book, "title"),
            field_text(book, "published_year")
        )?;
    }
    Ok(())
}

pub(crate) fn print_books_by_genre<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    books: &[Document],
) -> Result<()> {
    writeln!(out, "\nThese are the books in the {} genre:", plan.genre)?;
    for book in books {
        writeln!(
            out,
            "- {} by {}",
            field_text(book, "title"),
            field_text(book, "author")
        )?;
    }
    Ok(())
}

pub(crate) fn print_price_update<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    outcome: &UpdateOutcome,
) -> Result<()> {
    if outcome.matched_count == 0 {
        writeln!(out, "\nNo book titled \"{}\" to update.", plan.update_title)?;
    } else {
        writeln!(out, "\nUpdated price for \"{}\".", plan.update_title)?;
    }
    Ok(())
}

pub(crate) fn print_deletion<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    outcome: &DeleteOutcome,
) -> Result<()> {
    if outcome.deleted_count == 0 {
        writeln!(out, "\nNo book titled \"{}\" to delete.", plan.delete_title)?;
    } else {
        writeln!(
            out,
            "\n\"{}\" has been deleted from the collection.",
            plan.delete_title
        )?;
    }
    Ok(())
}

pub(crate) fn print_in_stock_page<W: Write>(
    out: &mut W,
    plan: &QueryPlan,
    books: &[Document],
) -> Result<()> {
    writeln!(
        out,
        "\nIn-stock books published after {} (first {}, sorted by price):",
        plan.in_stock_published_after, plan.page_limit
    )?;
    for book in books {
        writeln!(out, "{}", document_json(book))?;
    }
    Ok(())
}

/// Group key as printed: strings bare, null as `(none)`, anything else as JSON
fn group_key_text(key: &Bson) -> String {
    match key {
        Bson::String(value) => value.clone(),
        Bson::Null => "(none)".to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

pub(crate) fn print_average_prices<W: Write>(
    out: &mut W,
    rows: &[GenreAveragePrice],
) -> Result<()> {
    writeln!(out, "\nAverage price by genre:")?;
    for row in rows {
        let genre = group_key_text(&row.genre);
        match (row.average(), &row.avg_price) {
            (Some(avg), _) => writeln!(out, "- {}: {:.2}", genre, avg)?,
            (None, Bson::Null) => writeln!(out, "- {}: n/a", genre)?,
            (None, other) => writeln!(
                out,
                "- {}: {}",
                genre,
                other.clone().into_relaxed_extjson()
            )?,
        }
    }
    Ok(())
}

pub(crate) fn print_top_author<W: Write>(out: &mut W, rows: &[AuthorBookCount]) -> Result<()> {
    writeln!(out, "\nAuthor with the most books:")?;
    for row in rows {
        writeln!(
            out,
            "- {} ({} books)",
            group_key_text(&row.author),
            row.count.clone().into_relaxed_extjson()
        )?;
    }
    Ok(())
}

pub(crate) fn print_indexes<W: Write>(out: &mut W, names: &[String]) -> Result<()> {
    writeln!(out)?;
    for name in names {
        writeln!(out, "Created index {}.", name)?;
    }
    Ok(())
}

pub(crate) fn print_explain<W: Write>(out: &mut W, explain: &ExplainOutput) -> Result<()> {
    writeln!(out, "\nExplain output for title search:")?;
    writeln!(
        out,
        "{}",
        serde_json::to_string_pretty(&document_json(&explain.title_query))?
    )?;
    writeln!(out, "\nExplain output for compound index search:")?;
    writeln!(
        out,
        "{}",
        serde_json::to_string_pretty(&document_json(&explain.compound_query))?
    )?;
    Ok(())
}
