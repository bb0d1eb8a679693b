//! Query runner
//!
//! Opens one connection, runs the fixed step sequence against the configured
//! collection, prints each result and releases the connection on every exit
//! path.

pub mod report;
pub mod steps;

pub use report::{FailurePolicy, RunFailure, RunReport};
pub use steps::{ExplainOutput, Step};

use crate::config::RunnerConfig;
use crate::database::{DatabaseEngine, DocumentCollection};
use crate::error::{Error, Result};
use chrono::Utc;
use std::future::Future;
use std::io::Write;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Error raised inside the step sequence, tagged with where it happened
struct StepFailure {
    step: Step,
    source: Error,
}

async fn timed<T, F>(step: Step, operation: F) -> std::result::Result<T, StepFailure>
where
    F: Future<Output = Result<T>>,
{
    debug!(step = %step, number = step.number(), "step started");
    let started = Instant::now();

    match operation.await {
        Ok(value) => {
            info!(
                step = %step,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "step completed"
            );
            Ok(value)
        }
        Err(source) => Err(StepFailure { step, source }),
    }
}

/// Sequential runner over one collection
pub struct QueryRunner<E: DatabaseEngine> {
    config: RunnerConfig,
    engine: E,
    policy: FailurePolicy,
}

impl<E: DatabaseEngine> QueryRunner<E> {
    pub fn new(config: RunnerConfig, engine: E) -> Self {
        Self {
            config,
            engine,
            policy: FailurePolicy::default(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run every step, writing the report to `out`
    ///
    /// The first failing step aborts the rest. The connection is closed
    /// whether the sequence succeeded or not, and "Disconnected" is printed
    /// even when the connection was never established.
    pub async fn run<W: Write>(&self, out: &mut W) -> std::result::Result<RunReport, RunFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "query_run",
            %run_id,
            namespace = %self.config.namespace(),
            engine = %self.engine.engine_type(),
        );

        async move {
            let mut report = RunReport::new(run_id);
            info!("query run started");

            let outcome = self.with_connection(&mut report, out).await;

            if let Err(err) = report::write_line(out, "Disconnected from MongoDB") {
                warn!(error = %err, "failed to write disconnect line");
            }
            report.finished_at = Some(Utc::now());

            match outcome {
                Ok(()) => {
                    info!("query run finished");
                    Ok(report)
                }
                Err(failure) => {
                    let StepFailure { step, source } = failure;
                    match self.policy {
                        FailurePolicy::AbortOnFirstFailure => {
                            error!(step = %step, error = %source, "Error running queries");
                        }
                    }
                    Err(RunFailure {
                        step,
                        source,
                        report: Box::new(report),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Acquire the connection, run the sequence, always release
    async fn with_connection<W: Write>(
        &self,
        report: &mut RunReport,
        out: &mut W,
    ) -> std::result::Result<(), StepFailure> {
        let collection = match self.engine.connect(&self.config).await {
            Ok(collection) => collection,
            Err(err) => {
                return Err(StepFailure {
                    step: Step::Connect,
                    source: err.into(),
                })
            }
        };
        report.connected = true;

        let outcome = self.run_steps(collection.as_ref(), report, out).await;

        if let Err(err) = collection.close().await {
            warn!(error = %err, "failed to close connection");
        }
        outcome
    }

    async fn run_steps<W: Write>(
        &self,
        collection: &dyn DocumentCollection,
        report: &mut RunReport,
        out: &mut W,
    ) -> std::result::Result<(), StepFailure> {
        let plan = &self.config.plan;

        timed(Step::Connect, async {
            report::write_line(out, "Connected to MongoDB")
        })
        .await?;

        let books = timed(Step::FindByAuthor, async {
            let books = steps::find_by_author(collection, plan).await?;
            report::print_books_by_author(out, plan, &books)?;
            Ok::<_, Error>(books)
        })
        .await?;
        report.by_author = Some(books);

        let books = timed(Step::FindPublishedAfter, async {
            let books = steps::find_published_after(collection, plan).await?;
            report::print_books_published_after(out, plan, &books)?;
            Ok::<_, Error>(books)
        })
        .await?;
        report.published_after = Some(books);

        let books = timed(Step::FindByGenre, async {
            let books = steps::find_by_genre(collection, plan).await?;
            report::print_books_by_genre(out, plan, &books)?;
            Ok::<_, Error>(books)
        })
        .await?;
        report.by_genre = Some(books);

        let updated = timed(Step::UpdatePrice, async {
            let outcome = steps::update_price(collection, plan).await?;
            report::print_price_update(out, plan, &outcome)?;
            Ok::<_, Error>(outcome)
        })
        .await?;
        report.price_update = Some(updated);

        let deleted = timed(Step::DeleteByTitle, async {
            let outcome = steps::delete_by_title(collection, plan).await?;
            report::print_deletion(out, plan, &outcome)?;
            Ok::<_, Error>(outcome)
        })
        .await?;
        report.deletion = Some(deleted);

        let page = timed(Step::InStockPage, async {
            let page = steps::in_stock_page(collection, plan).await?;
            report::print_in_stock_page(out, plan, &page)?;
            Ok::<_, Error>(page)
        })
        .await?;
        report.in_stock_page = Some(page);

        let averages = timed(Step::AveragePriceByGenre, async {
            let rows = steps::average_price_by_genre(collection).await?;
            report::print_average_prices(out, &rows)?;
            Ok::<_, Error>(rows)
        })
        .await?;
        report.average_price_by_genre = Some(averages);

        let top = timed(Step::TopAuthor, async {
            let rows = steps::top_author(collection).await?;
            report::print_top_author(out, &rows)?;
            Ok::<_, Error>(rows)
        })
        .await?;
        report.top_author = Some(top);

        let indexes = timed(Step::CreateIndexes, async {
            let names = steps::create_indexes(collection).await?;
            report::print_indexes(out, &names)?;
            Ok::<_, Error>(names)
        })
        .await?;
        report.indexes = Some(indexes);

        let explained = timed(Step::Explain, async {
            let explained = steps::explain(collection, plan).await?;
            report::print_explain(out, &explained)?;
            Ok::<_, Error>(explained)
        })
        .await?;
        report.explain = Some(explained);

        Ok(())
    }
}
