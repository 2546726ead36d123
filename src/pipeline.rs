//! The question-to-answer pipeline.
//!
//! One [`QueryPipeline::run`] call owns everything a single question needs:
//! retrieve grounding context from the active index, synthesize SQL, execute
//! it against the target, repair on failure up to the attempt cap, and
//! optionally summarize the rows. Stage transitions stream through a
//! [`QueryProgress`] so the CLI can narrate and the server can forward them
//! as events; the same seam carries cooperative cancellation back in.
//!
//! Requests share nothing: each run builds its own response and opens its
//! own target connections, so concurrent questions cannot observe each
//! other's state.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{PipelineError, PipelineResult};
use crate::execute::execute_query;
use crate::generation::{self, GenerationClient};
use crate::insights::generate_insights;
use crate::models::{ApplicationResponse, QuerySpec, ResultTable, ScoredEntry};
use crate::retrieve::{retrieve_columns, retrieve_tables};
use crate::synthesize::{generate_query, repair_query};

/// Hard cap on executions per question: the first attempt plus two repairs.
/// The third consecutive failure ends the request.
pub const MAX_EXECUTION_ATTEMPTS: u32 = 3;

/// Where a running request currently is. Serialized form is the wire status
/// of streamed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieving,
    GeneratingSql,
    Executing,
    Repairing,
    Summarizing,
    Completed,
    Error,
}

/// One streamed pipeline event: the stage just entered plus the response as
/// filled in so far.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineUpdate {
    pub status: Stage,
    pub response: ApplicationResponse,
}

/// Observer for a running request. `update` fires as each stage begins and
/// once more on completion; `is_cancelled` is polled before every stage and
/// every repair so an abandoned request stops burning tokens.
pub trait QueryProgress: Send + Sync {
    fn update(&self, status: Stage, response: &ApplicationResponse);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// No observer. Used by JSON output and tests.
pub struct SilentQueryProgress;

impl QueryProgress for SilentQueryProgress {
    fn update(&self, _status: Stage, _response: &ApplicationResponse) {}
}

/// Narrates stage transitions on stderr, keeping stdout clean for the
/// answer itself.
pub struct StderrQueryProgress;

impl QueryProgress for StderrQueryProgress {
    fn update(&self, status: Stage, _response: &ApplicationResponse) {
        let label = match status {
            Stage::Retrieving => "retrieving schema context",
            Stage::GeneratingSql => "generating sql",
            Stage::Executing => "executing query",
            Stage::Repairing => "repairing query",
            Stage::Summarizing => "summarizing results",
            Stage::Completed | Stage::Error => return,
        };
        eprintln!("ask  {}", label);
    }
}

/// Everything a run borrows: configuration, the index store, and the two
/// service clients. Construct one per request scope.
pub struct QueryPipeline<'a> {
    pub config: &'a Config,
    pub pool: &'a SqlitePool,
    pub embedder: &'a dyn EmbeddingClient,
    pub generator: &'a dyn GenerationClient,
}

impl QueryPipeline<'_> {
    /// Answer one question end to end.
    ///
    /// Retrieval misses are not errors: with no usable grounding the
    /// generator still sees the question, and its reply explains what it
    /// could not do. Insight failures are swallowed with a warning; every
    /// other stage failure ends the run with the matching
    /// [`PipelineError`].
    pub async fn run(
        &self,
        question: &str,
        with_insights: bool,
        progress: &dyn QueryProgress,
    ) -> PipelineResult<ApplicationResponse> {
        let mut response = ApplicationResponse::new(question);

        ensure_live(progress)?;
        progress.update(Stage::Retrieving, &response);
        let tables = retrieve_tables(
            self.pool,
            self.embedder,
            question,
            self.config.retrieval.table_k,
        )
        .await?;
        let columns = retrieve_columns(
            self.pool,
            self.embedder,
            question,
            self.config.retrieval.column_k,
        )
        .await?;

        ensure_live(progress)?;
        progress.update(Stage::GeneratingSql, &response);
        let dialect = self.config.target.dialect();
        let (spec, usage) = generate_query(
            self.generator,
            &self.config.generation,
            question,
            &tables,
            &columns,
            dialect,
        )
        .await?;
        response.usage.add(usage);
        self.record_query(&mut response, &spec);

        let result = self
            .execution_loop(question, &tables, &columns, dialect, spec, &mut response, progress)
            .await?;
        response.result = Some(result.clone());

        if with_insights && self.config.insights.enabled {
            ensure_live(progress)?;
            progress.update(Stage::Summarizing, &response);
            match generate_insights(self.generator, &self.config.insights, question, &result).await
            {
                Ok((text, usage)) => {
                    response.usage.add(usage);
                    response.insights = Some(text);
                }
                Err(e) => {
                    eprintln!("Warning: insight generation failed: {}", e);
                }
            }
        }

        progress.update(Stage::Completed, &response);
        Ok(response)
    }

    /// Execute, and on a database error ask the generator for a corrected
    /// query carrying the failed SQL and the error text. At most
    /// [`MAX_EXECUTION_ATTEMPTS`] executions run; the final failure maps to
    /// [`PipelineError::RepairExhausted`] with the last error verbatim.
    async fn execution_loop(
        &self,
        question: &str,
        tables: &[ScoredEntry],
        columns: &[ScoredEntry],
        dialect: &str,
        mut current: QuerySpec,
        response: &mut ApplicationResponse,
        progress: &dyn QueryProgress,
    ) -> PipelineResult<ResultTable> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            ensure_live(progress)?;
            progress.update(Stage::Executing, response);

            let message = match execute_query(&self.config.target, &current.generated_sql_query)
                .await
            {
                Ok(table) => return Ok(table),
                Err(PipelineError::QueryExecution(message)) => message,
                Err(other) => return Err(other),
            };

            if attempts >= MAX_EXECUTION_ATTEMPTS {
                return Err(PipelineError::RepairExhausted {
                    attempts,
                    last_error: message,
                });
            }

            ensure_live(progress)?;
            progress.update(Stage::Repairing, response);
            let (repaired, usage) = repair_query(
                self.generator,
                &self.config.generation,
                question,
                tables,
                columns,
                dialect,
                &current.generated_sql_query,
                &message,
            )
            .await?;
            response.usage.add(usage);
            self.record_query(response, &repaired);
            current = repaired;
        }
    }

    /// The response always carries the latest SQL, so a failed run still
    /// shows what was tried.
    fn record_query(&self, response: &mut ApplicationResponse, spec: &QuerySpec) {
        response.generated_sql_query = Some(spec.generated_sql_query.clone());
        response.explanation =
            (!spec.explanation.trim().is_empty()).then(|| spec.explanation.clone());
    }
}

fn ensure_live(progress: &dyn QueryProgress) -> PipelineResult<()> {
    if progress.is_cancelled() {
        return Err(PipelineError::Internal(anyhow::anyhow!(
            "request abandoned: client disconnected"
        )));
    }
    Ok(())
}

/// CLI entry point for `tdb ask`.
pub async fn run_ask(
    config: &Config,
    question: &str,
    with_insights: bool,
    json_output: bool,
) -> Result<()> {
    let embedder = embedding::create_client(&config.embedding)?;
    let generator = generation::create_client(&config.generation)?;
    let pool = db::open(config).await?;

    let pipeline = QueryPipeline {
        config,
        pool: &pool,
        embedder: embedder.as_ref(),
        generator: generator.as_ref(),
    };
    let progress: &dyn QueryProgress = if json_output {
        &SilentQueryProgress
    } else {
        &StderrQueryProgress
    };

    let outcome = pipeline.run(question, with_insights, progress).await;
    pool.close().await;

    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.kind(), e);
            std::process::exit(1);
        }
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &ApplicationResponse) {
    if let Some(ref sql) = response.generated_sql_query {
        println!("--- SQL ---");
        println!("{}", sql);
        println!();
    }

    if let Some(ref explanation) = response.explanation {
        println!("--- Explanation ---");
        println!("{}", explanation);
        println!();
    }

    if let Some(ref result) = response.result {
        println!("--- Result ({} rows) ---", result.rows.len());
        if result.is_empty() {
            println!("(no rows)");
        } else {
            println!("{}", result.headers.join(" | "));
            for row in &result.rows {
                let cells: Vec<String> = row.iter().map(ResultTable::cell_text).collect();
                println!("{}", cells.join(" | "));
            }
        }
        println!();
    }

    if let Some(ref insights) = response.insights {
        println!("--- Insights ---");
        println!("{}", insights);
        println!();
    }

    println!(
        "usage: {} tokens (prompt {}, completion {})",
        response.usage.total_tokens, response.usage.prompt_tokens, response.usage.completion_tokens
    );
}
