//! Schema document persistence and the refresh operation.
//!
//! Refresh flow: introspect the target → assemble the document in memory →
//! stage a new index generation → persist the document (temp file + atomic
//! rename) → flip the active generation. A failure at any point before the
//! flip leaves both the previous document and the previous index
//! authoritative; there is no delete-then-rebuild window.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{PipelineError, PipelineResult};
use crate::index;
use crate::introspect::{self, DatabaseSchemaSource, SchemaSource};
use crate::models::SchemaDocument;
use crate::progress::{ProgressMode, RefreshProgressEvent, RefreshProgressReporter};

/// What one successful refresh produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshOutcome {
    pub tables: usize,
    pub columns: usize,
    pub table_entries: u64,
    pub column_entries: u64,
    pub generation_id: String,
}

/// Load the persisted schema document, if a refresh ever completed.
pub fn load_document(path: &Path) -> Result<Option<SchemaDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema document: {}", path.display()))?;
    let doc: SchemaDocument = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse schema document: {}", path.display()))?;
    Ok(Some(doc))
}

/// Write the schema document wholesale: temp file in the same directory,
/// then rename over the old one.
fn persist_document(path: &Path, doc: &SchemaDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(doc)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write schema document: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace schema document: {}", path.display()))?;
    Ok(())
}

/// Core refresh: introspect, stage, persist, activate.
///
/// Takes the source and embedder as seams so the whole operation runs
/// against in-memory fakes in tests.
pub async fn refresh_schema(
    pool: &SqlitePool,
    source: &dyn SchemaSource,
    embedder: &dyn EmbeddingClient,
    doc_path: &Path,
    batch_size: usize,
    progress: &dyn RefreshProgressReporter,
) -> PipelineResult<RefreshOutcome> {
    progress.report(RefreshProgressEvent::Introspecting);
    let doc = introspect::introspect_schema(source).await?;

    let staged = index::stage_generation(pool, embedder, &doc, batch_size, progress).await?;

    if let Err(e) = persist_document(doc_path, &doc) {
        index::discard_generation(pool, &staged.generation_id).await;
        return Err(PipelineError::Internal(e));
    }

    index::activate_generation(pool, &staged.generation_id)
        .await
        .map_err(|e| PipelineError::IndexRebuild(e.to_string()))?;

    Ok(RefreshOutcome {
        tables: doc.table_count(),
        columns: doc.column_count(),
        table_entries: staged.table_entries,
        column_entries: staged.column_entries,
        generation_id: staged.generation_id,
    })
}

/// CLI entry point for `tdb refresh`.
pub async fn run_refresh(config: &Config, progress_mode: ProgressMode) -> Result<()> {
    let embedder = embedding::create_client(&config.embedding)?;
    let source = DatabaseSchemaSource::new(&config.target);
    let pool = db::open(config).await?;
    let reporter = progress_mode.reporter();

    let outcome = refresh_schema(
        &pool,
        &source,
        embedder.as_ref(),
        &config.index.schema_doc_path,
        config.embedding.batch_size,
        reporter.as_ref(),
    )
    .await;

    pool.close().await;

    match outcome {
        Ok(outcome) => {
            println!("refresh");
            println!("  tables: {}", outcome.tables);
            println!("  columns: {}", outcome.columns);
            println!(
                "  index entries: {} ({} tables, {} columns)",
                outcome.table_entries + outcome.column_entries,
                outcome.table_entries,
                outcome.column_entries
            );
            println!("ok");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error [{}]: {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}
