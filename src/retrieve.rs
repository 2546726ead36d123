//! Nearest-neighbor retrieval of schema fragments for a question.
//!
//! The question is cleaned, embedded once per collection lookup, and compared
//! against every entry of the active generation in Rust. Distance is
//! 1 − cosine similarity; results are sorted ascending with ties broken by
//! insertion order (the sort is stable and candidates load in position
//! order), so an unchanged index always returns identically ordered results.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, cosine_similarity, EmbeddingClient};
use crate::error::PipelineResult;
use crate::index;
use crate::models::{Collection, IndexedEntry, ScoredEntry};

/// Strip punctuation that tends to leak from chat phrasing into the
/// embedding: quotes, question marks, exclamation marks.
pub fn clean_question(question: &str) -> String {
    question
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '?' | '!'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Score candidates against the query vector and keep the k nearest.
///
/// Candidates must arrive in insertion order; the stable sort then preserves
/// that order among equal distances.
fn rank_entries(
    candidates: Vec<(IndexedEntry, Vec<f32>)>,
    query_vec: &[f32],
    k: usize,
) -> Vec<ScoredEntry> {
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .map(|(entry, vector)| ScoredEntry {
            distance: 1.0 - cosine_similarity(query_vec, &vector) as f64,
            entry,
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

/// Top-k entries of one collection for a question.
///
/// An index that has never been built yields an empty result, not an error.
pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    question: &str,
    collection: Collection,
    k: usize,
) -> PipelineResult<Vec<ScoredEntry>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let generation = match index::active_generation(pool).await? {
        Some(generation) => generation,
        None => return Ok(Vec::new()),
    };

    let cleaned = clean_question(question);
    let query_vec = embedder.embed(&cleaned).await?;
    let candidates = index::load_collection(pool, &generation.id, collection).await?;

    Ok(rank_entries(candidates, &query_vec, k))
}

/// Nearest tables for a question (default k = 3).
pub async fn retrieve_tables(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    question: &str,
    k: usize,
) -> PipelineResult<Vec<ScoredEntry>> {
    retrieve(pool, embedder, question, Collection::Tables, k).await
}

/// Nearest columns for a question (default k = 5).
pub async fn retrieve_columns(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    question: &str,
    k: usize,
) -> PipelineResult<Vec<ScoredEntry>> {
    retrieve(pool, embedder, question, Collection::Columns, k).await
}

/// CLI entry point for `tdb search` — retrieval only, for inspecting what
/// grounding context a question would get.
pub async fn run_search(
    config: &Config,
    question: &str,
    tables_only: bool,
    columns_only: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder = embedding::create_client(&config.embedding)?;
    let pool = db::open(config).await?;

    if index::active_generation(&pool).await?.is_none() {
        println!("No index found. Run `tdb refresh` first.");
        pool.close().await;
        return Ok(());
    }

    if !columns_only {
        let tables = retrieve_tables(
            &pool,
            embedder.as_ref(),
            question,
            config.retrieval.table_k,
        )
        .await?;
        println!("tables ({})", tables.len());
        for (i, scored) in tables.iter().enumerate() {
            println!(
                "  {}. [{:.4}] {}",
                i + 1,
                scored.distance,
                scored.entry.document_text
            );
        }
    }

    if !tables_only {
        let columns = retrieve_columns(
            &pool,
            embedder.as_ref(),
            question,
            config.retrieval.column_k,
        )
        .await?;
        println!("columns ({})", columns.len());
        for (i, scored) in columns.iter().enumerate() {
            let table = &scored.entry.metadata.table_name;
            let data_type = scored.entry.metadata.data_type.as_deref().unwrap_or("?");
            println!(
                "  {}. [{:.4}] {}  ({}, {})",
                i + 1,
                scored.distance,
                scored.entry.document_text,
                table,
                data_type
            );
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;

    fn entry(id: &str, text: &str) -> IndexedEntry {
        IndexedEntry {
            id: id.to_string(),
            document_text: text.to_string(),
            metadata: EntryMetadata {
                table_name: text.to_string(),
                column_name: None,
                data_type: None,
            },
        }
    }

    #[test]
    fn test_clean_question_strips_punctuation() {
        assert_eq!(
            clean_question("List all \"product\" names, please?!"),
            "List all product names, please"
        );
        assert_eq!(clean_question("what's the total?"), "whats the total");
        assert_eq!(clean_question("   plain   "), "plain");
    }

    #[test]
    fn test_rank_orders_by_distance_ascending() {
        let candidates = vec![
            (entry("a", "far"), vec![0.0, 1.0]),
            (entry("b", "near"), vec![1.0, 0.0]),
            (entry("c", "mid"), vec![1.0, 1.0]),
        ];
        let ranked = rank_entries(candidates, &[1.0, 0.0], 3);
        let order: Vec<&str> = ranked
            .iter()
            .map(|s| s.entry.document_text.as_str())
            .collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
        assert!(ranked[0].distance < ranked[1].distance);
        assert!(ranked[1].distance < ranked[2].distance);
    }

    #[test]
    fn test_rank_never_exceeds_k() {
        let candidates: Vec<(IndexedEntry, Vec<f32>)> = (0..10)
            .map(|i| (entry(&format!("e{}", i), "t"), vec![1.0, 0.0]))
            .collect();
        assert_eq!(rank_entries(candidates.clone(), &[1.0, 0.0], 4).len(), 4);
        assert_eq!(rank_entries(candidates.clone(), &[1.0, 0.0], 0).len(), 0);
        assert_eq!(rank_entries(candidates, &[1.0, 0.0], 100).len(), 10);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order() {
        // All candidates equidistant from the query: order must match input.
        let candidates = vec![
            (entry("first", "t1"), vec![1.0, 0.0]),
            (entry("second", "t2"), vec![1.0, 0.0]),
            (entry("third", "t3"), vec![1.0, 0.0]),
        ];
        let ranked = rank_entries(candidates, &[1.0, 0.0], 3);
        let order: Vec<&str> = ranked.iter().map(|s| s.entry.id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rank_empty_input_is_empty() {
        assert!(rank_entries(Vec::new(), &[1.0, 0.0], 5).is_empty());
    }
}
