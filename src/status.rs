//! Index status overview.
//!
//! A quick summary of what's indexed: the persisted schema document, the
//! active generation and its entry counts. Used by `tdb status` to confirm
//! a refresh landed before questions start flowing.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::index;
use crate::models::Collection;
use crate::schema_store;

/// Run the status command: inspect the index store and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let db_size = std::fs::metadata(&config.index.db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("talkdb — Index Status");
    println!("=====================");
    println!();
    println!("  Index store: {}", config.index.db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Target:      {} (namespace {})",
        config.target.dialect(),
        config.target.namespace
    );
    println!();

    match schema_store::load_document(&config.index.schema_doc_path)? {
        Some(doc) => {
            println!(
                "  Schema document: {}",
                config.index.schema_doc_path.display()
            );
            println!("    Tables:        {}", doc.table_count());
            println!("    Columns:       {}", doc.column_count());
        }
        None => {
            println!("  Schema document: none (run `tdb refresh`)");
        }
    }
    println!();

    if !config.index.db_path.exists() {
        println!("  Index: none (run `tdb refresh`)");
        println!();
        return Ok(());
    }

    let pool = db::open(config).await?;
    match index::active_generation(&pool).await? {
        Some(generation) => {
            let table_entries =
                index::count_entries(&pool, &generation.id, Collection::Tables).await?;
            let column_entries =
                index::count_entries(&pool, &generation.id, Collection::Columns).await?;

            println!("  Active generation: {}", generation.id);
            println!(
                "    Built:          {}",
                format_ts_relative(generation.created_at)
            );
            println!(
                "    Model:          {} ({} dims)",
                generation.embedding_model, generation.dims
            );
            println!("    Table entries:  {}", table_entries);
            println!("    Column entries: {}", column_entries);
            println!(
                "    Fingerprint:    {}",
                short_fingerprint(&generation.schema_fingerprint)
            );
        }
        None => {
            println!("  Index: empty (run `tdb refresh`)");
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

fn short_fingerprint(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
