use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index-store tables if they do not exist. Runs at every connect
/// from the commands that write or read the index.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per completed index rebuild. Exactly one row has active = 1;
    // retrieval only ever reads the active generation, so a rebuild in
    // progress (rows staged under an inactive generation) is invisible.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            schema_fingerprint TEXT NOT NULL,
            table_count INTEGER NOT NULL,
            column_count INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexed schema fragments. `collection` is 'tables' or 'columns';
    // `position` preserves insertion order for stable tie-breaking.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_entries (
            id TEXT PRIMARY KEY,
            generation_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            document_text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            position INTEGER NOT NULL,
            FOREIGN KEY (generation_id) REFERENCES generations(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_generation_collection
         ON schema_entries(generation_id, collection, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
