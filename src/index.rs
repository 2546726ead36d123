//! The embedding index: two similarity collections over schema fragments.
//!
//! Entries live in the local SQLite store under a *generation*. A rebuild
//! stages all entries under a fresh inactive generation, then swaps the
//! active pointer and drops every older generation in one transaction.
//! Retrieval only ever reads the active generation, so readers observe the
//! old index or the new one, never a half-built collection, and a failed
//! rebuild leaves the previously good index in place.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob, EmbeddingClient};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Collection, EntryMetadata, IndexedEntry, SchemaDocument};
use crate::progress::{RefreshProgressEvent, RefreshProgressReporter};

/// One completed rebuild, as recorded in the `generations` table.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
    pub id: String,
    pub schema_fingerprint: String,
    pub table_count: i64,
    pub column_count: i64,
    pub embedding_model: String,
    pub dims: i64,
    pub created_at: i64,
}

/// Counts reported after a successful rebuild.
#[derive(Debug, Clone)]
pub struct RebuildSummary {
    pub generation_id: String,
    pub table_entries: u64,
    pub column_entries: u64,
}

/// An entry planned from the schema document, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub collection: Collection,
    pub document_text: String,
    pub metadata: EntryMetadata,
    pub position: i64,
}

/// Flatten the schema document into the entries both collections will hold.
///
/// Tables iterate in sorted order and columns in declared order, so an
/// unchanged schema always plans the same sequence — refreshing twice yields
/// entries whose texts and metadata are identical (ids are fresh each time).
pub fn plan_entries(doc: &SchemaDocument) -> Vec<PlannedEntry> {
    let mut entries = Vec::with_capacity(doc.table_count() + doc.column_count());
    let mut table_pos = 0i64;
    let mut column_pos = 0i64;

    for (table_name, columns) in &doc.tables {
        entries.push(PlannedEntry {
            collection: Collection::Tables,
            document_text: table_name.clone(),
            metadata: EntryMetadata {
                table_name: table_name.clone(),
                column_name: None,
                data_type: None,
            },
            position: table_pos,
        });
        table_pos += 1;

        for column in columns {
            entries.push(PlannedEntry {
                collection: Collection::Columns,
                document_text: column.column_name.clone(),
                metadata: EntryMetadata {
                    table_name: table_name.clone(),
                    column_name: Some(column.column_name.clone()),
                    data_type: Some(column.data_type.clone()),
                },
                position: column_pos,
            });
            column_pos += 1;
        }
    }

    entries
}

/// Hash of the schema document contents. Identical schemas fingerprint
/// identically because table iteration is sorted.
pub fn fingerprint_schema(doc: &SchemaDocument) -> String {
    let canonical = serde_json::to_string(doc).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stage a full rebuild of both collections under a fresh inactive
/// generation.
///
/// On any embedding or store failure the staged rows are removed and the
/// previously active generation is untouched. Nothing becomes visible to
/// retrieval until [`activate_generation`] flips the pointer.
pub async fn stage_generation(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    doc: &SchemaDocument,
    batch_size: usize,
    progress: &dyn RefreshProgressReporter,
) -> PipelineResult<RebuildSummary> {
    let generation_id = Uuid::new_v4().to_string();
    let fingerprint = fingerprint_schema(doc);
    let now = chrono::Utc::now().timestamp();

    let planned = plan_entries(doc);
    let table_entries = planned
        .iter()
        .filter(|e| e.collection == Collection::Tables)
        .count() as u64;
    let column_entries = planned.len() as u64 - table_entries;

    sqlx::query(
        r#"
        INSERT INTO generations
            (id, schema_fingerprint, table_count, column_count, embedding_model, dims, created_at, active)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(&generation_id)
    .bind(&fingerprint)
    .bind(doc.table_count() as i64)
    .bind(doc.column_count() as i64)
    .bind(embedder.model_name())
    .bind(embedder.dims() as i64)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| PipelineError::IndexRebuild(e.to_string()))?;

    match stage_entries(pool, embedder, &generation_id, &planned, batch_size, progress).await {
        Ok(()) => {}
        Err(e) => {
            discard_generation(pool, &generation_id).await;
            return Err(PipelineError::IndexRebuild(e.to_string()));
        }
    }

    Ok(RebuildSummary {
        generation_id,
        table_entries,
        column_entries,
    })
}

/// Embed and insert all planned entries under the (inactive) generation.
async fn stage_entries(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingClient,
    generation_id: &str,
    planned: &[PlannedEntry],
    batch_size: usize,
    progress: &dyn RefreshProgressReporter,
) -> Result<()> {
    let total = planned.len() as u64;
    let mut done = 0u64;

    for batch in planned.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|e| e.document_text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        for (entry, vector) in batch.iter().zip(vectors.iter()) {
            let blob = vec_to_blob(vector);
            let metadata_json = serde_json::to_string(&entry.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO schema_entries
                    (id, generation_id, collection, document_text, metadata_json, embedding, position)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(generation_id)
            .bind(entry.collection.as_str())
            .bind(&entry.document_text)
            .bind(&metadata_json)
            .bind(&blob)
            .bind(entry.position)
            .execute(pool)
            .await?;
        }

        done += batch.len() as u64;
        progress.report(RefreshProgressEvent::Embedding { n: done, total });
    }

    Ok(())
}

/// Best-effort removal of a failed staging attempt. Staged rows are invisible
/// to retrieval either way; anything left behind is pruned by the next
/// successful activation.
pub async fn discard_generation(pool: &SqlitePool, generation_id: &str) {
    let _ = sqlx::query("DELETE FROM schema_entries WHERE generation_id = ?")
        .bind(generation_id)
        .execute(pool)
        .await;
    let _ = sqlx::query("DELETE FROM generations WHERE id = ?")
        .bind(generation_id)
        .execute(pool)
        .await;
}

/// Flip the active pointer to `generation_id` and drop everything older, in
/// one transaction.
pub async fn activate_generation(pool: &SqlitePool, generation_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE generations SET active = 1 WHERE id = ?")
        .bind(generation_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM schema_entries WHERE generation_id != ?")
        .bind(generation_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM generations WHERE id != ?")
        .bind(generation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// The generation retrieval reads, if any rebuild ever completed.
pub async fn active_generation(pool: &SqlitePool) -> Result<Option<GenerationInfo>> {
    let row = sqlx::query(
        "SELECT id, schema_fingerprint, table_count, column_count, embedding_model, dims, created_at
         FROM generations WHERE active = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| GenerationInfo {
        id: row.get("id"),
        schema_fingerprint: row.get("schema_fingerprint"),
        table_count: row.get("table_count"),
        column_count: row.get("column_count"),
        embedding_model: row.get("embedding_model"),
        dims: row.get("dims"),
        created_at: row.get("created_at"),
    }))
}

/// Load one collection of the given generation in insertion order, with
/// decoded vectors.
pub async fn load_collection(
    pool: &SqlitePool,
    generation_id: &str,
    collection: Collection,
) -> Result<Vec<(IndexedEntry, Vec<f32>)>> {
    let rows = sqlx::query(
        "SELECT id, document_text, metadata_json, embedding
         FROM schema_entries
         WHERE generation_id = ? AND collection = ?
         ORDER BY position ASC",
    )
    .bind(generation_id)
    .bind(collection.as_str())
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let metadata_json: String = row.get("metadata_json");
        let metadata: EntryMetadata = serde_json::from_str(&metadata_json)?;
        let blob: Vec<u8> = row.get("embedding");

        entries.push((
            IndexedEntry {
                id: row.get("id"),
                document_text: row.get("document_text"),
                metadata,
            },
            blob_to_vec(&blob),
        ));
    }

    Ok(entries)
}

/// Entry count for one collection of a generation (status output).
pub async fn count_entries(
    pool: &SqlitePool,
    generation_id: &str,
    collection: Collection,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM schema_entries WHERE generation_id = ? AND collection = ?",
    )
    .bind(generation_id)
    .bind(collection.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDescriptor;

    fn products_doc() -> SchemaDocument {
        let mut doc = SchemaDocument::default();
        doc.tables.insert(
            "products".to_string(),
            vec![
                ColumnDescriptor {
                    column_name: "product_id".to_string(),
                    data_type: "integer".to_string(),
                    column_description: String::new(),
                },
                ColumnDescriptor {
                    column_name: "product_name".to_string(),
                    data_type: "text".to_string(),
                    column_description: String::new(),
                },
                ColumnDescriptor {
                    column_name: "price".to_string(),
                    data_type: "numeric".to_string(),
                    column_description: String::new(),
                },
            ],
        );
        doc
    }

    #[test]
    fn test_plan_entries_one_per_table_and_column() {
        let planned = plan_entries(&products_doc());
        assert_eq!(planned.len(), 4);

        let tables: Vec<_> = planned
            .iter()
            .filter(|e| e.collection == Collection::Tables)
            .collect();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].document_text, "products");
        assert_eq!(tables[0].metadata.table_name, "products");
        assert!(tables[0].metadata.column_name.is_none());

        let columns: Vec<_> = planned
            .iter()
            .filter(|e| e.collection == Collection::Columns)
            .collect();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].document_text, "product_id");
        assert_eq!(columns[1].document_text, "product_name");
        assert_eq!(columns[2].document_text, "price");
        assert_eq!(columns[2].metadata.data_type.as_deref(), Some("numeric"));
    }

    #[test]
    fn test_plan_entries_positions_are_per_collection() {
        let mut doc = products_doc();
        doc.tables.insert(
            "orders".to_string(),
            vec![ColumnDescriptor {
                column_name: "order_id".to_string(),
                data_type: "integer".to_string(),
                column_description: String::new(),
            }],
        );

        let planned = plan_entries(&doc);
        let table_positions: Vec<i64> = planned
            .iter()
            .filter(|e| e.collection == Collection::Tables)
            .map(|e| e.position)
            .collect();
        let column_positions: Vec<i64> = planned
            .iter()
            .filter(|e| e.collection == Collection::Columns)
            .map(|e| e.position)
            .collect();

        assert_eq!(table_positions, vec![0, 1]);
        assert_eq!(column_positions, vec![0, 1, 2, 3]);
        // BTreeMap ordering: "orders" before "products".
        assert_eq!(planned[0].document_text, "orders");
    }

    #[test]
    fn test_fingerprint_stable_for_same_schema() {
        let a = fingerprint_schema(&products_doc());
        let b = fingerprint_schema(&products_doc());
        assert_eq!(a, b);

        let mut changed = products_doc();
        changed
            .tables
            .get_mut("products")
            .unwrap()
            .push(ColumnDescriptor {
                column_name: "sku".to_string(),
                data_type: "text".to_string(),
                column_description: String::new(),
            });
        assert_ne!(a, fingerprint_schema(&changed));
    }
}
