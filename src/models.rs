//! Core data models used throughout talkdb.
//!
//! These types represent the schema document, indexed entries, and the
//! per-request response that flow through the refresh and question pipelines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Description of one column as introspected from the target database.
///
/// `column_description` defaults to empty; it is a hook for manual annotation
/// of the persisted schema document, not populated automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub column_name: String,
    pub data_type: String,
    #[serde(default)]
    pub column_description: String,
}

/// The introspected schema: table name → columns, in declared order.
///
/// Rewritten wholesale on every refresh; the single source of truth for what
/// the embedding index was built from. A `BTreeMap` keeps table iteration
/// order deterministic so repeated refreshes of an unchanged schema produce
/// identical entry sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(flatten)]
    pub tables: BTreeMap<String, Vec<ColumnDescriptor>>,
}

impl SchemaDocument {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn column_count(&self) -> usize {
        self.tables.values().map(|cols| cols.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Which of the two similarity collections an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Tables,
    Columns,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tables => "tables",
            Collection::Columns => "columns",
        }
    }
}

/// One indexed schema fragment: a table name or a column name, its vector,
/// and enough metadata to reconstruct the grounding context.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub id: String,
    pub document_text: String,
    pub metadata: EntryMetadata,
}

/// Metadata carried by an indexed entry. Table entries only fill
/// `table_name`; column entries also carry the column name and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// One retrieval hit: an indexed entry plus its distance from the question
/// (1 − cosine similarity, ascending = nearer).
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexedEntry,
    pub distance: f64,
}

/// SQL plus explanation as returned by one synthesis call. Replaced, never
/// mutated, on each repair retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub generated_sql_query: String,
    #[serde(default)]
    pub explanation: String,
}

/// A fully materialized execution result: headers plus row tuples, values
/// rendered as JSON for transport. Never partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bare text form of one cell: strings unquoted, everything else in its
    /// JSON shape. Shared by terminal output and prompt assembly.
    pub fn cell_text(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Token usage accumulated across the generation calls of one request
/// (synthesis, repairs, insights). Zeros when the service omits usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageStats {
    pub fn add(&mut self, other: UsageStats) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// The response assembled over one question's pipeline run. Owned by the
/// request; stages fill it in as they complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationResponse {
    pub user_question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<String>,
    pub usage: UsageStats,
}

impl ApplicationResponse {
    pub fn new(question: &str) -> Self {
        Self {
            user_question: question.to_string(),
            ..Default::default()
        }
    }
}
