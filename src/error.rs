//! Pipeline error taxonomy.
//!
//! Every failure the pipeline can surface maps to one variant with a stable
//! machine-checkable kind string, used by the HTTP error body and by callers
//! that branch on failure class. The CLI layer wraps these in `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The schema introspection source was unreachable or returned malformed
    /// metadata. The previous schema document and index remain authoritative.
    #[error("schema introspection failed: {0}")]
    SchemaIntrospection(String),

    /// The embedding backend failed mid-rebuild. The staged generation is
    /// discarded; the previously active generation stays in place.
    #[error("index rebuild failed: {0}")]
    IndexRebuild(String),

    /// The generation service returned content that does not parse into the
    /// expected structured shape. Not retried: this indicates a prompt or
    /// schema mismatch, not a transient SQL bug.
    #[error("generation output did not match the expected structure: {0}")]
    SynthesisFormat(String),

    /// The target database rejected or failed the generated SQL. Feeds the
    /// bounded repair loop.
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    /// The repair loop hit its attempt cap. Carries the last database error.
    #[error("query could not be repaired after {attempts} attempts: {last_error}")]
    RepairExhausted { attempts: u32, last_error: String },

    /// Anything outside the named taxonomy (embedding outage at retrieval
    /// time, generation service unreachable, index store I/O).
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable kind identifier for structured error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SchemaIntrospection(_) => "schema_introspection_error",
            PipelineError::IndexRebuild(_) => "index_rebuild_error",
            PipelineError::SynthesisFormat(_) => "synthesis_format_error",
            PipelineError::QueryExecution(_) => "query_execution_error",
            PipelineError::RepairExhausted { .. } => "repair_exhausted",
            PipelineError::Internal(_) => "internal_error",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
