//! Query synthesis: grounded prompt assembly and strict structured parsing.
//!
//! The prompt carries the question, the retrieved table names, the retrieved
//! column/table/type triples, and the target dialect. The reply must be a
//! single JSON object with `generated_sql_query` and `explanation`; anything
//! that does not parse into that shape is a `SynthesisFormatError`. Model
//! output is never evaluated, only parsed.

use crate::config::GenerationConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::generation::GenerationClient;
use crate::models::{QuerySpec, ScoredEntry, UsageStats};

/// Assemble the synthesis prompt from the question and retrieved fragments.
pub fn build_prompt(
    question: &str,
    tables: &[ScoredEntry],
    columns: &[ScoredEntry],
    dialect: &str,
    dialect_hints: bool,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are an expert SQL query generator. Translate the user's question into an accurate, \
         efficient {dialect}-compatible SQL query.\n\n"
    ));

    prompt.push_str("User question:\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\n");

    prompt.push_str("Candidate tables (nearest first):\n");
    if tables.is_empty() {
        prompt.push_str("(none)\n");
    }
    for scored in tables {
        prompt.push_str(&format!("- {}\n", scored.entry.document_text));
    }
    prompt.push('\n');

    prompt.push_str("Candidate columns (nearest first):\n");
    if columns.is_empty() {
        prompt.push_str("(none)\n");
    }
    for scored in columns {
        let table = &scored.entry.metadata.table_name;
        let data_type = scored.entry.metadata.data_type.as_deref().unwrap_or("unknown");
        prompt.push_str(&format!(
            "- {} (table: {}, type: {})\n",
            scored.entry.document_text, table, data_type
        ));
    }
    prompt.push('\n');

    prompt.push_str("Instructions:\n");
    prompt.push_str(&format!(
        "- Compatibility: all syntax, functions, and data types must be valid {dialect}.\n"
    ));
    prompt.push_str("- Clarity: generate a clear, well-formatted SQL query.\n");
    prompt.push_str(
        "- Accuracy: the query must answer the question using only the tables and columns above.\n",
    );
    prompt.push_str(
        "- If the question cannot be answered with the provided schema, explain why in the \
         explanation and still return your best query.\n",
    );
    if dialect_hints {
        prompt.push_str(&format!(
            "- Common operations: SELECT, WHERE, JOIN (INNER, LEFT, RIGHT, FULL), GROUP BY, \
             ORDER BY, LIMIT, OFFSET, aggregates (COUNT, SUM, AVG, MIN, MAX), subqueries, and \
             {dialect} functions such as DATE_TRUNC, EXTRACT, COALESCE.\n"
        ));
    }
    prompt.push('\n');

    prompt.push_str(
        "Respond with a single JSON object of the form \
         {\"generated_sql_query\": \"...\", \"explanation\": \"...\"}.\n",
    );

    prompt
}

/// Assemble the repair prompt: the synthesis prompt plus the failed SQL and
/// the database error as additional grounding.
pub fn build_repair_prompt(
    question: &str,
    tables: &[ScoredEntry],
    columns: &[ScoredEntry],
    dialect: &str,
    dialect_hints: bool,
    failed_sql: &str,
    error_message: &str,
) -> String {
    let mut prompt = build_prompt(question, tables, columns, dialect, dialect_hints);

    prompt.push_str("\nA previous attempt at this question failed.\n\n");
    prompt.push_str("Failed SQL:\n");
    prompt.push_str(failed_sql.trim());
    prompt.push_str("\n\nDatabase error:\n");
    prompt.push_str(error_message.trim());
    prompt.push_str(
        "\n\nReturn a corrected query that avoids this error, in the same JSON shape.\n",
    );

    prompt
}

/// Strip a single leading/trailing markdown code fence, if present.
///
/// Models in JSON mode occasionally wrap the object in ```json fences; that
/// much is tolerated. Everything else must parse as-is.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence's language tag line, then the closing fence.
    let body = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => return trimmed,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse generation output into a [`QuerySpec`], failing closed.
pub fn parse_query_spec(content: &str) -> PipelineResult<QuerySpec> {
    let cleaned = strip_code_fence(content);

    let spec: QuerySpec = serde_json::from_str(cleaned).map_err(|e| {
        PipelineError::SynthesisFormat(format!("not a valid query object: {}", e))
    })?;

    if spec.generated_sql_query.trim().is_empty() {
        return Err(PipelineError::SynthesisFormat(format!(
            "generated_sql_query is empty (explanation: {})",
            if spec.explanation.is_empty() {
                "none given"
            } else {
                &spec.explanation
            }
        )));
    }

    Ok(spec)
}

/// One synthesis call: prompt, generate, parse.
pub async fn generate_query(
    client: &dyn GenerationClient,
    config: &GenerationConfig,
    question: &str,
    tables: &[ScoredEntry],
    columns: &[ScoredEntry],
    dialect: &str,
) -> PipelineResult<(QuerySpec, UsageStats)> {
    let prompt = build_prompt(question, tables, columns, dialect, config.dialect_hints);
    let output = client
        .generate_structured(&prompt)
        .await
        .map_err(PipelineError::Internal)?;
    let spec = parse_query_spec(&output.content)?;
    Ok((spec, output.usage))
}

/// One repair call: same as [`generate_query`] with the failure appended.
pub async fn repair_query(
    client: &dyn GenerationClient,
    config: &GenerationConfig,
    question: &str,
    tables: &[ScoredEntry],
    columns: &[ScoredEntry],
    dialect: &str,
    failed_sql: &str,
    error_message: &str,
) -> PipelineResult<(QuerySpec, UsageStats)> {
    let prompt = build_repair_prompt(
        question,
        tables,
        columns,
        dialect,
        config.dialect_hints,
        failed_sql,
        error_message,
    );
    let output = client
        .generate_structured(&prompt)
        .await
        .map_err(PipelineError::Internal)?;
    let spec = parse_query_spec(&output.content)?;
    Ok((spec, output.usage))
}
