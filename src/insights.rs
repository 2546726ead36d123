//! Insight summaries over execution results.
//!
//! Turns a result table into a short prose answer to the user's question.
//! The prompt confines the model to the rows it is shown, and rows beyond
//! the configured cap never enter the prompt. A failure here is never fatal
//! to the request: the caller drops the summary and keeps the result.

use anyhow::{bail, Result};

use crate::config::InsightsConfig;
use crate::generation::GenerationClient;
use crate::models::{ResultTable, UsageStats};

/// Summarize the execution result in prose grounded only in its rows.
pub async fn generate_insights(
    client: &dyn GenerationClient,
    config: &InsightsConfig,
    question: &str,
    result: &ResultTable,
) -> Result<(String, UsageStats)> {
    let prompt = build_insights_prompt(question, result, config.max_rows);
    let output = client.generate_text(&prompt).await?;
    let content = output.content.trim().to_string();
    if content.is_empty() {
        bail!("Insight reply was empty");
    }
    Ok((content, output.usage))
}

/// Assemble the analyst prompt: the question, the headers, the capped rows,
/// and the grounding rules.
pub fn build_insights_prompt(question: &str, result: &ResultTable, max_rows: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a data analyst. Summarize what the query results show.\n\n");
    prompt.push_str(&format!("User question: {}\n\n", question));

    if result.rows.is_empty() {
        prompt.push_str("Query results: (no rows)\n\n");
    } else {
        let shown = result.rows.len().min(max_rows);
        prompt.push_str(&format!("Columns: {}\n", result.headers.join(", ")));
        prompt.push_str(&format!("Rows ({} of {}):\n", shown, result.rows.len()));
        for row in result.rows.iter().take(max_rows) {
            let cells: Vec<String> = row.iter().map(ResultTable::cell_text).collect();
            prompt.push_str(&format!("- {}\n", cells.join(" | ")));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Instructions:\n\
         1. Use only the rows shown above. No outside knowledge, and no guesses \
         about rows you cannot see.\n\
         2. Lead with the direct answer to the question, then add at most two \
         notable observations from the data.\n\
         3. Keep it under four sentences of plain prose. No code, no markdown.\n\
         4. If there are no rows, say that the query matched nothing.\n",
    );
    prompt
}
