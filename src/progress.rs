//! Refresh progress reporting.
//!
//! Reports observable progress during `tdb refresh` so users see when the
//! target is being introspected and how much of the index has been embedded.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for refresh.
#[derive(Clone, Debug)]
pub enum RefreshProgressEvent {
    /// Walking the target's metadata (no total yet).
    Introspecting,
    /// Embedding phase: n entries embedded out of total.
    Embedding { n: u64, total: u64 },
}

/// Reports refresh progress. Implementations write to stderr (human or JSON).
pub trait RefreshProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the refresh pipeline.
    fn report(&self, event: RefreshProgressEvent);
}

/// Human-friendly progress on stderr: "refresh  embedding  120 / 1,450 entries".
pub struct StderrProgress;

impl RefreshProgressReporter for StderrProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let line = match &event {
            RefreshProgressEvent::Introspecting => "refresh  introspecting...\n".to_string(),
            RefreshProgressEvent::Embedding { n, total } => {
                format!(
                    "refresh  embedding  {} / {} entries\n",
                    format_number(*n),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RefreshProgressReporter for JsonProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let obj = match &event {
            RefreshProgressEvent::Introspecting => serde_json::json!({
                "event": "progress",
                "phase": "introspecting"
            }),
            RefreshProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RefreshProgressReporter for NoProgress {
    fn report(&self, _event: RefreshProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to refresh.
    pub fn reporter(&self) -> Box<dyn RefreshProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
