//! Ingest and embed progress reporting.
//!
//! Reports observable progress during ingestion and embedding passes so
//! users see what is being pulled, how much is left, and when search is up
//! to date. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use crate::models::Source;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// An adapter pull is in flight for this source (total unknown).
    Pulling { source: Source },
    /// Items committed so far out of the total pulled for this source.
    Ingesting {
        source: Source,
        done: u64,
        total: u64,
    },
    /// Chunks embedded so far out of the pending total.
    Embedding { done: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "ingest mail  1,234 / 5,000 items".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Pulling { source } => format!("ingest {}  pulling...\n", source),
            ProgressEvent::Ingesting {
                source,
                done,
                total,
            } => format!(
                "ingest {}  {} / {} items\n",
                source,
                format_number(*done),
                format_number(*total)
            ),
            ProgressEvent::Embedding { done, total } => format!(
                "embed  {} / {} chunks\n",
                format_number(*done),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Pulling { source } => serde_json::json!({
                "event": "progress",
                "phase": "pulling",
                "source": source.as_str(),
            }),
            ProgressEvent::Ingesting {
                source,
                done,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "source": source.as_str(),
                "done": done,
                "total": total,
            }),
            ProgressEvent::Embedding { done, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "done": done,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
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

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
