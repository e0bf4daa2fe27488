//! Structured log events.
//!
//! Every recovered error and every notable phase transition is logged as a
//! schema-defined [`LogEvent`] with enough context to reproduce (source,
//! native id, phase). Loggers consume the tag, not a bag of unknowns; the
//! events are emitted through `tracing` with structured fields.

use tracing::{info, warn};

use crate::models::Source;

/// Tagged union of everything the engine logs.
#[derive(Debug, Clone)]
pub enum LogEvent {
    MigrationApplied {
        version: i64,
    },
    IngestStarted {
        run_id: String,
        sources: Vec<Source>,
    },
    BatchCommitted {
        run_id: String,
        source: Source,
        batch: u64,
        items: usize,
    },
    BatchFailed {
        run_id: String,
        source: Source,
        batch: u64,
        reason: String,
    },
    SourceDeferred {
        run_id: String,
        source: Source,
        reason: String,
    },
    RecordSkipped {
        source: Source,
        native_id: String,
        reason: String,
    },
    ChatIdCollision {
        native_id: String,
    },
    EmbedPassStarted {
        pass_id: String,
        model: String,
    },
    EmbedBatchFailed {
        pass_id: String,
        reason: String,
    },
    EmbedDeferred {
        pass_id: String,
        doc_id: String,
    },
    StaleModelPurged {
        model: String,
        rows: u64,
    },
    SearchDegraded {
        reason: String,
    },
}

/// Emit one event at the appropriate level with structured fields.
pub fn emit(event: &LogEvent) {
    match event {
        LogEvent::MigrationApplied { version } => {
            info!(event = "migration_applied", version, "schema migration applied");
        }
        LogEvent::IngestStarted { run_id, sources } => {
            let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
            info!(event = "ingest_started", run_id = %run_id, sources = ?names, "ingest run started");
        }
        LogEvent::BatchCommitted {
            run_id,
            source,
            batch,
            items,
        } => {
            info!(
                event = "batch_committed",
                run_id = %run_id,
                source = source.as_str(),
                batch,
                items,
                "batch committed"
            );
        }
        LogEvent::BatchFailed {
            run_id,
            source,
            batch,
            reason,
        } => {
            warn!(
                event = "batch_failed",
                run_id = %run_id,
                source = source.as_str(),
                batch,
                reason = %reason,
                "batch rolled back"
            );
        }
        LogEvent::SourceDeferred {
            run_id,
            source,
            reason,
        } => {
            warn!(
                event = "source_deferred",
                run_id = %run_id,
                source = source.as_str(),
                reason = %reason,
                "source deferred for retry"
            );
        }
        LogEvent::RecordSkipped {
            source,
            native_id,
            reason,
        } => {
            warn!(
                event = "record_skipped",
                source = source.as_str(),
                native_id = %native_id,
                reason = %reason,
                "malformed record skipped"
            );
        }
        LogEvent::ChatIdCollision { native_id } => {
            warn!(
                event = "chat_id_collision",
                native_id = %native_id,
                "duplicate (id, chat_jid) treated as update"
            );
        }
        LogEvent::EmbedPassStarted { pass_id, model } => {
            info!(
                event = "embed_pass_started",
                pass_id = %pass_id,
                model = %model,
                "embedding pass started"
            );
        }
        LogEvent::EmbedBatchFailed { pass_id, reason } => {
            warn!(
                event = "embed_batch_failed",
                pass_id = %pass_id,
                reason = %reason,
                "embedding batch failed"
            );
        }
        LogEvent::EmbedDeferred { pass_id, doc_id } => {
            warn!(
                event = "embed_deferred",
                pass_id = %pass_id,
                doc_id = %doc_id,
                "document deferred for the rest of the pass"
            );
        }
        LogEvent::StaleModelPurged { model, rows } => {
            info!(
                event = "stale_model_purged",
                model = %model,
                rows,
                "purged embeddings for inactive model"
            );
        }
        LogEvent::SearchDegraded { reason } => {
            warn!(
                event = "search_degraded",
                reason = %reason,
                "falling back to lexical-only search"
            );
        }
    }
}

/// Install the process-wide subscriber. Honors `RUST_LOG`; defaults to `info`
/// for this crate. Safe to call once per process.
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kenny=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
