//! Ingestion orchestration.
//!
//! Drives the selected adapters, writes into the store transactionally, and
//! maintains per-source cursors. Each source runs as its own task with an
//! independent transaction stream: a fatal condition in one source never
//! rolls back another source's committed batches.
//!
//! Within a source, work is partitioned into batches of `batch_size`; each
//! batch is one transaction and the cursor is advanced inside that commit,
//! so a crash resumes from the last committed batch without duplicating
//! persisted items. After a batch failure the cursor freezes at the last
//! batch before the failure; later batches may still commit (their items
//! dedup on the next run) but never move the cursor past the hole.
//!
//! At most one ingestion run executes at a time per database.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::adapter::{AdapterRegistry, ProbeStatus, Pull, SourceAdapter};
use crate::config::TimeoutConfig;
use crate::error::{AdapterError, StoreError};
use crate::logging::{self, LogEvent};
use crate::models::{
    self, Document, IngestOptions, IngestReport, RawItem, RawItemError, Source, SourceReport,
    SourceRunStatus, UpsertOutcome,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::Store;

pub struct IngestManager {
    store: Arc<Store>,
    run_lock: tokio::sync::Mutex<()>,
}

impl IngestManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one ingestion over the selected sources. Serialized per process;
    /// concurrent callers queue on the run lock.
    ///
    /// Returns `Err` only for fatal store conditions (corruption, failed
    /// migration); everything else is reported per source.
    pub async fn ingest(
        &self,
        registry: &AdapterRegistry,
        sources: &[Source],
        opts: &IngestOptions,
        timeouts: &TimeoutConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<IngestReport, StoreError> {
        let _run = self.run_lock.lock().await;

        let run_id = uuid::Uuid::new_v4().to_string();
        logging::emit(&LogEvent::IngestStarted {
            run_id: run_id.clone(),
            sources: sources.to_vec(),
        });

        let mut reports: BTreeMap<Source, SourceReport> = BTreeMap::new();
        let mut workers: JoinSet<(Source, Result<SourceReport, StoreError>)> = JoinSet::new();

        for &source in sources {
            let adapter = match registry.get(source) {
                Some(adapter) => adapter,
                None => {
                    reports.insert(source, SourceReport::deferred("no adapter registered"));
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let opts = opts.clone();
            let timeouts = timeouts.clone();
            let progress = Arc::clone(&progress);
            let run_id = run_id.clone();

            workers.spawn(async move {
                let report =
                    run_source(store, adapter, source, &opts, &timeouts, progress, &run_id).await;
                (source, report)
            });
        }

        let mut fatal: Option<StoreError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((source, Ok(report))) => {
                    reports.insert(source, report);
                }
                Ok((source, Err(err))) => {
                    if err.is_fatal() {
                        fatal = Some(err);
                        workers.abort_all();
                        break;
                    }
                    reports.insert(
                        source,
                        SourceReport {
                            status: SourceRunStatus::Failed,
                            inserted: 0,
                            updated: 0,
                            unchanged: 0,
                            skipped: 0,
                            errors: vec![RawItemError {
                                native_id: String::new(),
                                reason: err.to_string(),
                            }],
                            batches_committed: 0,
                            cursor_after: None,
                        },
                    );
                }
                Err(join_err) => {
                    if !join_err.is_cancelled() {
                        return Err(StoreError::ConstraintViolation(format!(
                            "ingest worker panicked: {join_err}"
                        )));
                    }
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        Ok(IngestReport {
            run_id,
            dry_run: opts.dry_run,
            sources: reports,
        })
    }
}

async fn run_source(
    store: Arc<Store>,
    adapter: Arc<dyn SourceAdapter>,
    source: Source,
    opts: &IngestOptions,
    timeouts: &TimeoutConfig,
    progress: Arc<dyn ProgressReporter>,
    run_id: &str,
) -> Result<SourceReport, StoreError> {
    match adapter.probe().await {
        ProbeStatus::Ready => {}
        ProbeStatus::NeedsPermission(hint) => {
            let reason = format!("needs permission: {hint}");
            logging::emit(&LogEvent::SourceDeferred {
                run_id: run_id.to_string(),
                source,
                reason: reason.clone(),
            });
            return Ok(SourceReport::deferred(&reason));
        }
        ProbeStatus::Unavailable(reason) => {
            logging::emit(&LogEvent::SourceDeferred {
                run_id: run_id.to_string(),
                source,
                reason: reason.clone(),
            });
            return Ok(SourceReport::deferred(&reason));
        }
    }

    let since = if opts.full_sync {
        None
    } else {
        store.get_cursor(source).await?.map(|c| c.position)
    };

    progress.report(ProgressEvent::Pulling { source });

    let pull_deadline = Duration::from_secs(timeouts.adapter_pull_secs);
    let pull: Pull = match tokio::time::timeout(
        pull_deadline,
        adapter.pull(since.as_deref(), opts.max_items),
    )
    .await
    {
        Err(_) => {
            let reason = format!("pull timed out after {}s", timeouts.adapter_pull_secs);
            logging::emit(&LogEvent::SourceDeferred {
                run_id: run_id.to_string(),
                source,
                reason: reason.clone(),
            });
            return Ok(SourceReport::deferred(&reason));
        }
        Ok(Err(err @ AdapterError::PermissionDenied { .. }))
        | Ok(Err(err @ AdapterError::SourceUnavailable { .. })) => {
            logging::emit(&LogEvent::SourceDeferred {
                run_id: run_id.to_string(),
                source,
                reason: err.to_string(),
            });
            return Ok(SourceReport::deferred(&err.to_string()));
        }
        Ok(Err(err)) => {
            return Ok(SourceReport {
                status: SourceRunStatus::Failed,
                inserted: 0,
                updated: 0,
                unchanged: 0,
                skipped: 0,
                errors: vec![RawItemError {
                    native_id: String::new(),
                    reason: err.to_string(),
                }],
                batches_committed: 0,
                cursor_after: None,
            });
        }
        Ok(Ok(pull)) => pull,
    };

    if opts.dry_run {
        return Ok(dry_run_report(source, &pull, since));
    }

    let mut report = SourceReport {
        status: SourceRunStatus::Completed,
        inserted: 0,
        updated: 0,
        unchanged: 0,
        skipped: 0,
        errors: Vec::new(),
        batches_committed: 0,
        cursor_after: since.clone(),
    };

    if opts.full_sync {
        let mut tx = store.begin_write().await?;
        tx.delete_by_source(source).await?;
        tx.clear_cursor(source).await?;
        tx.commit().await?;
        report.cursor_after = None;
    }

    let total = pull.items.len() as u64;
    let mut done: u64 = 0;
    let mut batch_index: u64 = 0;
    // Set after the first failed batch; later commits stop moving the cursor
    // so a resume re-pulls the hole.
    let mut cursor_frozen = false;

    for batch in pull.items.chunks(opts.batch_size.max(1)) {
        batch_index += 1;

        // In-band record errors are reported once, outside the transaction.
        let mut ok_items: Vec<&RawItem> = Vec::with_capacity(batch.len());
        for item in batch {
            match item {
                Ok(raw) => ok_items.push(raw),
                Err(err) => {
                    logging::emit(&LogEvent::RecordSkipped {
                        source,
                        native_id: err.native_id.clone(),
                        reason: err.reason.clone(),
                    });
                    report.skipped += 1;
                    report.errors.push(err.clone());
                }
            }
        }

        done += batch.len() as u64;

        if ok_items.is_empty() {
            progress.report(ProgressEvent::Ingesting {
                source,
                done,
                total,
            });
            continue;
        }

        let batch_cursor = ok_items
            .iter()
            .rev()
            .find_map(|item| item.cursor_hint.clone());

        match commit_batch(&store, source, &ok_items, batch_cursor.as_deref(), cursor_frozen)
            .await
        {
            Ok(counts) => {
                report.inserted += counts.inserted;
                report.updated += counts.updated;
                report.unchanged += counts.unchanged;
                report.batches_committed += 1;
                if !cursor_frozen {
                    if let Some(position) = batch_cursor {
                        report.cursor_after = Some(position);
                    }
                }
                logging::emit(&LogEvent::BatchCommitted {
                    run_id: run_id.to_string(),
                    source,
                    batch: batch_index,
                    items: ok_items.len(),
                });
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                logging::emit(&LogEvent::BatchFailed {
                    run_id: run_id.to_string(),
                    source,
                    batch: batch_index,
                    reason: err.to_string(),
                });
                report.errors.push(RawItemError {
                    native_id: String::new(),
                    reason: format!("batch {batch_index} failed: {err}"),
                });
                cursor_frozen = true;
                if !opts.continue_on_batch_failure {
                    report.status = SourceRunStatus::Failed;
                    break;
                }
            }
        }

        progress.report(ProgressEvent::Ingesting {
            source,
            done,
            total,
        });
    }

    // With a clean run, the adapter's end-of-pull position supersedes the
    // last batch hint (it may cover trailing malformed records).
    if !cursor_frozen && report.status == SourceRunStatus::Completed {
        if let Some(position) = pull.cursor {
            if report.cursor_after.as_deref() != Some(position.as_str()) {
                let mut tx = store.begin_write().await?;
                tx.set_cursor(source, &position).await?;
                tx.commit().await?;
                report.cursor_after = Some(position);
            }
        }
    }

    Ok(report)
}

struct BatchCounts {
    inserted: u64,
    updated: u64,
    unchanged: u64,
}

/// Write one batch in a single transaction: every document, its typed side
/// row, and (unless frozen) the cursor advance.
async fn commit_batch(
    store: &Store,
    source: Source,
    items: &[&RawItem],
    batch_cursor: Option<&str>,
    cursor_frozen: bool,
) -> Result<BatchCounts, StoreError> {
    let mut tx = store.begin_write().await?;
    let mut counts = BatchCounts {
        inserted: 0,
        updated: 0,
        unchanged: 0,
    };
    let now = chrono::Utc::now().timestamp();

    for item in items {
        let doc = document_from_raw(source, item, now);
        match tx.upsert_document(&doc, &item.typed_fields).await? {
            UpsertOutcome::Inserted => counts.inserted += 1,
            UpsertOutcome::Updated => counts.updated += 1,
            UpsertOutcome::Unchanged => counts.unchanged += 1,
        }
    }

    if !cursor_frozen {
        if let Some(position) = batch_cursor {
            tx.set_cursor(source, position).await?;
        }
    }

    tx.commit().await?;
    Ok(counts)
}

fn document_from_raw(source: Source, item: &RawItem, ingested_at: i64) -> Document {
    let content = models::normalize_content(&item.content);
    let content_hash = models::content_hash(&content);
    Document {
        doc_id: models::doc_id(source, &item.source_native_id),
        source,
        kind: item.kind,
        title: item.title.clone(),
        content,
        created_at: item.created_at,
        updated_at: item.updated_at,
        ingested_at,
        source_native_id: item.source_native_id.clone(),
        content_hash,
        metadata: item.metadata.clone(),
    }
}

fn dry_run_report(_source: Source, pull: &Pull, since: Option<String>) -> SourceReport {
    let mut report = SourceReport {
        status: SourceRunStatus::Completed,
        inserted: 0,
        updated: 0,
        unchanged: 0,
        skipped: 0,
        errors: Vec::new(),
        batches_committed: 0,
        cursor_after: since,
    };
    for item in &pull.items {
        match item {
            Ok(_) => report.inserted += 1,
            Err(err) => {
                report.skipped += 1;
                report.errors.push(err.clone());
            }
        }
    }
    report
}
