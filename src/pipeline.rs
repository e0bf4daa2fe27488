//! Embedding pipeline.
//!
//! Ensures every document has up-to-date chunks and embeddings for the
//! active model. A pass has three steps:
//!
//! 1. purge embeddings written under any other model (model rotation
//!    invalidates them; hybrid search stays lexical-only until repopulated),
//! 2. rebuild chunks for documents whose content hash moved past their
//!    chunking watermark,
//! 3. embed chunks lacking a vector for the active model, in batches.
//!
//! Progress is committed per batch, so a crash loses at most the current
//! batch. On sustained embedder failure a document is deferred for the
//! remainder of the pass. At most one pass is active; a second invocation
//! returns [`PassOutcome::AlreadyRunning`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::chunker;
use crate::config::ChunkingConfig;
use crate::embedding::EmbedClient;
use crate::error::StoreError;
use crate::logging::{self, LogEvent};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::{PendingChunk, Store};

/// How many stale documents / pending chunks are fetched per round.
const FETCH_WINDOW: usize = 1024;

pub struct EmbeddingPipeline {
    store: Arc<Store>,
    embedder: EmbedClient,
    chunking: ChunkingConfig,
    embed_batch_size: usize,
    running: AtomicBool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PassReport {
    pub pass_id: String,
    pub model_id: String,
    pub purged_stale_embeddings: u64,
    pub docs_rechunked: u64,
    pub chunks_embedded: u64,
    pub chunks_deferred: u64,
}

#[derive(Debug, Clone)]
pub enum PassOutcome {
    Completed(PassReport),
    AlreadyRunning,
}

impl EmbeddingPipeline {
    pub fn new(
        store: Arc<Store>,
        embedder: EmbedClient,
        chunking: ChunkingConfig,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            embed_batch_size: embed_batch_size.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Run one pass. Safe to call from a background task or on demand.
    pub async fn run_pass(
        &self,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<PassOutcome, StoreError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(PassOutcome::AlreadyRunning);
        }
        let result = self.pass_inner(progress).await;
        self.running.store(false, Ordering::SeqCst);
        result.map(PassOutcome::Completed)
    }

    async fn pass_inner(
        &self,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<PassReport, StoreError> {
        let pass_id = uuid::Uuid::new_v4().to_string();
        let model_id = self.embedder.model_id().to_string();
        logging::emit(&LogEvent::EmbedPassStarted {
            pass_id: pass_id.clone(),
            model: model_id.clone(),
        });

        let mut report = PassReport {
            pass_id: pass_id.clone(),
            model_id: model_id.clone(),
            purged_stale_embeddings: 0,
            docs_rechunked: 0,
            chunks_embedded: 0,
            chunks_deferred: 0,
        };

        // Model rotation: embeddings for other models are invalid, purge.
        report.purged_stale_embeddings = self.store.purge_embeddings_except(&model_id).await?;
        if report.purged_stale_embeddings > 0 {
            logging::emit(&LogEvent::StaleModelPurged {
                model: model_id.clone(),
                rows: report.purged_stale_embeddings,
            });
        }

        report.docs_rechunked = self.rebuild_stale_chunks().await?;
        let (embedded, deferred) = self.embed_pending(&pass_id, &model_id, progress).await?;
        report.chunks_embedded = embedded;
        report.chunks_deferred = deferred;

        Ok(report)
    }

    /// Rebuild chunks for documents whose content moved past the watermark.
    /// One transaction per document; replacing chunks drops their old
    /// embeddings through the cascade.
    async fn rebuild_stale_chunks(&self) -> Result<u64, StoreError> {
        let mut rebuilt: u64 = 0;

        loop {
            let stale = self.store.stale_documents(FETCH_WINDOW).await?;
            if stale.is_empty() {
                break;
            }

            for doc in &stale {
                let chunks = chunker::chunk_document(
                    &doc.doc_id,
                    &doc.content,
                    self.chunking.soft_cap_tokens,
                    self.chunking.hard_cap_tokens,
                );
                let mut tx = self.store.begin_write().await?;
                tx.replace_chunks(&doc.doc_id, &chunks, &doc.content_hash)
                    .await?;
                tx.commit().await?;
                rebuilt += 1;
            }
        }

        Ok(rebuilt)
    }

    /// Embed all chunks lacking a vector for the active model. Embed calls
    /// run concurrently under the client's in-flight semaphore; each batch
    /// commits on its own, so partial progress survives a crash.
    async fn embed_pending(
        &self,
        pass_id: &str,
        model_id: &str,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<(u64, u64), StoreError> {
        let mut embedded: u64 = 0;
        let mut deferred: u64 = 0;
        let mut deferred_docs: HashSet<String> = HashSet::new();

        loop {
            let pending = self.store.pending_chunks(model_id, FETCH_WINDOW).await?;
            let window_len = pending.len();
            let workable: Vec<PendingChunk> = pending
                .into_iter()
                .filter(|c| !deferred_docs.contains(&c.doc_id))
                .collect();

            if workable.is_empty() {
                break;
            }

            let total = embedded + workable.len() as u64;
            let mut calls: JoinSet<(Vec<PendingChunk>, Result<Vec<Vec<f32>>, _>)> = JoinSet::new();
            for batch in workable.chunks(self.embed_batch_size) {
                let batch = batch.to_vec();
                let client = self.embedder.clone();
                calls.spawn(async move {
                    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                    let result = client.embed_batch(&texts).await;
                    (batch, result)
                });
            }

            while let Some(joined) = calls.join_next().await {
                let (batch, result) = match joined {
                    Ok(pair) => pair,
                    Err(err) => {
                        logging::emit(&LogEvent::EmbedBatchFailed {
                            pass_id: pass_id.to_string(),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };

                match result {
                    Ok(vectors) => {
                        let mut tx = self.store.begin_write().await?;
                        for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                            tx.insert_embedding(&chunk.chunk_id, vector, model_id).await?;
                        }
                        tx.commit().await?;
                        embedded += batch.len() as u64;
                        progress.report(ProgressEvent::Embedding {
                            done: embedded,
                            total,
                        });
                    }
                    Err(err) => {
                        // The client already retried with backoff; defer the
                        // affected documents for the rest of this pass.
                        logging::emit(&LogEvent::EmbedBatchFailed {
                            pass_id: pass_id.to_string(),
                            reason: err.to_string(),
                        });
                        deferred += batch.len() as u64;
                        for chunk in &batch {
                            if deferred_docs.insert(chunk.doc_id.clone()) {
                                logging::emit(&LogEvent::EmbedDeferred {
                                    pass_id: pass_id.to_string(),
                                    doc_id: chunk.doc_id.clone(),
                                });
                            }
                        }
                    }
                }
            }

            // The window was not full, so everything pending has been seen.
            if window_len < FETCH_WINDOW {
                break;
            }
        }

        Ok((embedded, deferred))
    }
}
