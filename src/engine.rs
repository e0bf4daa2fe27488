//! The engine handle and control surface.
//!
//! One [`Engine`] per process owns the store, the adapter registry, the
//! embedder client, the ingest manager, and the embedding pipeline; every
//! component receives what it needs from here and there is no process-wide
//! mutable state beyond the store's WAL files.
//!
//! The public methods — `status`, `ingest`, `search`, `nl_query`,
//! `fetch_document` — are the whole contract between the engine and any
//! front end; failures cross this boundary only as typed [`ApiError`]
//! values, never as escape hatches into component internals.

use std::sync::Arc;

use serde::Serialize;

use crate::adapter::{AdapterRegistry, SourceAdapter};
use crate::adapter_chat::ChatAdapter;
use crate::config::Config;
use crate::embedding::EmbedClient;
use crate::error::ApiError;
use crate::ingest::IngestManager;
use crate::models::{
    Document, IngestOptions, IngestReport, SearchFilters, Source, TypedFields,
};
use crate::pipeline::{EmbeddingPipeline, PassOutcome};
use crate::planner::{self, NlQueryResult, Planner};
use crate::progress::ProgressReporter;
use crate::search::{self, SearchResponse};
use crate::store::{SourceStats, Store};

pub struct Engine {
    config: Config,
    store: Arc<Store>,
    registry: AdapterRegistry,
    embedder: EmbedClient,
    ingest: IngestManager,
    pipeline: EmbeddingPipeline,
}

/// Snapshot of what is indexed and how current it is.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub schema_version: i64,
    pub model_id: String,
    pub documents_total: i64,
    pub chunks_total: i64,
    pub chunks_embedded: i64,
    /// Embedding coverage for the active model, 0–100.
    pub embedding_coverage_pct: f64,
    pub by_source: Vec<SourceStats>,
    pub registered_sources: Vec<Source>,
}

/// A document plus its typed side-table row, as returned by
/// `fetch_document`.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedDocument {
    pub document: Document,
    pub typed_fields: TypedFields,
}

/// Would-be work counts for a dry-run embedding pass.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedDryRun {
    pub stale_documents: u64,
    pub pending_chunks: u64,
}

#[derive(Debug, Clone)]
pub enum EmbedPassResult {
    Completed(crate::pipeline::PassReport),
    AlreadyRunning,
    DryRun(EmbedDryRun),
}

impl Engine {
    /// Open the engine against the configured database path, applying
    /// pending migrations. Registers the chat adapter when the bridge is
    /// configured; other adapters are registered by the embedding
    /// application via [`Engine::register_adapter`].
    pub async fn open(config: Config) -> Result<Engine, ApiError> {
        let store = Arc::new(Store::open(&config.db.path).await?);
        let embedder = EmbedClient::new(&config.embedding)?;

        let mut registry = AdapterRegistry::new();
        if config.chat.bridge_db_path.is_some() || config.chat.archive_dir.is_some() {
            registry.register(Box::new(ChatAdapter::new(&config.chat)));
        }

        let ingest = IngestManager::new(Arc::clone(&store));
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&store),
            embedder.clone(),
            config.chunking.clone(),
            config.embedding.batch_size,
        );

        Ok(Engine {
            config,
            store,
            registry,
            embedder,
            ingest,
            pipeline,
        })
    }

    pub fn register_adapter(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.registry.register(adapter);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    pub async fn status(&self) -> Result<EngineStatus, ApiError> {
        let stats = self.store.stats(self.embedder.model_id()).await?;
        let coverage = if stats.chunks_total > 0 {
            stats.chunks_embedded as f64 * 100.0 / stats.chunks_total as f64
        } else {
            0.0
        };
        Ok(EngineStatus {
            schema_version: stats.schema_version,
            model_id: self.embedder.model_id().to_string(),
            documents_total: stats.documents_total,
            chunks_total: stats.chunks_total,
            chunks_embedded: stats.chunks_embedded,
            embedding_coverage_pct: coverage,
            by_source: stats.by_source,
            registered_sources: self.registry.sources(),
        })
    }

    /// Ingest the selected sources (all registered sources when empty).
    pub async fn ingest(
        &self,
        sources: &[Source],
        opts: &IngestOptions,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<IngestReport, ApiError> {
        let selected: Vec<Source> = if sources.is_empty() {
            self.registry.sources()
        } else {
            sources.to_vec()
        };

        let report = self
            .ingest
            .ingest(
                &self.registry,
                &selected,
                opts,
                &self.config.timeouts,
                progress,
            )
            .await?;
        Ok(report)
    }

    /// Bulk-import archival chat exports through the chat adapter.
    pub async fn import_chat_archive(
        &self,
        opts: &IngestOptions,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<IngestReport, ApiError> {
        let mut bulk = AdapterRegistry::new();
        bulk.register(Box::new(
            ChatAdapter::new(&self.config.chat).with_bulk_import(),
        ));

        let report = self
            .ingest
            .ingest(
                &bulk,
                &[Source::Chat],
                opts,
                &self.config.timeouts,
                progress,
            )
            .await?;
        Ok(report)
    }

    /// Run one embedding pass, or report would-be work under `dry_run`.
    pub async fn embed_pass(
        &self,
        dry_run: bool,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<EmbedPassResult, ApiError> {
        if dry_run {
            let stale = self.store.stale_documents(usize::MAX).await?;
            let pending = self
                .store
                .pending_chunks(self.embedder.model_id(), usize::MAX)
                .await?;
            return Ok(EmbedPassResult::DryRun(EmbedDryRun {
                stale_documents: stale.len() as u64,
                pending_chunks: pending.len() as u64,
            }));
        }

        match self.pipeline.run_pass(progress).await? {
            PassOutcome::Completed(report) => Ok(EmbedPassResult::Completed(report)),
            PassOutcome::AlreadyRunning => Ok(EmbedPassResult::AlreadyRunning),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<SearchResponse, ApiError> {
        let response = search::hybrid_search(
            &self.store,
            &self.embedder,
            &self.config,
            query,
            filters,
            limit,
        )
        .await?;
        Ok(response)
    }

    pub async fn nl_query(&self, text: &str, limit: usize) -> Result<NlQueryResult, ApiError> {
        let contacts = self.store.contact_names().await?;
        let planner = Planner::new(chrono::Utc::now(), contacts);
        let plan = planner.plan(text);

        let (hits, mode) = planner::execute_plan(
            &self.store,
            &self.embedder,
            &self.config,
            &plan,
            limit,
        )
        .await?;

        Ok(NlQueryResult { plan, hits, mode })
    }

    pub async fn fetch_document(&self, doc_id: &str) -> Result<FetchedDocument, ApiError> {
        let (document, typed_fields) = self.store.fetch_document(doc_id).await?;
        Ok(FetchedDocument {
            document,
            typed_fields,
        })
    }
}
