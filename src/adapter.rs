//! Source adapter contract and registry.
//!
//! An adapter is anything implementing [`SourceAdapter`]: it names its
//! source, probes availability, and pulls canonical [`RawItem`]s with an
//! opaque cursor for incremental resumption. Adapters are strictly
//! producers; they never touch the store. Implementations are independent
//! values selected at runtime from a registry keyed by source.
//!
//! A parse failure on a single record is yielded in-band as an
//! [`RawItemError`]; an adapter never aborts a whole pull over one record.

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{RawItem, RawItemError, Source};

/// Result of a lightweight availability check, performed before any pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ready,
    /// The OS would deny access; the hint tells the user what to grant.
    NeedsPermission(String),
    Unavailable(String),
}

/// The outcome of one pull: items in adapter-emission order plus the
/// position reached. Per-item `cursor_hint`s let the ingest manager commit
/// intermediate positions batch by batch; `cursor` is the position after the
/// full pull.
pub struct Pull {
    pub items: Vec<Result<RawItem, RawItemError>>,
    pub cursor: Option<String>,
}

impl Pull {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn probe(&self) -> ProbeStatus;

    /// Pull items after `since` (a position previously returned via
    /// `cursor`), capped at `max_items` when given. Items must be emitted in
    /// a deterministic order with stable native ids.
    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError>;
}

/// Runtime registry of adapters, keyed by source name.
///
/// Adapters are shared as `Arc` so each source can run as its own task
/// during ingestion; the ingest manager guarantees at most one task uses an
/// adapter at a time.
pub struct AdapterRegistry {
    adapters: Vec<std::sync::Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Register an adapter. A later registration for the same source
    /// replaces the earlier one.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        let adapter: std::sync::Arc<dyn SourceAdapter> = std::sync::Arc::from(adapter);
        self.adapters.retain(|a| a.source() != adapter.source());
        self.adapters.push(adapter);
    }

    pub fn get(&self, source: Source) -> Option<std::sync::Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.source() == source)
            .cloned()
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.adapters.iter().map(|a| a.source()).collect();
        sources.sort();
        sources
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(Source);

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn source(&self) -> Source {
            self.0
        }
        async fn probe(&self) -> ProbeStatus {
            ProbeStatus::Ready
        }
        async fn pull(
            &self,
            _since: Option<&str>,
            _max_items: Option<usize>,
        ) -> Result<Pull, AdapterError> {
            Ok(Pull::empty())
        }
    }

    #[test]
    fn register_replaces_same_source() {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(StubAdapter(Source::Mail)));
        registry.register(Box::new(StubAdapter(Source::Mail)));
        registry.register(Box::new(StubAdapter(Source::Chat)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.sources(), vec![Source::Mail, Source::Chat]);
        assert!(registry.get(Source::Mail).is_some());
        assert!(registry.get(Source::Calendar).is_none());
    }
}
