//! # Kenny
//!
//! **A local-first personal data assistant: multi-source ingestion and
//! hybrid retrieval over one on-device corpus.**
//!
//! Kenny ingests heterogeneous personal data sources (messages, mail,
//! calendar, contacts, chat archives) into a single SQLite corpus, then
//! answers queries by fusing lexical (FTS5 BM25) and semantic (vector
//! cosine) retrieval with a progressive-threshold fallback.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Source        │──▶│ Ingest       │──▶│ SQLite        │
//! │ Adapters      │   │ Manager      │   │ FTS5 + vectors│
//! └───────────────┘   └──────────────┘   └──────┬────────┘
//!                        embedding pipeline     │
//!                        (chunks → vectors) ────┤
//!                                               ▼
//!                      ┌──────────────┐   ┌───────────────┐
//!                      │ NL Planner   │──▶│ Hybrid Search │
//!                      └──────────────┘   └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **Adapters** ([`adapter`], `adapter_*`) translate native records into
//!    canonical [`models::RawItem`]s with deterministic native ids.
//! 2. The **ingest manager** ([`ingest`]) writes them in per-source batch
//!    transactions, deduplicating by content hash and advancing cursors
//!    inside each commit.
//! 3. The **embedding pipeline** ([`pipeline`]) chunks changed documents
//!    ([`chunker`]) and requests vectors from the external embedder
//!    ([`embedding`]).
//! 4. **Hybrid search** ([`search`]) fuses BM25 and cosine scores; the
//!    **planner** ([`planner`]) translates natural language into structured
//!    search plans.
//! 5. The **engine** ([`engine`]) is the only surface front ends consume.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, `KENNY_DB_PATH` override |
//! | [`error`] | Typed error taxonomy and the control-surface envelope |
//! | [`logging`] | Schema-defined log events over `tracing` |
//! | [`models`] | Core types: sources, documents, chunks, reports, hits |
//! | [`db`] | SQLite pool (WAL, foreign keys, integrity check) |
//! | [`migrate`] | Versioned migrations with compound-statement splitting |
//! | [`store`] | Durable store: upserts, FTS, vector scan, cursors |
//! | [`adapter`] | Adapter contract and registry |
//! | [`adapter_messages`] | Messages-store translation adapter |
//! | [`adapter_mail`] | Mail-store translation adapter |
//! | [`adapter_calendar`] | Calendar-store translation adapter |
//! | [`adapter_contacts`] | Address-book translation adapter |
//! | [`adapter_chat`] | Chat bridge reader + archive export parser |
//! | [`ingest`] | Batch-transactional multi-source ingestion |
//! | [`chunker`] | Deterministic paragraph chunker |
//! | [`embedding`] | Embedder HTTP client and vector helpers |
//! | [`pipeline`] | Restartable chunk/embed pipeline |
//! | [`search`] | Hybrid retrieval with progressive thresholds |
//! | [`planner`] | Deterministic NL → search-plan translation |
//! | [`engine`] | The control surface |
//! | [`progress`] | Stderr progress reporting |

pub mod adapter;
pub mod adapter_calendar;
pub mod adapter_chat;
pub mod adapter_contacts;
pub mod adapter_mail;
pub mod adapter_messages;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod search;
pub mod store;
