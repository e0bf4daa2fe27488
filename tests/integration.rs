//! End-to-end scenarios against a real temp-file store, fixture adapters,
//! and a mocked embedder endpoint.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use kenny::adapter::{ProbeStatus, Pull, SourceAdapter};
use kenny::adapter_contacts::{ContactStoreReader, ContactsAdapter, NativeContact};
use kenny::adapter_mail::{MailAdapter, MailStoreReader, NativeEmail};
use kenny::chunker;
use kenny::config::Config;
use kenny::engine::{EmbedPassResult, Engine};
use kenny::error::AdapterError;
use kenny::models::{
    DocKind, IngestOptions, MessageFields, RawItem, SearchFilters, SearchMode, Source,
    SourceRunStatus, TypedFields,
};
use kenny::progress::NoProgress;

// ============ Fixtures ============

/// A config whose embedder points at a closed port, so query embedding
/// fails fast and search degrades to lexical-only unless a mock is wired.
fn test_config(dir: &Path) -> Config {
    let mut config = Config::with_db_path(dir.join("kenny.db"));
    config.embedding.url = "http://127.0.0.1:9".to_string();
    config.embedding.max_retries = 0;
    config.embedding.timeout_secs = 1;
    config.embedding.query_timeout_ms = 250;
    config.embedding.batch_size = 1;
    config
}

fn mock_config(dir: &Path, server_url: &str) -> Config {
    let mut config = test_config(dir);
    config.embedding.url = server_url.to_string();
    config
}

fn message_item(i: usize) -> RawItem {
    RawItem {
        source_native_id: format!("item-{i}"),
        kind: DocKind::Message,
        title: format!("Message from +1555000{i}"),
        content: format!("[iMessage] +1555000{i}: ping number {i} about logistics"),
        created_at: 1_700_000_000 + i as i64,
        updated_at: 1_700_000_000 + i as i64,
        metadata: serde_json::json!({ "participants": [format!("+1555000{i}")] }),
        typed_fields: TypedFields::Message(MessageFields {
            handle: format!("+1555000{i}"),
            service: "iMessage".to_string(),
            is_from_me: false,
            chat_id: None,
        }),
        cursor_hint: Some(i.to_string()),
    }
}

/// Adapter yielding a fixed item sequence. `respect_since` controls whether
/// the cursor actually filters (duplicate-suppression tests re-emit all).
struct FixtureAdapter {
    source: Source,
    items: Vec<RawItem>,
    probe: ProbeStatus,
    respect_since: bool,
}

impl FixtureAdapter {
    fn messages(total: usize, respect_since: bool) -> Self {
        Self {
            source: Source::Messages,
            items: (1..=total).map(message_item).collect(),
            probe: ProbeStatus::Ready,
            respect_since,
        }
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn probe(&self) -> ProbeStatus {
        self.probe.clone()
    }

    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError> {
        let since_pos = if self.respect_since {
            since.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0)
        } else {
            0
        };
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|item| {
                item.cursor_hint
                    .as_deref()
                    .and_then(|h| h.parse::<i64>().ok())
                    .map_or(true, |pos| pos > since_pos)
            })
            .cloned()
            .map(Ok)
            .collect();
        if let Some(cap) = max_items {
            items.truncate(cap);
        }
        let cursor = items
            .iter()
            .rev()
            .find_map(|item: &Result<RawItem, _>| {
                item.as_ref().ok().and_then(|i| i.cursor_hint.clone())
            })
            .or_else(|| since.map(String::from));
        Ok(Pull { items, cursor })
    }
}

struct MailFixture(Vec<NativeEmail>);

impl MailStoreReader for MailFixture {
    fn probe(&self) -> ProbeStatus {
        ProbeStatus::Ready
    }
    fn fetch_since(
        &self,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeEmail>, AdapterError> {
        let mut records: Vec<NativeEmail> = self
            .0
            .iter()
            .filter(|m| since.map_or(true, |s| m.date > s))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

struct DeniedMail;

impl MailStoreReader for DeniedMail {
    fn probe(&self) -> ProbeStatus {
        ProbeStatus::NeedsPermission("grant Full Disk Access".to_string())
    }
    fn fetch_since(
        &self,
        _since: Option<i64>,
        _limit: Option<usize>,
    ) -> Result<Vec<NativeEmail>, AdapterError> {
        Err(AdapterError::PermissionDenied {
            src: Source::Mail,
            hint: "grant Full Disk Access".to_string(),
        })
    }
}

struct ContactsFixture(Vec<NativeContact>);

impl ContactStoreReader for ContactsFixture {
    fn probe(&self) -> ProbeStatus {
        ProbeStatus::Ready
    }
    fn fetch_since(
        &self,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeContact>, AdapterError> {
        let mut records: Vec<NativeContact> = self
            .0
            .iter()
            .filter(|c| since.map_or(true, |s| c.updated_at > s))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

fn ana_contact() -> NativeContact {
    NativeContact {
        identifier: "card-ana".to_string(),
        full_name: "Ana Torres".to_string(),
        organization: Some("Acme".to_string()),
        job_title: None,
        phones: vec!["+15551000".to_string()],
        emails: vec!["ana@example.com".to_string()],
        notes: None,
        updated_at: 1_700_000_000,
    }
}

fn budget_email() -> NativeEmail {
    NativeEmail {
        message_id: "<budget-1@example.com>".to_string(),
        subject: "Quarterly budget".to_string(),
        from: "ana@example.com".to_string(),
        to: vec!["me@example.com".to_string()],
        cc: vec![],
        body_plain: "Draft numbers attached. The budget grows 4% next quarter.".to_string(),
        thread_id: Some("t-budget".to_string()),
        in_reply_to: None,
        date: 1_700_100_000,
    }
}

async fn ingest_all(engine: &Engine, sources: &[Source]) -> kenny::models::IngestReport {
    engine
        .ingest(sources, &IngestOptions::default(), Arc::new(NoProgress))
        .await
        .expect("ingest")
}

/// Insert a document's chunks and a fixed embedding vector directly,
/// bypassing the embedder. Used to stage vector corpora for search tests.
async fn embed_directly(engine: &Engine, doc_id: &str, vector: &[f32], model_id: &str) {
    let (doc, _) = engine.store().fetch_document(doc_id).await.expect("doc");
    let chunks = chunker::chunk_document(doc_id, &doc.content, 512, 1024);
    let mut tx = engine.store().begin_write().await.expect("tx");
    tx.replace_chunks(doc_id, &chunks, &doc.content_hash)
        .await
        .expect("chunks");
    for chunk in &chunks {
        tx.insert_embedding(&chunk.chunk_id, vector, model_id)
            .await
            .expect("embedding");
    }
    tx.commit().await.expect("commit");
}

fn embed_body(vectors: &[&[f32]], dim: usize) -> String {
    serde_json::json!({
        "embeddings": vectors,
        "model": "nomic-embed-text-v1.5",
        "dim": dim,
    })
    .to_string()
}

// ============ Ingestion scenarios ============

#[tokio::test]
async fn duplicate_suppression_across_runs() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(100, false)));

    let first = ingest_all(&engine, &[Source::Messages]).await;
    let report = &first.sources[&Source::Messages];
    assert_eq!(report.inserted, 100);
    assert_eq!(report.status, SourceRunStatus::Completed);

    let second = ingest_all(&engine, &[Source::Messages]).await;
    let report = &second.sources[&Source::Messages];
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 100);

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(docs, 100);

    let fts_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents_fts")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(fts_rows, 100);

    let side_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(side_rows, 100);
}

#[tokio::test]
async fn batch_failure_rolls_back_and_resumes() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(1000, true)));

    // Squat on (source, native id) of record 750 with a foreign doc_id so
    // batch 2's insert trips the unique constraint.
    sqlx::query(
        "INSERT INTO documents (doc_id, source, kind, title, content, created_at, updated_at,
                                ingested_at, source_native_id, content_hash, metadata)
         VALUES ('squatter', 'messages', 'message', '', 'x', 0, 0, 0, 'item-750', 'h', '{}')",
    )
    .execute(engine.store().pool())
    .await
    .unwrap();

    let opts = IngestOptions {
        batch_size: 500,
        ..Default::default()
    };
    let report = engine
        .ingest(&[Source::Messages], &opts, Arc::new(NoProgress))
        .await
        .unwrap();
    let sr = &report.sources[&Source::Messages];

    assert_eq!(sr.batches_committed, 1);
    assert_eq!(sr.inserted, 500);
    assert_eq!(sr.cursor_after.as_deref(), Some("500"));
    assert!(sr.errors.iter().any(|e| e.reason.contains("batch 2")));

    let ingested: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE source = 'messages' AND doc_id != 'squatter'",
    )
    .fetch_one(engine.store().pool())
    .await
    .unwrap();
    assert_eq!(ingested, 500);

    // Clear the injected conflict; the next run resumes from the cursor.
    sqlx::query("DELETE FROM documents WHERE doc_id = 'squatter'")
        .execute(engine.store().pool())
        .await
        .unwrap();

    let report = engine
        .ingest(&[Source::Messages], &opts, Arc::new(NoProgress))
        .await
        .unwrap();
    let sr = &report.sources[&Source::Messages];
    assert_eq!(sr.inserted, 500);
    assert_eq!(sr.unchanged, 0);
    assert_eq!(sr.cursor_after.as_deref(), Some("1000"));

    let ingested: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = 'messages'")
            .fetch_one(engine.store().pool())
            .await
            .unwrap();
    assert_eq!(ingested, 1000);
}

#[tokio::test]
async fn source_isolation_on_permission_denied() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(25, true)));
    engine.register_adapter(Box::new(MailAdapter::new(Box::new(DeniedMail))));

    let report = ingest_all(&engine, &[Source::Messages, Source::Mail]).await;

    let messages = &report.sources[&Source::Messages];
    assert_eq!(messages.status, SourceRunStatus::Completed);
    assert_eq!(messages.inserted, 25);

    let mail = &report.sources[&Source::Mail];
    assert_eq!(mail.status, SourceRunStatus::DeferredRetry);
    assert_eq!(mail.inserted, 0);
    assert_eq!(mail.batches_committed, 0);

    let mail_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = 'mail'")
            .fetch_one(engine.store().pool())
            .await
            .unwrap();
    assert_eq!(mail_rows, 0);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(10, true)));

    let opts = IngestOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = engine
        .ingest(&[Source::Messages], &opts, Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(report.sources[&Source::Messages].inserted, 10);

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(docs, 0);
    assert!(engine.store().get_cursor(Source::Messages).await.unwrap().is_none());
}

#[tokio::test]
async fn full_sync_replaces_rows_and_resets_cursor() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(20, true)));

    ingest_all(&engine, &[Source::Messages]).await;
    let cursor = engine.store().get_cursor(Source::Messages).await.unwrap();
    assert_eq!(cursor.unwrap().position, "20");

    let opts = IngestOptions {
        full_sync: true,
        ..Default::default()
    };
    let report = engine
        .ingest(&[Source::Messages], &opts, Arc::new(NoProgress))
        .await
        .unwrap();
    let sr = &report.sources[&Source::Messages];
    assert_eq!(sr.inserted, 20);
    assert_eq!(sr.unchanged, 0);

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(docs, 20);
}

#[tokio::test]
async fn fetch_document_round_trips_canonical_content() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(MailAdapter::new(Box::new(MailFixture(vec![
        budget_email(),
    ])))));

    ingest_all(&engine, &[Source::Mail]).await;

    let doc_id = kenny::models::doc_id(Source::Mail, "<budget-1@example.com>");
    let fetched = engine.fetch_document(&doc_id).await.unwrap();
    assert_eq!(fetched.document.source, Source::Mail);
    assert_eq!(fetched.document.title, "Quarterly budget");
    assert_eq!(
        fetched.document.content,
        kenny::models::normalize_content(&fetched.document.content),
    );
    match fetched.typed_fields {
        TypedFields::Email(f) => {
            assert_eq!(f.from, "ana@example.com");
            assert_eq!(f.to, vec!["me@example.com".to_string()]);
            assert_eq!(f.thread_id.as_deref(), Some("t-budget"));
        }
        other => panic!("unexpected typed fields: {other:?}"),
    }

    let missing = engine.fetch_document("no-such-doc").await;
    assert!(missing.is_err());
}

// ============ Search scenarios ============

#[tokio::test]
async fn hybrid_precision_basketball_meeting() {
    let tmp = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/embed")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(embed_body(&[&[0.9, 0.1]], 2))
        .create_async()
        .await;

    let config = mock_config(tmp.path(), &server.url());
    let model = config.embedding.model.clone();
    let mut engine = Engine::open(config).await.unwrap();

    let doc_a = RawItem {
        source_native_id: "note-a".to_string(),
        kind: DocKind::Note,
        title: "Court times".to_string(),
        content: "Basketball court near the container classrooms".to_string(),
        created_at: 100,
        updated_at: 100,
        metadata: serde_json::json!({}),
        typed_fields: TypedFields::None,
        cursor_hint: Some("1".to_string()),
    };
    let doc_b = RawItem {
        source_native_id: "note-b".to_string(),
        kind: DocKind::Note,
        title: "Agenda".to_string(),
        content: "General staff meeting agenda".to_string(),
        created_at: 101,
        updated_at: 101,
        metadata: serde_json::json!({}),
        typed_fields: TypedFields::None,
        cursor_hint: Some("2".to_string()),
    };
    engine.register_adapter(Box::new(FixtureAdapter {
        source: Source::Notes,
        items: vec![doc_a, doc_b],
        probe: ProbeStatus::Ready,
        respect_since: true,
    }));
    ingest_all(&engine, &[Source::Notes]).await;

    let a_id = kenny::models::doc_id(Source::Notes, "note-a");
    let b_id = kenny::models::doc_id(Source::Notes, "note-b");
    embed_directly(&engine, &a_id, &[1.0, 0.0], &model).await;
    embed_directly(&engine, &b_id, &[0.0, 1.0], &model).await;

    let response = engine
        .search("basketball meeting", &SearchFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::Normal);
    assert!(!response.hits.is_empty());
    assert_eq!(response.hits[0].doc_id, a_id);
    assert!(response.hits[0].cosine > 0.9);
    for hit in &response.hits {
        assert!(hit.score >= 0.01);
    }
}

#[tokio::test]
async fn hard_queries_still_answer_via_the_floor() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();

    let items: Vec<RawItem> = (1..=6)
        .map(|i| RawItem {
            source_native_id: format!("note-{i}"),
            kind: DocKind::Note,
            title: format!("Note {i}"),
            content: format!("shared filler words everywhere {i}"),
            created_at: i,
            updated_at: i,
            metadata: serde_json::json!({}),
            typed_fields: TypedFields::None,
            cursor_hint: Some(i.to_string()),
        })
        .chain(std::iter::once(RawItem {
            source_native_id: "note-rare".to_string(),
            kind: DocKind::Note,
            title: "Note rare".to_string(),
            content: "shared filler words everywhere plus zugzwang".to_string(),
            created_at: 99,
            updated_at: 99,
            metadata: serde_json::json!({}),
            typed_fields: TypedFields::None,
            cursor_hint: Some("99".to_string()),
        }))
        .collect();

    engine.register_adapter(Box::new(FixtureAdapter {
        source: Source::Notes,
        items,
        probe: ProbeStatus::Ready,
        respect_since: true,
    }));
    ingest_all(&engine, &[Source::Notes]).await;

    // Embedder is down: lexical-only, and the shared terms make every doc a
    // weak candidate. The ladder may not fill, but the floor must answer.
    let response = engine
        .search("zugzwang shared filler words everywhere", &SearchFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::LexicalOnly);
    assert!(!response.hits.is_empty());
    assert!(response.hits.len() <= 10);
    assert_eq!(
        response.hits[0].doc_id,
        kenny::models::doc_id(Source::Notes, "note-rare")
    );
    for hit in &response.hits {
        assert_eq!(hit.cosine, 0.0);
    }
}

#[tokio::test]
async fn model_change_invalidates_then_repopulates() {
    let tmp = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/embed")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(embed_body(&[&[0.6, 0.8]], 2))
        .create_async()
        .await;

    // Corpus embedded under model m1.
    let mut config = mock_config(tmp.path(), &server.url());
    config.embedding.model = "m1".to_string();
    let mut engine = Engine::open(config).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(3, true)));
    ingest_all(&engine, &[Source::Messages]).await;
    for i in 1..=3 {
        let doc_id = kenny::models::doc_id(Source::Messages, &format!("item-{i}"));
        embed_directly(&engine, &doc_id, &[0.6, 0.8], "m1").await;
    }

    let response = engine
        .search("ping logistics", &SearchFilters::default(), 5)
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::Normal);
    engine.close().await;

    // Rotate the active model: immediately lexical-only.
    let mut config = mock_config(tmp.path(), &server.url());
    config.embedding.model = "m2".to_string();
    let engine = Engine::open(config).await.unwrap();

    let response = engine
        .search("ping logistics", &SearchFilters::default(), 5)
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::LexicalOnly);

    // One pipeline pass purges m1 rows and repopulates under m2.
    let outcome = engine
        .embed_pass(false, Arc::new(NoProgress))
        .await
        .unwrap();
    match outcome {
        EmbedPassResult::Completed(report) => {
            assert_eq!(report.purged_stale_embeddings, 3);
            assert_eq!(report.chunks_embedded, 3);
            assert_eq!(report.chunks_deferred, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let response = engine
        .search("ping logistics", &SearchFilters::default(), 5)
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::Normal);
    assert!(response.hits.iter().any(|h| h.cosine > 0.99));
}

#[tokio::test]
async fn filters_narrow_by_source_and_time() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(5, true)));
    engine.register_adapter(Box::new(MailAdapter::new(Box::new(MailFixture(vec![
        budget_email(),
    ])))));
    ingest_all(&engine, &[Source::Messages, Source::Mail]).await;

    let mail_only = SearchFilters {
        sources: vec![Source::Mail],
        ..Default::default()
    };
    let response = engine.search("budget", &mail_only, 10).await.unwrap();
    assert!(response.hits.iter().all(|h| h.source == Source::Mail));
    assert!(!response.hits.is_empty());

    let out_of_window = SearchFilters {
        time_range: Some((0, 10)),
        ..Default::default()
    };
    let response = engine.search("budget", &out_of_window, 10).await.unwrap();
    assert!(response.hits.is_empty());
}

// ============ NL query scenarios ============

#[tokio::test]
async fn nl_query_routes_person_and_source() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(ContactsAdapter::new(Box::new(ContactsFixture(
        vec![ana_contact()],
    )))));
    engine.register_adapter(Box::new(MailAdapter::new(Box::new(MailFixture(vec![
        budget_email(),
    ])))));
    engine.register_adapter(Box::new(FixtureAdapter::messages(5, true)));
    ingest_all(&engine, &[Source::Contacts, Source::Mail, Source::Messages]).await;

    let result = engine.nl_query("emails from Ana about the budget", 5).await.unwrap();
    assert_eq!(result.plan.filters.sources, vec![Source::Mail]);
    assert_eq!(result.plan.entities.people, vec!["Ana Torres".to_string()]);
    assert_eq!(result.mode, SearchMode::LexicalOnly);
    assert!(!result.hits.is_empty());
    assert_eq!(
        result.hits[0].doc_id,
        kenny::models::doc_id(Source::Mail, "<budget-1@example.com>")
    );

    // Same text, same plan.
    let again = engine.nl_query("emails from Ana about the budget", 5).await.unwrap();
    assert_eq!(
        serde_json::to_string(&again.plan).unwrap(),
        serde_json::to_string(&result.plan).unwrap()
    );
}

#[tokio::test]
async fn nl_query_always_produces_a_plan() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(test_config(tmp.path())).await.unwrap();

    let result = engine.nl_query("zxqv??", 5).await.unwrap();
    assert_eq!(result.plan.query_text, "zxqv");
    assert!(result.hits.is_empty());
}

// ============ Status and embedding bookkeeping ============

#[tokio::test]
async fn status_reports_counts_and_coverage() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(4, true)));
    ingest_all(&engine, &[Source::Messages]).await;

    let status = engine.status().await.unwrap();
    assert_eq!(status.schema_version, 1);
    assert_eq!(status.documents_total, 4);
    assert_eq!(status.chunks_total, 0);
    assert_eq!(status.embedding_coverage_pct, 0.0);
    assert_eq!(status.registered_sources, vec![Source::Messages]);
    assert_eq!(status.by_source.len(), 1);
    assert_eq!(status.by_source[0].documents, 4);
    assert_eq!(status.by_source[0].cursor_position.as_deref(), Some("4"));
}

#[tokio::test]
async fn embed_dry_run_counts_pending_work() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(3, true)));
    ingest_all(&engine, &[Source::Messages]).await;

    match engine.embed_pass(true, Arc::new(NoProgress)).await.unwrap() {
        EmbedPassResult::DryRun(counts) => {
            assert_eq!(counts.stale_documents, 3);
            assert_eq!(counts.pending_chunks, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(docs, 0);
}

#[tokio::test]
async fn embedder_outage_defers_documents_but_keeps_chunks() {
    let tmp = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(tmp.path())).await.unwrap();
    engine.register_adapter(Box::new(FixtureAdapter::messages(2, true)));
    ingest_all(&engine, &[Source::Messages]).await;

    match engine.embed_pass(false, Arc::new(NoProgress)).await.unwrap() {
        EmbedPassResult::Completed(report) => {
            assert_eq!(report.docs_rechunked, 2);
            assert_eq!(report.chunks_embedded, 0);
            assert_eq!(report.chunks_deferred, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Chunk rebuild committed despite the embedder outage; the next pass
    // with a healthy embedder picks the pending chunks straight up.
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(chunks, 2);
}
