//! Core data models used throughout Kenny.
//!
//! These types represent the raw items, documents, chunks, and search results
//! that flow through the ingestion and retrieval pipeline, plus the report
//! types returned by the control surface.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A logical data origin. Each source has one adapter and one typed side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Messages,
    Mail,
    Calendar,
    Contacts,
    Chat,
    Notes,
    Reminders,
    Files,
}

impl Source {
    pub const ALL: &'static [Source] = &[
        Source::Messages,
        Source::Mail,
        Source::Calendar,
        Source::Contacts,
        Source::Chat,
        Source::Notes,
        Source::Reminders,
        Source::Files,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Messages => "messages",
            Source::Mail => "mail",
            Source::Calendar => "calendar",
            Source::Contacts => "contacts",
            Source::Chat => "chat",
            Source::Notes => "notes",
            Source::Reminders => "reminders",
            Source::Files => "files",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s.trim().to_ascii_lowercase().as_str() {
            "messages" => Some(Source::Messages),
            "mail" => Some(Source::Mail),
            "calendar" => Some(Source::Calendar),
            "contacts" => Some(Source::Contacts),
            "chat" => Some(Source::Chat),
            "notes" => Some(Source::Notes),
            "reminders" => Some(Source::Reminders),
            "files" => Some(Source::Files),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit-of-retrieval category of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Message,
    Email,
    Event,
    Contact,
    Note,
    Reminder,
    File,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Message => "message",
            DocKind::Email => "email",
            DocKind::Event => "event",
            DocKind::Contact => "contact",
            DocKind::Note => "note",
            DocKind::Reminder => "reminder",
            DocKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<DocKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" => Some(DocKind::Message),
            "email" => Some(DocKind::Email),
            "event" => Some(DocKind::Event),
            "contact" => Some(DocKind::Contact),
            "note" => Some(DocKind::Note),
            "reminder" => Some(DocKind::Reminder),
            "file" => Some(DocKind::File),
            _ => None,
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured side-table fields for an email document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailFields {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
}

/// Structured side-table fields for a calendar event document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFields {
    pub start: i64,
    pub end: i64,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<String>,
    pub status: Option<String>,
    pub recurrence: Option<String>,
}

/// Structured side-table fields for a messages-store document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageFields {
    pub handle: String,
    pub service: String,
    pub is_from_me: bool,
    pub chat_id: Option<String>,
}

/// Structured side-table fields for a contact card document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactFields {
    pub primary_phone: Option<String>,
    pub secondary_phone: Option<String>,
    pub primary_email: Option<String>,
    pub secondary_email: Option<String>,
    pub organization: Option<String>,
    pub title: Option<String>,
}

/// Structured side-table fields for a chat-bridge message document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatFields {
    pub chat_jid: String,
    pub sender: String,
    pub is_from_me: bool,
    pub media_kind: Option<String>,
}

/// Per-kind structured fields carried alongside a document.
///
/// `None` is valid for kinds without a side table (notes, reminders, files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypedFields {
    Email(EmailFields),
    Event(EventFields),
    Message(MessageFields),
    Contact(ContactFields),
    Chat(ChatFields),
    None,
}

impl Default for TypedFields {
    fn default() -> Self {
        TypedFields::None
    }
}

/// Canonical item produced by a source adapter before storage.
#[derive(Debug, Clone)]
pub struct RawItem {
    /// Opaque, deterministic identifier within the source.
    pub source_native_id: String,
    pub kind: DocKind,
    pub title: String,
    pub content: String,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds.
    pub updated_at: i64,
    pub metadata: serde_json::Value,
    pub typed_fields: TypedFields,
    /// Source-defined position token for incremental resumption. The ingest
    /// manager persists the last hint of each committed batch as the cursor.
    pub cursor_hint: Option<String>,
}

/// A per-record translation failure, yielded in-band by adapters.
#[derive(Debug, Clone, Serialize)]
pub struct RawItemError {
    pub native_id: String,
    pub reason: String,
}

/// Normalized document stored in SQLite. The unit of retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub doc_id: String,
    pub source: Source,
    pub kind: DocKind,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub ingested_at: i64,
    pub source_native_id: String,
    pub content_hash: String,
    pub metadata: serde_json::Value,
}

/// A bounded text slice of a document, the unit of embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub ordinal: i64,
    pub text: String,
    pub char_start: i64,
    pub char_end: i64,
}

/// Per-source incremental sync position.
#[derive(Debug, Clone, Serialize)]
pub struct Cursor {
    pub source: Source,
    pub position: String,
    pub last_success_at: i64,
}

/// Outcome of a content-hash-aware document upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Retrieval mode actually used by a search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    Normal,
    LexicalOnly,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Normal => "normal",
            SearchMode::LexicalOnly => "lexical-only",
        }
    }
}

/// A single ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub title: String,
    pub snippet: String,
    pub source: Source,
    /// Fused score after normalization and weighting.
    pub score: f64,
    /// Raw BM25 score from the lexical channel (0 when absent).
    pub bm25: f64,
    /// Best cosine similarity across the document's chunks (0 when absent).
    pub cosine: f64,
    pub updated_at: i64,
}

/// Optional constraints applied to a search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub sources: Vec<Source>,
    pub kinds: Vec<DocKind>,
    /// Inclusive `[from, to]` window on `updated_at`, epoch seconds.
    pub time_range: Option<(i64, i64)>,
    /// Case-insensitive participant names or addresses.
    pub participants: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.kinds.is_empty()
            && self.time_range.is_none()
            && self.participants.is_empty()
    }
}

/// Options controlling an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Delete all rows for each selected source before pulling; clears cursors.
    pub full_sync: bool,
    /// Commit every N raw items.
    pub batch_size: usize,
    /// Cap per source.
    pub max_items: Option<usize>,
    /// Pull and canonicalize, skip all writes.
    pub dry_run: bool,
    /// A failed batch rolls back and the run proceeds with the next batch.
    pub continue_on_batch_failure: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            full_sync: false,
            batch_size: 500,
            max_items: None,
            dry_run: false,
            continue_on_batch_failure: true,
        }
    }
}

/// Terminal status of one source within an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceRunStatus {
    Completed,
    /// The adapter reported a transient condition (permission, availability);
    /// no writes were performed and the source should be retried later.
    DeferredRetry,
    Failed,
}

/// Per-source ingestion outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub status: SourceRunStatus,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: Vec<RawItemError>,
    pub batches_committed: u64,
    pub cursor_after: Option<String>,
}

impl SourceReport {
    pub fn deferred(reason: &str) -> Self {
        Self {
            status: SourceRunStatus::DeferredRetry,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            errors: vec![RawItemError {
                native_id: String::new(),
                reason: reason.to_string(),
            }],
            batches_committed: 0,
            cursor_after: None,
        }
    }
}

/// Full report for an ingestion run, one entry per selected source.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub dry_run: bool,
    pub sources: BTreeMap<Source, SourceReport>,
}

/// Deterministic document identity: a pure function of `(source, native id)`.
pub fn doc_id(source: Source, source_native_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_native_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of normalized content, used for change detection and dedup.
pub fn content_hash(normalized_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize content before hashing and storage: unify newlines and strip
/// trailing whitespace so cosmetic differences do not defeat dedup.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    for line in unified.split('\n') {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_deterministic() {
        let a = doc_id(Source::Mail, "msg-123");
        let b = doc_id(Source::Mail, "msg-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn doc_id_separates_source_and_native_id() {
        assert_ne!(doc_id(Source::Mail, "x"), doc_id(Source::Messages, "x"));
        assert_ne!(doc_id(Source::Mail, "ab"), doc_id(Source::Mail, "a"));
    }

    #[test]
    fn normalize_unifies_newlines_and_trailing_space() {
        let raw = "first line  \r\nsecond\rthird\n\n";
        assert_eq!(normalize_content(raw), "first line\nsecond\nthird");
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "a \r\n b\r\nc";
        let once = normalize_content(raw);
        assert_eq!(normalize_content(&once), once);
    }

    #[test]
    fn source_round_trip() {
        for s in Source::ALL {
            assert_eq!(Source::parse(s.as_str()), Some(*s));
        }
        assert_eq!(Source::parse("imessage"), None);
    }
}
