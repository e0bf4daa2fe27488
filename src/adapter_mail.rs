//! Mail-store adapter.
//!
//! Translates native email records into canonical items. The raw mail-store
//! reader is an external collaborator behind [`MailStoreReader`].
//!
//! Canonical content is the subject plus the plain-text body with quoted
//! reply blocks collapsed to a single `[quoted]` marker, so reply chains do
//! not dominate term statistics. The unmodified body stays available to
//! callers through the metadata bag.

use async_trait::async_trait;

use crate::adapter::{ProbeStatus, Pull, SourceAdapter};
use crate::error::AdapterError;
use crate::models::{DocKind, EmailFields, RawItem, RawItemError, Source, TypedFields};

/// One record from the native mail store.
#[derive(Debug, Clone)]
pub struct NativeEmail {
    /// RFC 5322 message id; stable across runs.
    pub message_id: String,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub body_plain: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    /// Epoch seconds; doubles as the incremental cursor dimension.
    pub date: i64,
}

/// Narrow contract to the OS mail store.
pub trait MailStoreReader: Send + Sync {
    fn probe(&self) -> ProbeStatus;

    /// Records with `date > since`, ascending by date.
    fn fetch_since(
        &self,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeEmail>, AdapterError>;
}

pub struct MailAdapter {
    reader: Box<dyn MailStoreReader>,
}

impl MailAdapter {
    pub fn new(reader: Box<dyn MailStoreReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl SourceAdapter for MailAdapter {
    fn source(&self) -> Source {
        Source::Mail
    }

    async fn probe(&self) -> ProbeStatus {
        self.reader.probe()
    }

    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError> {
        let since_date = since.and_then(|s| s.parse::<i64>().ok());
        let records = self.reader.fetch_since(since_date, max_items)?;

        let mut items = Vec::with_capacity(records.len());
        let mut last_date = since_date;

        for record in records {
            last_date = Some(record.date.max(last_date.unwrap_or(i64::MIN)));
            items.push(translate(record));
        }

        Ok(Pull {
            items,
            cursor: last_date.map(|d| d.to_string()),
        })
    }
}

fn translate(record: NativeEmail) -> Result<RawItem, RawItemError> {
    if record.message_id.trim().is_empty() {
        return Err(RawItemError {
            native_id: String::new(),
            reason: "missing message id".to_string(),
        });
    }
    if record.from.trim().is_empty() {
        return Err(RawItemError {
            native_id: record.message_id.clone(),
            reason: "missing sender".to_string(),
        });
    }

    let collapsed = collapse_quoted(&record.body_plain);
    let content = if record.subject.trim().is_empty() {
        collapsed.clone()
    } else {
        format!("{}\n\n{}", record.subject.trim(), collapsed)
    };

    let mut participants = vec![record.from.clone()];
    participants.extend(record.to.iter().cloned());
    participants.extend(record.cc.iter().cloned());

    let metadata = serde_json::json!({
        "participants": participants,
        "body_raw": record.body_plain.clone(),
        "thread_id": record.thread_id.clone(),
    });

    Ok(RawItem {
        source_native_id: record.message_id.clone(),
        kind: DocKind::Email,
        title: record.subject.trim().to_string(),
        content,
        created_at: record.date,
        updated_at: record.date,
        metadata,
        typed_fields: TypedFields::Email(EmailFields {
            from: record.from,
            to: record.to,
            cc: record.cc,
            subject: record.subject.trim().to_string(),
            thread_id: record.thread_id,
            message_id: Some(record.message_id),
            in_reply_to: record.in_reply_to,
        }),
        cursor_hint: Some(record.date.to_string()),
    })
}

/// Collapse each run of `>`-quoted lines into a single `[quoted]` marker.
fn collapse_quoted(body: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_quote = false;

    for line in body.lines() {
        if line.trim_start().starts_with('>') {
            if !in_quote {
                out.push("[quoted]");
                in_quote = true;
            }
        } else {
            in_quote = false;
            out.push(line);
        }
    }

    out.join("\n").trim().to_string()
}
