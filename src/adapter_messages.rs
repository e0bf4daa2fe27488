//! Messages-store adapter.
//!
//! Translates native message records into canonical items. The raw
//! messages-store reader is an external collaborator behind
//! [`MessageStoreReader`]; this module defines the record shape it must
//! produce and performs the translation, so the engine never sees
//! OS-specific storage details.
//!
//! Canonical content carries a service/handle prefix so lexical search can
//! distinguish conversations: `[iMessage] +15551234567: text`.

use async_trait::async_trait;

use crate::adapter::{ProbeStatus, Pull, SourceAdapter};
use crate::error::AdapterError;
use crate::models::{DocKind, MessageFields, RawItem, RawItemError, Source, TypedFields};

/// One record from the native messages store.
#[derive(Debug, Clone)]
pub struct NativeMessage {
    /// Monotonic row id; doubles as the incremental cursor dimension.
    pub rowid: i64,
    /// Stable unique id from the store.
    pub guid: String,
    pub text: Option<String>,
    pub handle: String,
    pub service: String,
    pub is_from_me: bool,
    pub chat_id: Option<String>,
    /// Epoch seconds.
    pub date: i64,
}

/// Narrow contract to the OS messages store. Implementations live outside
/// the engine; tests use in-memory fixtures.
pub trait MessageStoreReader: Send + Sync {
    fn probe(&self) -> ProbeStatus;

    /// Records with `rowid > since_rowid`, ascending by rowid.
    fn fetch_since(
        &self,
        since_rowid: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeMessage>, AdapterError>;
}

pub struct MessagesAdapter {
    reader: Box<dyn MessageStoreReader>,
}

impl MessagesAdapter {
    pub fn new(reader: Box<dyn MessageStoreReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl SourceAdapter for MessagesAdapter {
    fn source(&self) -> Source {
        Source::Messages
    }

    async fn probe(&self) -> ProbeStatus {
        self.reader.probe()
    }

    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError> {
        let since_rowid = since.and_then(|s| s.parse::<i64>().ok());
        let records = self.reader.fetch_since(since_rowid, max_items)?;

        let mut items = Vec::with_capacity(records.len());
        let mut last_rowid = since_rowid;

        for record in records {
            last_rowid = Some(record.rowid);
            items.push(translate(record));
        }

        Ok(Pull {
            items,
            cursor: last_rowid.map(|r| r.to_string()),
        })
    }
}

fn translate(record: NativeMessage) -> Result<RawItem, RawItemError> {
    let text = match record.text.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            return Err(RawItemError {
                native_id: record.guid.clone(),
                reason: "empty message body".to_string(),
            })
        }
    };

    if record.handle.trim().is_empty() {
        return Err(RawItemError {
            native_id: record.guid.clone(),
            reason: "missing handle".to_string(),
        });
    }

    let direction = if record.is_from_me { "to" } else { "from" };
    let title = format!("Message {} {}", direction, record.handle);
    let content = format!("[{}] {}: {}", record.service, record.handle, text);

    let metadata = serde_json::json!({
        "participants": [record.handle.clone()],
        "service": record.service.clone(),
        "chat_id": record.chat_id.clone(),
    });

    Ok(RawItem {
        source_native_id: record.guid,
        kind: DocKind::Message,
        title,
        content,
        created_at: record.date,
        updated_at: record.date,
        metadata,
        typed_fields: TypedFields::Message(MessageFields {
            handle: record.handle,
            service: record.service,
            is_from_me: record.is_from_me,
            chat_id: record.chat_id,
        }),
        cursor_hint: Some(record.rowid.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixtureReader(Vec<NativeMessage>);

    impl MessageStoreReader for FixtureReader {
        fn probe(&self) -> ProbeStatus {
            ProbeStatus::Ready
        }
        fn fetch_since(
            &self,
            since: Option<i64>,
            limit: Option<usize>,
        ) -> Result<Vec<NativeMessage>, AdapterError> {
            let mut records: Vec<NativeMessage> = self
                .0
                .iter()
                .filter(|m| since.map_or(true, |s| m.rowid > s))
                .cloned()
                .collect();
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            Ok(records)
        }
    }

    fn record(rowid: i64, text: Option<&str>) -> NativeMessage {
        NativeMessage {
            rowid,
            guid: format!("guid-{rowid}"),
            text: text.map(String::from),
            handle: "+15551234567".to_string(),
            service: "iMessage".to_string(),
            is_from_me: false,
            chat_id: Some("chat1".to_string()),
            date: 1_700_000_000 + rowid,
        }
    }

    #[tokio::test]
    async fn translates_with_service_handle_prefix() {
        let adapter = MessagesAdapter::new(Box::new(FixtureReader(vec![record(
            1,
            Some("on my way"),
        )])));
        let pull = adapter.pull(None, None).await.unwrap();
        assert_eq!(pull.items.len(), 1);
        let item = pull.items[0].as_ref().unwrap();
        assert_eq!(item.content, "[iMessage] +15551234567: on my way");
        assert_eq!(item.source_native_id, "guid-1");
        assert_eq!(pull.cursor.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn empty_body_yields_in_band_error() {
        let adapter = MessagesAdapter::new(Box::new(FixtureReader(vec![
            record(1, None),
            record(2, Some("hello")),
        ])));
        let pull = adapter.pull(None, None).await.unwrap();
        assert_eq!(pull.items.len(), 2);
        assert!(pull.items[0].is_err());
        assert!(pull.items[1].is_ok());
        // The pull still reaches the end; cursor covers both rows.
        assert_eq!(pull.cursor.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn since_cursor_skips_old_rows() {
        let adapter = MessagesAdapter::new(Box::new(FixtureReader(vec![
            record(1, Some("a")),
            record(2, Some("b")),
            record(3, Some("c")),
        ])));
        let pull = adapter.pull(Some("2"), None).await.unwrap();
        assert_eq!(pull.items.len(), 1);
        assert_eq!(
            pull.items[0].as_ref().unwrap().cursor_hint.as_deref(),
            Some("3")
        );
    }
}
