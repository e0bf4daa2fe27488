//! Calendar-store adapter.
//!
//! Synthesizes searchable text for calendar events from title, notes,
//! location, and the attendee list. The raw calendar-store reader is an
//! external collaborator behind [`CalendarStoreReader`].

use async_trait::async_trait;

use crate::adapter::{ProbeStatus, Pull, SourceAdapter};
use crate::error::AdapterError;
use crate::models::{DocKind, EventFields, RawItem, RawItemError, Source, TypedFields};

/// One record from the native calendar store.
#[derive(Debug, Clone)]
pub struct NativeEvent {
    /// iCalendar UID; stable across runs.
    pub uid: String,
    pub title: String,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<String>,
    pub status: Option<String>,
    pub recurrence: Option<String>,
    /// Epoch seconds.
    pub start: i64,
    pub end: i64,
    /// Epoch seconds of the last modification; the cursor dimension.
    pub updated_at: i64,
}

/// Narrow contract to the OS calendar store.
pub trait CalendarStoreReader: Send + Sync {
    fn probe(&self) -> ProbeStatus;

    /// Records with `updated_at > since`, ascending by `updated_at`.
    fn fetch_since(
        &self,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeEvent>, AdapterError>;
}

pub struct CalendarAdapter {
    reader: Box<dyn CalendarStoreReader>,
}

impl CalendarAdapter {
    pub fn new(reader: Box<dyn CalendarStoreReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl SourceAdapter for CalendarAdapter {
    fn source(&self) -> Source {
        Source::Calendar
    }

    async fn probe(&self) -> ProbeStatus {
        self.reader.probe()
    }

    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError> {
        let since_ts = since.and_then(|s| s.parse::<i64>().ok());
        let records = self.reader.fetch_since(since_ts, max_items)?;

        let mut items = Vec::with_capacity(records.len());
        let mut last_ts = since_ts;

        for record in records {
            last_ts = Some(record.updated_at.max(last_ts.unwrap_or(i64::MIN)));
            items.push(translate(record));
        }

        Ok(Pull {
            items,
            cursor: last_ts.map(|t| t.to_string()),
        })
    }
}

fn translate(record: NativeEvent) -> Result<RawItem, RawItemError> {
    if record.uid.trim().is_empty() {
        return Err(RawItemError {
            native_id: String::new(),
            reason: "missing event uid".to_string(),
        });
    }
    if record.end < record.start {
        return Err(RawItemError {
            native_id: record.uid.clone(),
            reason: "event ends before it starts".to_string(),
        });
    }

    let title = record.title.trim().to_string();
    let mut lines = vec![title.clone()];
    if let Some(notes) = record.notes.as_deref() {
        if !notes.trim().is_empty() {
            lines.push(notes.trim().to_string());
        }
    }
    if let Some(location) = record.location.as_deref() {
        if !location.trim().is_empty() {
            lines.push(format!("Location: {}", location.trim()));
        }
    }
    if !record.attendees.is_empty() {
        lines.push(format!("Attendees: {}", record.attendees.join(", ")));
    }
    let content = lines.join("\n\n");

    let mut participants = record.attendees.clone();
    if let Some(org) = &record.organizer {
        participants.push(org.clone());
    }

    let metadata = serde_json::json!({
        "participants": participants,
        "location": record.location.clone(),
        "status": record.status.clone(),
    });

    Ok(RawItem {
        source_native_id: record.uid.clone(),
        kind: DocKind::Event,
        title,
        content,
        created_at: record.start,
        updated_at: record.updated_at,
        metadata,
        typed_fields: TypedFields::Event(EventFields {
            start: record.start,
            end: record.end,
            location: record.location,
            organizer: record.organizer,
            attendees: record.attendees,
            status: record.status,
            recurrence: record.recurrence,
        }),
        cursor_hint: Some(record.updated_at.to_string()),
    })
}
