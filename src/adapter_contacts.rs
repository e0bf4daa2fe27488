//! Address-book adapter.
//!
//! Synthesizes searchable text for contact cards from name, organization,
//! emails, phones, and notes. The raw address-book reader is an external
//! collaborator behind [`ContactStoreReader`].

use async_trait::async_trait;

use crate::adapter::{ProbeStatus, Pull, SourceAdapter};
use crate::error::AdapterError;
use crate::models::{ContactFields, DocKind, RawItem, RawItemError, Source, TypedFields};

/// One record from the native address book.
#[derive(Debug, Clone)]
pub struct NativeContact {
    /// Stable card identifier.
    pub identifier: String,
    pub full_name: String,
    pub organization: Option<String>,
    pub job_title: Option<String>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub notes: Option<String>,
    /// Epoch seconds of the last modification; the cursor dimension.
    pub updated_at: i64,
}

/// Narrow contract to the OS address book.
pub trait ContactStoreReader: Send + Sync {
    fn probe(&self) -> ProbeStatus;

    /// Records with `updated_at > since`, ascending by `updated_at`.
    fn fetch_since(
        &self,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<NativeContact>, AdapterError>;
}

pub struct ContactsAdapter {
    reader: Box<dyn ContactStoreReader>,
}

impl ContactsAdapter {
    pub fn new(reader: Box<dyn ContactStoreReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl SourceAdapter for ContactsAdapter {
    fn source(&self) -> Source {
        Source::Contacts
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

fn translate(record: NativeContact) -> Result<RawItem, RawItemError> {
    if record.identifier.trim().is_empty() {
        return Err(RawItemError {
            native_id: String::new(),
            reason: "missing contact identifier".to_string(),
        });
    }
    let name = record.full_name.trim().to_string();
    if name.is_empty() {
        return Err(RawItemError {
            native_id: record.identifier.clone(),
            reason: "contact has no name".to_string(),
        });
    }

    let mut lines = vec![name.clone()];
    if let Some(org) = record.organization.as_deref() {
        if !org.trim().is_empty() {
            match record.job_title.as_deref() {
                Some(title) if !title.trim().is_empty() => {
                    lines.push(format!("{} at {}", title.trim(), org.trim()))
                }
                _ => lines.push(org.trim().to_string()),
            }
        }
    }
    if !record.emails.is_empty() {
        lines.push(format!("Email: {}", record.emails.join(", ")));
    }
    if !record.phones.is_empty() {
        lines.push(format!("Phone: {}", record.phones.join(", ")));
    }
    if let Some(notes) = record.notes.as_deref() {
        if !notes.trim().is_empty() {
            lines.push(notes.trim().to_string());
        }
    }
    let content = lines.join("\n\n");

    let mut participants = vec![name.clone()];
    participants.extend(record.emails.iter().cloned());
    participants.extend(record.phones.iter().cloned());

    let metadata = serde_json::json!({
        "participants": participants,
        "organization": record.organization.clone(),
    });

    let mut phones = record.phones.into_iter();
    let mut emails = record.emails.into_iter();

    Ok(RawItem {
        source_native_id: record.identifier.clone(),
        kind: DocKind::Contact,
        title: name,
        content,
        created_at: record.updated_at,
        updated_at: record.updated_at,
        metadata,
        typed_fields: TypedFields::Contact(ContactFields {
            primary_phone: phones.next(),
            secondary_phone: phones.next(),
            primary_email: emails.next(),
            secondary_email: emails.next(),
            organization: record.organization,
            title: record.job_title,
        }),
        cursor_hint: Some(record.updated_at.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixtureReader(Vec<NativeContact>);

    impl ContactStoreReader for FixtureReader {
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

    fn card() -> NativeContact {
        NativeContact {
            identifier: "card-1".to_string(),
            full_name: "Ana Torres".to_string(),
            organization: Some("Acme".to_string()),
            job_title: Some("CFO".to_string()),
            phones: vec!["+15550001".to_string(), "+15550002".to_string()],
            emails: vec!["ana@acme.com".to_string()],
            notes: Some("Met at the offsite".to_string()),
            updated_at: 1_700_000_900,
        }
    }

    #[tokio::test]
    async fn content_and_typed_fields_are_synthesized() {
        let adapter = ContactsAdapter::new(Box::new(FixtureReader(vec![card()])));
        let pull = adapter.pull(None, None).await.unwrap();
        let item = pull.items[0].as_ref().unwrap();
        assert_eq!(item.title, "Ana Torres");
        assert!(item.content.contains("CFO at Acme"));
        assert!(item.content.contains("Email: ana@acme.com"));
        match &item.typed_fields {
            TypedFields::Contact(f) => {
                assert_eq!(f.primary_phone.as_deref(), Some("+15550001"));
                assert_eq!(f.secondary_phone.as_deref(), Some("+15550002"));
                assert_eq!(f.primary_email.as_deref(), Some("ana@acme.com"));
                assert_eq!(f.secondary_email, None);
            }
            other => panic!("unexpected fields: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nameless_card_is_in_band_error() {
        let mut bad = card();
        bad.full_name = "  ".to_string();
        let adapter = ContactsAdapter::new(Box::new(FixtureReader(vec![bad])));
        let pull = adapter.pull(None, None).await.unwrap();
        assert!(pull.items[0].is_err());
    }
}
