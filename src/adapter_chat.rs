//! Chat adapter.
//!
//! A hybrid of two inputs:
//!
//! - the **live bridge**: an external process maintains a separate SQLite
//!   file with `chats(jid, name, last_message_time)` and `messages(id,
//!   chat_jid, sender, content, timestamp, is_from_me, media_type, filename,
//!   url)`. This adapter reads that file and never writes to it.
//! - **archival text exports**: when constructed with the bulk-import hint,
//!   plain-text chat exports are parsed as well (non-breaking-space-tolerant
//!   timestamp detection, multi-line message continuation, media-placeholder
//!   normalization).
//!
//! `(id, chat_jid)` is assumed unique per install; a collision within one
//! pull is treated as an update and logged with a diagnostic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};

use crate::adapter::{ProbeStatus, Pull, SourceAdapter};
use crate::config::ChatConfig;
use crate::error::AdapterError;
use crate::logging::{self, LogEvent};
use crate::models::{ChatFields, DocKind, RawItem, RawItemError, Source, TypedFields};

pub struct ChatAdapter {
    bridge_db_path: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
    bulk_import: bool,
}

impl ChatAdapter {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            bridge_db_path: config.bridge_db_path.clone(),
            archive_dir: config.archive_dir.clone(),
            bulk_import: false,
        }
    }

    /// Enable archive parsing for this instance (bulk-import hint).
    pub fn with_bulk_import(mut self) -> Self {
        self.bulk_import = true;
        self
    }

    async fn open_bridge(&self, path: &Path) -> Result<SqlitePool, AdapterError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| self.unavailable(e.to_string()))?
            .read_only(true)
            .create_if_missing(false);

        SqlitePool::connect_with(options)
            .await
            .map_err(|e| self.unavailable(format!("cannot open bridge db: {e}")))
    }

    fn unavailable(&self, reason: String) -> AdapterError {
        AdapterError::SourceUnavailable {
            src: Source::Chat,
            reason,
        }
    }

    async fn pull_bridge(
        &self,
        path: &Path,
        since: Option<i64>,
        max_items: Option<usize>,
    ) -> Result<(Vec<Result<RawItem, RawItemError>>, Option<i64>), AdapterError> {
        let pool = self.open_bridge(path).await?;

        let limit = max_items.map(|m| m as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT m.id, m.chat_jid, m.sender, m.content, m.timestamp, m.is_from_me,
                    m.media_type, m.filename, c.name AS chat_name
             FROM messages m
             LEFT JOIN chats c ON c.jid = m.chat_jid
             WHERE m.timestamp > ?
             ORDER BY m.timestamp ASC, m.id ASC
             LIMIT ?",
        )
        .bind(since.unwrap_or(i64::MIN))
        .bind(limit)
        .fetch_all(&pool)
        .await
        .map_err(|e| self.unavailable(format!("bridge query failed: {e}")))?;

        pool.close().await;

        let mut items = Vec::with_capacity(rows.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_ts = since;

        for row in &rows {
            let id: i64 = row.get("id");
            let chat_jid: String = row.get("chat_jid");
            let native_id = format!("{chat_jid}:{id}");
            if !seen.insert(native_id.clone()) {
                logging::emit(&LogEvent::ChatIdCollision {
                    native_id: native_id.clone(),
                });
            }

            let sender: String = row.get("sender");
            let content: Option<String> = row.get("content");
            let timestamp: i64 = row.get("timestamp");
            let is_from_me: bool = row.get::<i64, _>("is_from_me") != 0;
            let media_type: Option<String> = row.get("media_type");
            let filename: Option<String> = row.get("filename");
            let chat_name: Option<String> = row.get("chat_name");
            let chat_label = chat_name.unwrap_or_else(|| chat_jid.clone());

            last_ts = Some(timestamp.max(last_ts.unwrap_or(i64::MIN)));

            let body = match (content.as_deref().map(str::trim), media_type.as_deref()) {
                (Some(text), _) if !text.is_empty() => text.to_string(),
                (_, Some(kind)) if !kind.is_empty() => match &filename {
                    Some(f) => format!("[media: {kind} {f}]"),
                    None => format!("[media: {kind}]"),
                },
                _ => {
                    items.push(Err(RawItemError {
                        native_id,
                        reason: "message has neither content nor media".to_string(),
                    }));
                    continue;
                }
            };

            let metadata = serde_json::json!({
                "participants": [sender.clone()],
                "chat_jid": chat_jid.clone(),
                "chat_name": chat_label.clone(),
            });

            items.push(Ok(RawItem {
                source_native_id: native_id,
                kind: DocKind::Message,
                title: format!("Chat {chat_label}"),
                content: format!("[{chat_label}] {sender}: {body}"),
                created_at: timestamp,
                updated_at: timestamp,
                metadata,
                typed_fields: TypedFields::Chat(ChatFields {
                    chat_jid,
                    sender,
                    is_from_me,
                    media_kind: media_type,
                }),
                cursor_hint: Some(timestamp.to_string()),
            }));
        }

        Ok((items, last_ts))
    }

    fn pull_archives(&self, dir: &Path) -> Vec<Result<RawItem, RawItemError>> {
        let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
                .collect(),
            Err(_) => return Vec::new(),
        };
        paths.sort();

        let mut items = Vec::new();
        for path in paths {
            let chat_name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string());
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    for message in parse_archive(&text) {
                        items.push(Ok(archive_item(&chat_name, message)));
                    }
                }
                Err(e) => items.push(Err(RawItemError {
                    native_id: chat_name,
                    reason: format!("unreadable archive: {e}"),
                })),
            }
        }
        items
    }
}

#[async_trait]
impl SourceAdapter for ChatAdapter {
    fn source(&self) -> Source {
        Source::Chat
    }

    async fn probe(&self) -> ProbeStatus {
        if let Some(path) = &self.bridge_db_path {
            if path.exists() {
                return ProbeStatus::Ready;
            }
        }
        if self.bulk_import {
            if let Some(dir) = &self.archive_dir {
                if dir.exists() {
                    return ProbeStatus::Ready;
                }
            }
        }
        ProbeStatus::Unavailable("chat bridge database not found".to_string())
    }

    async fn pull(
        &self,
        since: Option<&str>,
        max_items: Option<usize>,
    ) -> Result<Pull, AdapterError> {
        let since_ts = since.and_then(|s| s.parse::<i64>().ok());

        let mut items = Vec::new();
        let mut cursor = since_ts;

        if let Some(path) = self.bridge_db_path.clone() {
            if path.exists() {
                let (bridge_items, last_ts) =
                    self.pull_bridge(&path, since_ts, max_items).await?;
                items.extend(bridge_items);
                cursor = last_ts;
            }
        }

        if self.bulk_import {
            if let Some(dir) = self.archive_dir.clone() {
                items.extend(self.pull_archives(&dir));
            }
        }

        if let Some(cap) = max_items {
            items.truncate(cap);
        }

        Ok(Pull {
            items,
            cursor: cursor.map(|t| t.to_string()),
        })
    }
}

// ============ Archive export parsing ============

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveMessage {
    pub timestamp: i64,
    pub sender: String,
    pub text: String,
    pub media_kind: Option<String>,
}

/// Parse an archival text export into messages.
///
/// Recognizes both bracketed (`[31/12/2023, 9:41:05 pm] Alice: hi`) and
/// dash (`31/12/2023, 21:41 - Alice: hi`) timestamp styles. Narrow
/// no-break spaces before the am/pm marker are tolerated. Lines without a
/// timestamp continue the previous message; lines without a sender are
/// system notices and are skipped.
pub fn parse_archive(text: &str) -> Vec<ArchiveMessage> {
    let mut messages: Vec<ArchiveMessage> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        match split_header(line) {
            Some((timestamp, rest)) => {
                let Some((sender, body)) = rest.split_once(": ") else {
                    // System notice ("Messages are end-to-end encrypted", …).
                    continue;
                };
                let (text, media_kind) = normalize_media(body.trim());
                messages.push(ArchiveMessage {
                    timestamp,
                    sender: sender.trim().to_string(),
                    text,
                    media_kind,
                });
            }
            None => {
                if let Some(prev) = messages.last_mut() {
                    prev.text.push('\n');
                    prev.text.push_str(line.trim_start_matches('\u{200e}'));
                }
            }
        }
    }

    messages
}

/// Try to split a line into (timestamp, remainder). Returns `None` when the
/// line has no recognizable timestamp prefix, which marks a continuation.
fn split_header(line: &str) -> Option<(i64, &str)> {
    let line = line.trim_start_matches('\u{200e}');

    if let Some(stripped) = line.strip_prefix('[') {
        let close = stripped.find(']')?;
        let ts = parse_timestamp(&stripped[..close])?;
        return Some((ts, stripped[close + 1..].trim_start()));
    }

    if let Some(idx) = line.find(" - ") {
        if let Some(ts) = parse_timestamp(&line[..idx]) {
            return Some((ts, &line[idx + 3..]));
        }
    }

    None
}

/// Parse `d/m/y[, ]h:mm[:ss][ am|pm]` into epoch seconds. Non-breaking and
/// narrow no-break spaces are treated as plain spaces first.
fn parse_timestamp(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '\u{a0}' | '\u{202f}' => ' ',
            other => other,
        })
        .collect();

    let (date_part, time_part) = match cleaned.split_once(',') {
        Some((d, t)) => (d.trim(), t.trim()),
        None => cleaned.trim().split_once(' ')?,
    };

    let date = parse_date(date_part)?;
    let time = parse_time(time_part.trim())?;
    Some(date.and_time(time).and_utc().timestamp())
}

fn parse_date(raw: &str) -> Option<chrono::NaiveDate> {
    let parts: Vec<&str> = raw.split(['/', '.', '-']).collect();
    if parts.len() != 3 {
        return None;
    }
    let a: u32 = parts[0].trim().parse().ok()?;
    let b: u32 = parts[1].trim().parse().ok()?;
    let mut year: i32 = parts[2].trim().parse().ok()?;
    if year < 100 {
        year += 2000;
    }

    // Day-first by default; month-first only when the first field cannot be
    // a month and the second can.
    let (day, month) = if a > 12 && b <= 12 {
        (a, b)
    } else if b > 12 && a <= 12 {
        (b, a)
    } else {
        (a, b)
    };

    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(raw: &str) -> Option<chrono::NaiveTime> {
    let lower = raw.to_ascii_lowercase();
    let (clock, meridiem) = if let Some(stripped) = lower.strip_suffix("pm") {
        (stripped.trim().to_string(), Some("pm"))
    } else if let Some(stripped) = lower.strip_suffix("am") {
        (stripped.trim().to_string(), Some("am"))
    } else {
        (lower.trim().to_string(), None)
    };

    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() < 2 || fields.len() > 3 {
        return None;
    }
    let mut hour: u32 = fields[0].trim().parse().ok()?;
    let minute: u32 = fields[1].trim().parse().ok()?;
    let second: u32 = if fields.len() == 3 {
        fields[2].trim().parse().ok()?
    } else {
        0
    };

    match meridiem {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    chrono::NaiveTime::from_hms_opt(hour, minute, second)
}

/// Normalize media placeholders to a canonical `[media: kind]` form.
fn normalize_media(body: &str) -> (String, Option<String>) {
    let stripped = body.trim_start_matches('\u{200e}').trim();
    let lower = stripped.to_ascii_lowercase();

    for kind in ["image", "video", "audio", "sticker", "gif", "document"] {
        if lower == format!("{kind} omitted") || lower == format!("<{kind} omitted>") {
            return (format!("[media: {kind}]"), Some(kind.to_string()));
        }
    }
    if lower == "<media omitted>" || lower == "media omitted" {
        return ("[media: unknown]".to_string(), Some("unknown".to_string()));
    }
    if let Some(rest) = stripped.strip_prefix("<attached: ") {
        let name = rest.trim_end_matches('>').trim();
        return (format!("[media: {name}]"), Some("attachment".to_string()));
    }

    (stripped.to_string(), None)
}

fn archive_item(chat_name: &str, message: ArchiveMessage) -> RawItem {
    // Archives carry no stable record id; derive one from the immutable
    // parts of the message so re-imports dedup instead of duplicating.
    let mut hasher = Sha256::new();
    hasher.update(chat_name.as_bytes());
    hasher.update(message.timestamp.to_le_bytes());
    hasher.update(message.sender.as_bytes());
    hasher.update(message.text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let native_id = format!("archive:{}:{}:{}", chat_name, message.timestamp, &digest[..16]);

    let metadata = serde_json::json!({
        "participants": [message.sender.clone()],
        "chat_name": chat_name,
        "archived": true,
    });

    RawItem {
        source_native_id: native_id,
        kind: DocKind::Message,
        title: format!("Chat {chat_name}"),
        content: format!("[{}] {}: {}", chat_name, message.sender, message.text),
        created_at: message.timestamp,
        updated_at: message.timestamp,
        metadata,
        typed_fields: TypedFields::Chat(ChatFields {
            chat_jid: format!("archive:{chat_name}"),
            sender: message.sender,
            is_from_me: false,
            media_kind: message.media_kind,
        }),
        cursor_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_format_with_nbsp() {
        let text = "[31/12/2023, 9:41:05\u{202f}pm] Alice: Happy new year";
        let messages = parse_archive(text);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Alice");
        assert_eq!(messages[0].text, "Happy new year");
        // 2023-12-31 21:41:05 UTC
        assert_eq!(messages[0].timestamp, 1_704_058_865);
    }

    #[test]
    fn parses_dash_format_24h() {
        let text = "31/12/2023, 21:41 - Bob: see you there";
        let messages = parse_archive(text);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Bob");
        assert_eq!(messages[0].timestamp, 1_704_058_860);
    }

    #[test]
    fn continuation_lines_extend_previous_message() {
        let text = "[1/2/2024, 8:00:00 am] Alice: first line\nsecond line\nthird line\n[1/2/2024, 8:01:00 am] Bob: reply";
        let messages = parse_archive(text);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "first line\nsecond line\nthird line");
        assert_eq!(messages[1].text, "reply");
    }

    #[test]
    fn system_notices_are_skipped() {
        let text = "[1/2/2024, 8:00:00 am] Messages are end-to-end encrypted\n[1/2/2024, 8:01:00 am] Alice: hello";
        let messages = parse_archive(text);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Alice");
    }

    #[test]
    fn media_placeholders_are_normalized() {
        let text = "[1/2/2024, 8:00:00 am] Alice: image omitted\n[1/2/2024, 8:01:00 am] Bob: <Media omitted>";
        let messages = parse_archive(text);
        assert_eq!(messages[0].text, "[media: image]");
        assert_eq!(messages[0].media_kind.as_deref(), Some("image"));
        assert_eq!(messages[1].text, "[media: unknown]");
    }

    #[test]
    fn month_first_dates_are_recognized() {
        // 12/31 can only be month/day.
        let text = "[12/31/2023, 9:41:05 pm] Alice: hi";
        let messages = parse_archive(text);
        assert_eq!(messages[0].timestamp, 1_704_058_865);
    }

    #[test]
    fn archive_items_have_stable_native_ids() {
        let message = ArchiveMessage {
            timestamp: 1_700_000_000,
            sender: "Alice".to_string(),
            text: "hello".to_string(),
            media_kind: None,
        };
        let a = archive_item("family", message.clone());
        let b = archive_item("family", message);
        assert_eq!(a.source_native_id, b.source_native_id);
        assert!(a.source_native_id.starts_with("archive:family:"));
    }

    #[tokio::test]
    async fn probe_unavailable_without_bridge() {
        let adapter = ChatAdapter::new(&ChatConfig::default());
        assert!(matches!(
            adapter.probe().await,
            ProbeStatus::Unavailable(_)
        ));
    }
}
