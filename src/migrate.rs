//! Database schema migrations.
//!
//! The schema is defined by an ordered list of forward-only migrations,
//! applied at open and recorded in the `schema_migrations` ledger. Each
//! migration is a multi-statement SQL text executed in its own transaction;
//! a failure rolls back that migration only and reports the offending
//! statement with a bounded excerpt.
//!
//! Statement splitting is comment- and string-aware and tracks compound-block
//! depth (`BEGIN`/`CASE` … `END`) so the FTS-sync triggers survive the split.

use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::logging::{self, LogEvent};

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: r#"
-- Core document store. doc_id is a pure function of (source, source_native_id).
CREATE TABLE documents (
    doc_id           TEXT PRIMARY KEY,
    source           TEXT NOT NULL,
    kind             TEXT NOT NULL,
    title            TEXT NOT NULL DEFAULT '',
    content          TEXT NOT NULL,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    ingested_at      INTEGER NOT NULL,
    source_native_id TEXT NOT NULL,
    content_hash     TEXT NOT NULL,
    metadata         TEXT NOT NULL DEFAULT '{}',
    chunked_hash     TEXT,
    UNIQUE(source, source_native_id)
);

CREATE INDEX idx_documents_source ON documents(source);
CREATE INDEX idx_documents_kind ON documents(kind);
CREATE INDEX idx_documents_updated_at ON documents(updated_at DESC);

-- Typed side tables, one per kind. Rows live and die with their document.
CREATE TABLE emails (
    doc_id       TEXT PRIMARY KEY REFERENCES documents(doc_id) ON DELETE CASCADE,
    from_address TEXT NOT NULL DEFAULT '',
    to_addresses TEXT NOT NULL DEFAULT '[]',
    cc_addresses TEXT NOT NULL DEFAULT '[]',
    subject      TEXT NOT NULL DEFAULT '',
    thread_id    TEXT,
    message_id   TEXT,
    in_reply_to  TEXT
);

CREATE TABLE events (
    doc_id     TEXT PRIMARY KEY REFERENCES documents(doc_id) ON DELETE CASCADE,
    start_at   INTEGER NOT NULL DEFAULT 0,
    end_at     INTEGER NOT NULL DEFAULT 0,
    location   TEXT,
    organizer  TEXT,
    attendees  TEXT NOT NULL DEFAULT '[]',
    status     TEXT,
    recurrence TEXT
);

CREATE TABLE messages (
    doc_id     TEXT PRIMARY KEY REFERENCES documents(doc_id) ON DELETE CASCADE,
    handle     TEXT NOT NULL DEFAULT '',
    service    TEXT NOT NULL DEFAULT '',
    is_from_me INTEGER NOT NULL DEFAULT 0,
    chat_id    TEXT
);

CREATE TABLE contacts (
    doc_id          TEXT PRIMARY KEY REFERENCES documents(doc_id) ON DELETE CASCADE,
    primary_phone   TEXT,
    secondary_phone TEXT,
    primary_email   TEXT,
    secondary_email TEXT,
    organization    TEXT,
    title           TEXT
);

CREATE TABLE chat_messages (
    doc_id     TEXT PRIMARY KEY REFERENCES documents(doc_id) ON DELETE CASCADE,
    chat_jid   TEXT NOT NULL DEFAULT '',
    sender     TEXT NOT NULL DEFAULT '',
    is_from_me INTEGER NOT NULL DEFAULT 0,
    media_kind TEXT
);

-- Chunks cover document content deterministically; ordinals are contiguous.
CREATE TABLE chunks (
    chunk_id   TEXT PRIMARY KEY,
    doc_id     TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
    ordinal    INTEGER NOT NULL,
    text       TEXT NOT NULL,
    char_start INTEGER NOT NULL,
    char_end   INTEGER NOT NULL,
    UNIQUE(doc_id, ordinal)
);

CREATE INDEX idx_chunks_doc_id ON chunks(doc_id);

-- One vector per chunk per active model; little-endian f32 blob.
CREATE TABLE embeddings (
    chunk_id   TEXT PRIMARY KEY REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    model_id   TEXT NOT NULL,
    dim        INTEGER NOT NULL,
    vector     BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX idx_embeddings_model ON embeddings(model_id);

CREATE TABLE sources_cursor (
    source          TEXT PRIMARY KEY,
    position        TEXT NOT NULL,
    last_success_at INTEGER NOT NULL
);

/* The FTS index exposes only the tokenizable columns; snippets come from
   the fts5 snippet() function, never a stored column. */
CREATE VIRTUAL TABLE documents_fts USING fts5(
    title,
    content,
    content='documents',
    content_rowid='rowid',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE TRIGGER documents_fts_ai AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;

CREATE TRIGGER documents_fts_ad AFTER DELETE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
END;

CREATE TRIGGER documents_fts_au AFTER UPDATE OF title, content ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
    INSERT INTO documents_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;
"#,
}];

/// Apply all pending migrations. Called by `Store::open`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let applied = applied.unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= applied {
            continue;
        }
        apply_one(pool, migration).await?;
        logging::emit(&LogEvent::MigrationApplied {
            version: migration.version,
        });
    }

    Ok(())
}

/// Current schema version per the ledger (0 before any migration).
pub async fn schema_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

async fn apply_one(pool: &SqlitePool, migration: &Migration) -> Result<(), StoreError> {
    let statements = split_statements(migration.sql);
    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    for stmt in &statements {
        if let Err(err) = sqlx::query(stmt).execute(&mut *tx).await {
            // Roll back this migration only; earlier versions stay applied.
            let _ = tx.rollback().await;
            return Err(StoreError::MigrationFailed {
                version: migration.version,
                statement: format!("{} ({})", excerpt(stmt), err),
            });
        }
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
        .bind(migration.version)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

    tx.commit().await.map_err(StoreError::from)?;
    Ok(())
}

/// Bounded single-line excerpt of a failing statement for error reports.
fn excerpt(stmt: &str) -> String {
    let flat: String = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > 160 {
        let mut cut = 160;
        while !flat.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &flat[..cut])
    } else {
        flat
    }
}

/// Split a migration text into executable statements.
///
/// Strips line (`--`) and block (`/* */`) comments, passes string literals
/// and quoted identifiers through untouched, and only treats `;` as a
/// boundary at compound-block depth zero. Depth increases on `BEGIN`/`CASE`
/// and decreases on `END`, which keeps trigger bodies in one statement.
fn split_statements(sql: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        LineComment,
        BlockComment,
        SingleQuote,
        DoubleQuote,
    }

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut word = String::new();
    let mut depth: usize = 0;
    let mut state = State::Normal;

    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                    current.push('\n');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                    current.push(' ');
                }
            }
            State::SingleQuote => {
                current.push(c);
                if c == '\'' {
                    // '' is an escaped quote, not a terminator
                    if chars.peek() == Some(&'\'') {
                        current.push(chars.next().unwrap());
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuote => {
                current.push(c);
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::Normal => {
                if c.is_ascii_alphanumeric() || c == '_' {
                    word.push(c);
                    current.push(c);
                    continue;
                }
                // A word just ended; adjust compound depth.
                match word.to_ascii_uppercase().as_str() {
                    "BEGIN" | "CASE" => depth += 1,
                    "END" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                word.clear();

                match c {
                    '-' if chars.peek() == Some(&'-') => {
                        chars.next();
                        state = State::LineComment;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        state = State::BlockComment;
                    }
                    '\'' => {
                        current.push(c);
                        state = State::SingleQuote;
                    }
                    '"' => {
                        current.push(c);
                        state = State::DoubleQuote;
                    }
                    ';' if depth == 0 => {
                        let stmt = current.trim().to_string();
                        if !stmt.is_empty() {
                            statements.push(stmt);
                        }
                        current.clear();
                    }
                    _ => current.push(c),
                }
            }
        }
    }

    match word.to_ascii_uppercase().as_str() {
        "BEGIN" | "CASE" => depth += 1,
        "END" => depth = depth.saturating_sub(1),
        _ => {}
    }
    let _ = depth;

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_statements() {
        let sql = "CREATE TABLE a (x INTEGER);\nCREATE TABLE b (y INTEGER);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
        assert!(stmts[1].starts_with("CREATE TABLE b"));
    }

    #[test]
    fn keeps_trigger_body_in_one_statement() {
        let sql = "CREATE TABLE t (x);\n\
                   CREATE TRIGGER tr AFTER INSERT ON t BEGIN\n\
                     INSERT INTO log VALUES (new.x);\n\
                     DELETE FROM stale WHERE id = new.x;\n\
                   END;\n\
                   CREATE INDEX i ON t(x);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].contains("DELETE FROM stale"));
        assert!(stmts[1].trim_end().ends_with("END"));
    }

    #[test]
    fn strips_comments_containing_semicolons() {
        let sql = "-- leading; comment\nCREATE TABLE a (x); /* block; comment */ CREATE TABLE b (y);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(!stmts[0].contains("comment"));
    }

    #[test]
    fn string_literals_do_not_split() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("'a;b'"));
        assert!(stmts[0].contains("'it''s'"));
    }

    #[test]
    fn nested_case_inside_trigger() {
        let sql = "CREATE TRIGGER tr AFTER INSERT ON t BEGIN\n\
                     UPDATE t SET y = CASE WHEN new.x > 0 THEN 1 ELSE 0 END;\n\
                   END;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn schema_migration_text_splits_cleanly() {
        let stmts = split_statements(MIGRATIONS[0].sql);
        // Every statement is non-empty and the three triggers stay whole.
        let triggers = stmts
            .iter()
            .filter(|s| s.to_ascii_uppercase().contains("CREATE TRIGGER"))
            .count();
        assert_eq!(triggers, 3);
        for stmt in &stmts {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "SELECT ".repeat(100);
        assert!(excerpt(&long).len() <= 164);
    }
}
