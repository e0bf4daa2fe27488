//! The durable document store.
//!
//! Wraps the SQLite pool with the write discipline the rest of the engine
//! relies on: a single exclusive writer, explicit transactions per batch,
//! content-hash-aware upserts that never delete-and-reinsert a document, and
//! the primitive search operations (FTS5 BM25 and a linear cosine scan over
//! vector blobs) consumed by hybrid search.
//!
//! Readers never take the writer lock. Vector search is a brute-force scan
//! filtered by model id; the contract permits swapping in an ANN index
//! behind `search_vectors` without changing callers.

use std::path::Path;

use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;
use crate::migrate;
use crate::models::{
    ChatFields, Chunk, ContactFields, Cursor, DocKind, Document, EmailFields, EventFields,
    MessageFields, SearchFilters, Source, TypedFields, UpsertOutcome,
};

pub struct Store {
    pool: SqlitePool,
    writer: Mutex<()>,
}

/// An exclusive write transaction. Holds the store's writer lock for its
/// lifetime; readers proceed unaffected under WAL.
pub struct WriteTx<'a> {
    tx: sqlx::Transaction<'a, sqlx::Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

/// A lexical search candidate.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub doc_id: String,
    pub title: String,
    pub source: Source,
    pub updated_at: i64,
    pub metadata: String,
    /// Positive BM25 relevance (FTS5 rank negated).
    pub bm25: f64,
    pub snippet: String,
}

/// A vector search candidate, one per chunk.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub source: Source,
    pub updated_at: i64,
    pub metadata: String,
    pub cosine: f64,
    /// Text of the matching chunk, used as the snippet source.
    pub chunk_text: String,
}

/// A chunk awaiting an embedding for the active model.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
}

/// A document whose chunks are missing or stale.
#[derive(Debug, Clone)]
pub struct StaleDoc {
    pub doc_id: String,
    pub content: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStats {
    pub source: Source,
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    pub cursor_position: Option<String>,
    pub last_ingested_at: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub schema_version: i64,
    pub documents_total: i64,
    pub chunks_total: i64,
    pub chunks_embedded: i64,
    pub by_source: Vec<SourceStats>,
}

impl Store {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Store, StoreError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Store {
            pool,
            writer: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Begin an exclusive write transaction. Retries briefly on contention
    /// before surfacing `Busy` to the caller.
    pub async fn begin_write(&self) -> Result<WriteTx<'_>, StoreError> {
        let guard = self.writer.lock().await;
        let mut last_err = None;
        for attempt in 0..3u32 {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(50 << attempt)).await;
            }
            match self.pool.begin().await {
                Ok(tx) => {
                    return Ok(WriteTx {
                        tx,
                        _guard: guard,
                    })
                }
                Err(err) => {
                    let err = StoreError::from(err);
                    if matches!(err, StoreError::Busy(_)) {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Busy("write transaction".into())))
    }

    // ============ Reads ============

    /// Fetch a document and its typed side-table row.
    pub async fn fetch_document(
        &self,
        doc_id: &str,
    ) -> Result<(Document, TypedFields), StoreError> {
        let row = sqlx::query(
            "SELECT doc_id, source, kind, title, content, created_at, updated_at, ingested_at,
                    source_native_id, content_hash, metadata
             FROM documents WHERE doc_id = ?",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(doc_id.to_string()))?;
        let doc = document_from_row(&row)?;
        let typed = self.fetch_typed_fields(&doc.doc_id, doc.kind, doc.source).await?;
        Ok((doc, typed))
    }

    async fn fetch_typed_fields(
        &self,
        doc_id: &str,
        kind: DocKind,
        source: Source,
    ) -> Result<TypedFields, StoreError> {
        match kind {
            DocKind::Email => {
                let row = sqlx::query(
                    "SELECT from_address, to_addresses, cc_addresses, subject, thread_id,
                            message_id, in_reply_to
                     FROM emails WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(r) => TypedFields::Email(EmailFields {
                        from: r.get("from_address"),
                        to: json_list(r.get("to_addresses")),
                        cc: json_list(r.get("cc_addresses")),
                        subject: r.get("subject"),
                        thread_id: r.get("thread_id"),
                        message_id: r.get("message_id"),
                        in_reply_to: r.get("in_reply_to"),
                    }),
                    None => TypedFields::None,
                })
            }
            DocKind::Event => {
                let row = sqlx::query(
                    "SELECT start_at, end_at, location, organizer, attendees, status, recurrence
                     FROM events WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(r) => TypedFields::Event(EventFields {
                        start: r.get("start_at"),
                        end: r.get("end_at"),
                        location: r.get("location"),
                        organizer: r.get("organizer"),
                        attendees: json_list(r.get("attendees")),
                        status: r.get("status"),
                        recurrence: r.get("recurrence"),
                    }),
                    None => TypedFields::None,
                })
            }
            DocKind::Message if source == Source::Chat => {
                let row = sqlx::query(
                    "SELECT chat_jid, sender, is_from_me, media_kind
                     FROM chat_messages WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(r) => TypedFields::Chat(ChatFields {
                        chat_jid: r.get("chat_jid"),
                        sender: r.get("sender"),
                        is_from_me: r.get::<i64, _>("is_from_me") != 0,
                        media_kind: r.get("media_kind"),
                    }),
                    None => TypedFields::None,
                })
            }
            DocKind::Message => {
                let row = sqlx::query(
                    "SELECT handle, service, is_from_me, chat_id FROM messages WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(r) => TypedFields::Message(MessageFields {
                        handle: r.get("handle"),
                        service: r.get("service"),
                        is_from_me: r.get::<i64, _>("is_from_me") != 0,
                        chat_id: r.get("chat_id"),
                    }),
                    None => TypedFields::None,
                })
            }
            DocKind::Contact => {
                let row = sqlx::query(
                    "SELECT primary_phone, secondary_phone, primary_email, secondary_email,
                            organization, title
                     FROM contacts WHERE doc_id = ?",
                )
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(r) => TypedFields::Contact(ContactFields {
                        primary_phone: r.get("primary_phone"),
                        secondary_phone: r.get("secondary_phone"),
                        primary_email: r.get("primary_email"),
                        secondary_email: r.get("secondary_email"),
                        organization: r.get("organization"),
                        title: r.get("title"),
                    }),
                    None => TypedFields::None,
                })
            }
            _ => Ok(TypedFields::None),
        }
    }

    pub async fn get_cursor(&self, source: Source) -> Result<Option<Cursor>, StoreError> {
        let row = sqlx::query(
            "SELECT position, last_success_at FROM sources_cursor WHERE source = ?",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Cursor {
            source,
            position: r.get("position"),
            last_success_at: r.get("last_success_at"),
        }))
    }

    /// Full-text search over `(title, content)` with BM25 ranking and
    /// engine-produced snippets. Filters that map to indexed columns are
    /// applied in SQL.
    pub async fn search_fts(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<FtsHit>, StoreError> {
        let match_expr = match fts_match_expr(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let mut sql = String::from(
            "SELECT d.doc_id, d.title, d.source, d.updated_at, d.metadata,
                    bm25(documents_fts) AS rank,
                    snippet(documents_fts, 1, '[', ']', '…', 24) AS snip
             FROM documents_fts
             JOIN documents d ON d.rowid = documents_fts.rowid
             WHERE documents_fts MATCH ?",
        );
        push_filter_sql(&mut sql, filters);
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(&match_expr);
        q = bind_filters(q, filters);
        q = q.bind(limit as i64);

        let rows = q.fetch_all(&self.pool).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.get("source");
            let source = match Source::parse(&source) {
                Some(s) => s,
                None => continue,
            };
            let rank: f64 = row.get("rank");
            hits.push(FtsHit {
                doc_id: row.get("doc_id"),
                title: row.get("title"),
                source,
                updated_at: row.get("updated_at"),
                metadata: row.get("metadata"),
                bm25: -rank,
                snippet: row.get("snip"),
            });
        }
        Ok(hits)
    }

    /// Linear cosine scan over stored vectors for `model_id`, best-first.
    pub async fn search_vectors(
        &self,
        query_vec: &[f32],
        limit: usize,
        model_id: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let mut sql = String::from(
            "SELECT e.chunk_id, e.vector, c.text, d.doc_id, d.title, d.source, d.updated_at,
                    d.metadata
             FROM embeddings e
             JOIN chunks c ON c.chunk_id = e.chunk_id
             JOIN documents d ON d.doc_id = c.doc_id
             WHERE e.model_id = ?",
        );
        push_filter_sql(&mut sql, filters);

        let mut q = sqlx::query(&sql).bind(model_id);
        q = bind_filters(q, filters);

        let rows = q.fetch_all(&self.pool).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.get("source");
            let source = match Source::parse(&source) {
                Some(s) => s,
                None => continue,
            };
            let blob: Vec<u8> = row.get("vector");
            let vec = blob_to_vec(&blob);
            let cosine = cosine_similarity(query_vec, &vec) as f64;
            hits.push(VectorHit {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                title: row.get("title"),
                source,
                updated_at: row.get("updated_at"),
                metadata: row.get("metadata"),
                cosine,
                chunk_text: row.get("text"),
            });
        }

        hits.sort_by(|a, b| {
            b.cosine
                .partial_cmp(&a.cosine)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Documents whose chunks are missing or built from older content.
    pub async fn stale_documents(&self, limit: usize) -> Result<Vec<StaleDoc>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc_id, content, content_hash FROM documents
             WHERE chunked_hash IS NULL OR chunked_hash != content_hash
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| StaleDoc {
                doc_id: r.get("doc_id"),
                content: r.get("content"),
                content_hash: r.get("content_hash"),
            })
            .collect())
    }

    /// Chunks lacking an embedding for the active model, in document order.
    pub async fn pending_chunks(
        &self,
        model_id: &str,
        limit: usize,
    ) -> Result<Vec<PendingChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.chunk_id, c.doc_id, c.text
             FROM chunks c
             LEFT JOIN embeddings e ON e.chunk_id = c.chunk_id AND e.model_id = ?
             WHERE e.chunk_id IS NULL
             ORDER BY c.doc_id, c.ordinal
             LIMIT ?",
        )
        .bind(model_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| PendingChunk {
                chunk_id: r.get("chunk_id"),
                doc_id: r.get("doc_id"),
                text: r.get("text"),
            })
            .collect())
    }

    /// Delete embeddings written under any model other than `model_id`.
    pub async fn purge_embeddings_except(&self, model_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.begin_write().await?;
        let result = sqlx::query("DELETE FROM embeddings WHERE model_id != ?")
            .bind(model_id)
            .execute(&mut *tx.tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Titles of all contact documents, used by the planner's name extractor.
    pub async fn contact_names(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT title FROM documents WHERE source = 'contacts' AND title != '' ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn stats(&self, model_id: &str) -> Result<StoreStats, StoreError> {
        let schema_version = migrate::schema_version(&self.pool).await?;

        let documents_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let chunks_embedded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE model_id = ?")
                .bind(model_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            "SELECT d.source,
                    COUNT(DISTINCT d.doc_id) AS documents,
                    COUNT(DISTINCT c.chunk_id) AS chunks,
                    COUNT(DISTINCT e.chunk_id) AS embedded
             FROM documents d
             LEFT JOIN chunks c ON c.doc_id = d.doc_id
             LEFT JOIN embeddings e ON e.chunk_id = c.chunk_id AND e.model_id = ?
             GROUP BY d.source
             ORDER BY documents DESC",
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await?;

        let cursor_rows = sqlx::query("SELECT source, position, last_success_at FROM sources_cursor")
            .fetch_all(&self.pool)
            .await?;

        let mut by_source = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.get("source");
            let source = match Source::parse(&source) {
                Some(s) => s,
                None => continue,
            };
            let cursor = cursor_rows.iter().find(|c| {
                let cs: String = c.get("source");
                cs == source.as_str()
            });
            by_source.push(SourceStats {
                source,
                documents: row.get("documents"),
                chunks: row.get("chunks"),
                embedded: row.get("embedded"),
                cursor_position: cursor.map(|c| c.get("position")),
                last_ingested_at: cursor.map(|c| c.get("last_success_at")),
            });
        }

        Ok(StoreStats {
            schema_version,
            documents_total,
            chunks_total,
            chunks_embedded,
            by_source,
        })
    }
}

impl<'a> WriteTx<'a> {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::from)
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::from)
    }

    /// Content-hash-aware upsert. Never deletes the document row: an
    /// existing `doc_id` is updated in place so side-table foreign keys stay
    /// valid throughout. The typed side row is written in the same
    /// transaction as the document.
    pub async fn upsert_document(
        &mut self,
        doc: &Document,
        fields: &TypedFields,
    ) -> Result<UpsertOutcome, StoreError> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM documents WHERE doc_id = ?")
                .bind(&doc.doc_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        let metadata = doc.metadata.to_string();

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO documents (doc_id, source, kind, title, content, created_at,
                                            updated_at, ingested_at, source_native_id,
                                            content_hash, metadata)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&doc.doc_id)
                .bind(doc.source.as_str())
                .bind(doc.kind.as_str())
                .bind(&doc.title)
                .bind(&doc.content)
                .bind(doc.created_at)
                .bind(doc.updated_at)
                .bind(doc.ingested_at)
                .bind(&doc.source_native_id)
                .bind(&doc.content_hash)
                .bind(&metadata)
                .execute(&mut *self.tx)
                .await?;

                self.upsert_typed_fields(&doc.doc_id, fields).await?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(hash) if hash == doc.content_hash => {
                sqlx::query("UPDATE documents SET ingested_at = ? WHERE doc_id = ?")
                    .bind(doc.ingested_at)
                    .bind(&doc.doc_id)
                    .execute(&mut *self.tx)
                    .await?;
                Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => {
                // In-place update; chunked_hash is left behind so the next
                // chunking pass sees the document as stale.
                sqlx::query(
                    "UPDATE documents
                     SET title = ?, content = ?, updated_at = ?, ingested_at = ?,
                         content_hash = ?, metadata = ?
                     WHERE doc_id = ?",
                )
                .bind(&doc.title)
                .bind(&doc.content)
                .bind(doc.updated_at)
                .bind(doc.ingested_at)
                .bind(&doc.content_hash)
                .bind(&metadata)
                .bind(&doc.doc_id)
                .execute(&mut *self.tx)
                .await?;

                self.upsert_typed_fields(&doc.doc_id, fields).await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn upsert_typed_fields(
        &mut self,
        doc_id: &str,
        fields: &TypedFields,
    ) -> Result<(), StoreError> {
        match fields {
            TypedFields::Email(f) => {
                sqlx::query(
                    "INSERT INTO emails (doc_id, from_address, to_addresses, cc_addresses,
                                         subject, thread_id, message_id, in_reply_to)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(doc_id) DO UPDATE SET
                        from_address = excluded.from_address,
                        to_addresses = excluded.to_addresses,
                        cc_addresses = excluded.cc_addresses,
                        subject = excluded.subject,
                        thread_id = excluded.thread_id,
                        message_id = excluded.message_id,
                        in_reply_to = excluded.in_reply_to",
                )
                .bind(doc_id)
                .bind(&f.from)
                .bind(json_string(&f.to))
                .bind(json_string(&f.cc))
                .bind(&f.subject)
                .bind(&f.thread_id)
                .bind(&f.message_id)
                .bind(&f.in_reply_to)
                .execute(&mut *self.tx)
                .await?;
            }
            TypedFields::Event(f) => {
                sqlx::query(
                    "INSERT INTO events (doc_id, start_at, end_at, location, organizer,
                                         attendees, status, recurrence)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(doc_id) DO UPDATE SET
                        start_at = excluded.start_at,
                        end_at = excluded.end_at,
                        location = excluded.location,
                        organizer = excluded.organizer,
                        attendees = excluded.attendees,
                        status = excluded.status,
                        recurrence = excluded.recurrence",
                )
                .bind(doc_id)
                .bind(f.start)
                .bind(f.end)
                .bind(&f.location)
                .bind(&f.organizer)
                .bind(json_string(&f.attendees))
                .bind(&f.status)
                .bind(&f.recurrence)
                .execute(&mut *self.tx)
                .await?;
            }
            TypedFields::Message(f) => {
                sqlx::query(
                    "INSERT INTO messages (doc_id, handle, service, is_from_me, chat_id)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(doc_id) DO UPDATE SET
                        handle = excluded.handle,
                        service = excluded.service,
                        is_from_me = excluded.is_from_me,
                        chat_id = excluded.chat_id",
                )
                .bind(doc_id)
                .bind(&f.handle)
                .bind(&f.service)
                .bind(f.is_from_me as i64)
                .bind(&f.chat_id)
                .execute(&mut *self.tx)
                .await?;
            }
            TypedFields::Contact(f) => {
                sqlx::query(
                    "INSERT INTO contacts (doc_id, primary_phone, secondary_phone, primary_email,
                                           secondary_email, organization, title)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(doc_id) DO UPDATE SET
                        primary_phone = excluded.primary_phone,
                        secondary_phone = excluded.secondary_phone,
                        primary_email = excluded.primary_email,
                        secondary_email = excluded.secondary_email,
                        organization = excluded.organization,
                        title = excluded.title",
                )
                .bind(doc_id)
                .bind(&f.primary_phone)
                .bind(&f.secondary_phone)
                .bind(&f.primary_email)
                .bind(&f.secondary_email)
                .bind(&f.organization)
                .bind(&f.title)
                .execute(&mut *self.tx)
                .await?;
            }
            TypedFields::Chat(f) => {
                sqlx::query(
                    "INSERT INTO chat_messages (doc_id, chat_jid, sender, is_from_me, media_kind)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(doc_id) DO UPDATE SET
                        chat_jid = excluded.chat_jid,
                        sender = excluded.sender,
                        is_from_me = excluded.is_from_me,
                        media_kind = excluded.media_kind",
                )
                .bind(doc_id)
                .bind(&f.chat_jid)
                .bind(&f.sender)
                .bind(f.is_from_me as i64)
                .bind(&f.media_kind)
                .execute(&mut *self.tx)
                .await?;
            }
            TypedFields::None => {}
        }
        Ok(())
    }

    /// Delete all rows for a source; side tables, chunks, and embeddings
    /// follow through cascades.
    pub async fn delete_by_source(&mut self, source: Source) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE source = ?")
            .bind(source.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_cursor(&mut self, source: Source, position: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO sources_cursor (source, position, last_success_at) VALUES (?, ?, ?)
             ON CONFLICT(source) DO UPDATE SET
                position = excluded.position,
                last_success_at = excluded.last_success_at",
        )
        .bind(source.as_str())
        .bind(position)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn clear_cursor(&mut self, source: Source) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sources_cursor WHERE source = ?")
            .bind(source.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Replace a document's chunks and advance its chunking watermark.
    /// Old embeddings disappear with the old chunks via cascade.
    pub async fn replace_chunks(
        &mut self,
        doc_id: &str,
        chunks: &[Chunk],
        content_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *self.tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (chunk_id, doc_id, ordinal, text, char_start, char_end)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .execute(&mut *self.tx)
            .await?;
        }

        sqlx::query("UPDATE documents SET chunked_hash = ? WHERE doc_id = ?")
            .bind(content_hash)
            .bind(doc_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    pub async fn insert_embedding(
        &mut self,
        chunk_id: &str,
        vector: &[f32],
        model_id: &str,
    ) -> Result<(), StoreError> {
        let blob = vec_to_blob(vector);
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO embeddings (chunk_id, model_id, dim, vector, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chunk_id) DO UPDATE SET
                model_id = excluded.model_id,
                dim = excluded.dim,
                vector = excluded.vector,
                created_at = excluded.created_at",
        )
        .bind(chunk_id)
        .bind(model_id)
        .bind(vector.len() as i64)
        .bind(&blob)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

// ============ Helpers ============

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StoreError> {
    let source: String = row.get("source");
    let kind: String = row.get("kind");
    let metadata: String = row.get("metadata");
    Ok(Document {
        doc_id: row.get("doc_id"),
        source: Source::parse(&source)
            .ok_or_else(|| StoreError::ConstraintViolation(format!("unknown source: {source}")))?,
        kind: DocKind::parse(&kind)
            .ok_or_else(|| StoreError::ConstraintViolation(format!("unknown kind: {kind}")))?,
        title: row.get("title"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        ingested_at: row.get("ingested_at"),
        source_native_id: row.get("source_native_id"),
        content_hash: row.get("content_hash"),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn json_string(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

/// Build an FTS5 MATCH expression from free text: each alphanumeric token is
/// quoted and OR-joined so punctuation never produces a syntax error and
/// partial term matches still rank.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" OR "))
}

fn push_filter_sql(sql: &mut String, filters: &SearchFilters) {
    if !filters.sources.is_empty() {
        sql.push_str(" AND d.source IN (");
        sql.push_str(&placeholders(filters.sources.len()));
        sql.push(')');
    }
    if !filters.kinds.is_empty() {
        sql.push_str(" AND d.kind IN (");
        sql.push_str(&placeholders(filters.kinds.len()));
        sql.push(')');
    }
    if filters.time_range.is_some() {
        sql.push_str(" AND d.updated_at >= ? AND d.updated_at <= ?");
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_filters<'q>(mut q: SqliteQuery<'q>, filters: &'q SearchFilters) -> SqliteQuery<'q> {
    for source in &filters.sources {
        q = q.bind(source.as_str());
    }
    for kind in &filters.kinds {
        q = q.bind(kind.as_str());
    }
    if let Some((from, to)) = filters.time_range {
        q = q.bind(from).bind(to);
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expr_quotes_and_ors_tokens() {
        assert_eq!(
            fts_match_expr("basketball meeting"),
            Some("\"basketball\" OR \"meeting\"".to_string())
        );
        assert_eq!(
            fts_match_expr("what's next?"),
            Some("\"what\" OR \"s\" OR \"next\"".to_string())
        );
        assert_eq!(fts_match_expr("  ?!  "), None);
    }

    #[test]
    fn filter_sql_shape() {
        let mut sql = String::from("SELECT 1 WHERE x = ?");
        let filters = SearchFilters {
            sources: vec![Source::Mail, Source::Messages],
            kinds: vec![DocKind::Email],
            time_range: Some((0, 10)),
            participants: vec![],
        };
        push_filter_sql(&mut sql, &filters);
        assert!(sql.contains("d.source IN (?, ?)"));
        assert!(sql.contains("d.kind IN (?)"));
        assert!(sql.contains("d.updated_at >= ?"));
    }
}
