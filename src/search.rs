//! Hybrid lexical + semantic search.
//!
//! Executes BM25 (FTS5) and cosine (vector scan) retrieval concurrently and
//! fuses them into one ranking:
//!
//! 1. Embed the query synchronously under a short timeout; on miss, degrade
//!    to lexical-only and mark the result.
//! 2. Fetch `2 × limit` candidates from each channel, with indexable
//!    filters applied at the store.
//! 3. Collapse vector hits from chunks to documents by max cosine, carrying
//!    the winning chunk's text as the snippet.
//! 4. Normalize each channel by its max observed score (a zero max
//!    contributes zero).
//! 5. Fuse: `w_bm25 · bm25_norm + w_vec · cosine_norm`.
//! 6. Walk the descending threshold ladder until enough results survive;
//!    fall back to the recall floor so hard queries still answer.
//! 7. Order by fused score desc, `updated_at` desc, `doc_id` asc.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::EmbedClient;
use crate::error::QueryError;
use crate::logging::{self, LogEvent};
use crate::models::{SearchFilters, SearchHit, SearchMode, Source};
use crate::store::Store;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub mode: SearchMode,
}

/// One document accumulated from either or both channels before fusion.
#[derive(Debug, Clone)]
struct DocCandidate {
    doc_id: String,
    title: String,
    source: Source,
    updated_at: i64,
    metadata: String,
    bm25: f64,
    cosine: f64,
    snippet: String,
}

pub async fn hybrid_search(
    store: &Store,
    embedder: &EmbedClient,
    config: &Config,
    query: &str,
    filters: &SearchFilters,
    limit: usize,
) -> Result<SearchResponse, QueryError> {
    let limit = limit.max(1);
    if query.trim().is_empty() {
        return Ok(SearchResponse {
            hits: Vec::new(),
            mode: SearchMode::Normal,
        });
    }

    let candidate_k = limit * config.retrieval.candidate_multiplier.max(1);

    // Query embedding, degraded to lexical-only on any miss.
    let query_vec = match embedder.embed_query(query).await {
        Ok(vec) => Some(vec),
        Err(err) => {
            logging::emit(&LogEvent::SearchDegraded {
                reason: err.to_string(),
            });
            None
        }
    };

    let fts_deadline = Duration::from_secs(config.timeouts.fts_query_secs);
    let vector_deadline = Duration::from_secs(config.timeouts.vector_scan_secs);
    let model_id = embedder.model_id();

    let fts_fut = tokio::time::timeout(fts_deadline, store.search_fts(query, candidate_k, filters));
    let vec_fut = async {
        match &query_vec {
            Some(qv) => {
                tokio::time::timeout(
                    vector_deadline,
                    store.search_vectors(qv, candidate_k, model_id, filters),
                )
                .await
            }
            None => Ok(Ok(Vec::new())),
        }
    };

    let (fts_result, vec_result) = tokio::join!(fts_fut, vec_fut);

    let fts_hits = fts_result
        .map_err(|_| QueryError::SearchFailed("lexical query timed out".to_string()))?
        .map_err(|e| QueryError::SearchFailed(e.to_string()))?;
    let vector_hits = vec_result
        .map_err(|_| QueryError::SearchFailed("vector scan timed out".to_string()))?
        .map_err(|e| QueryError::SearchFailed(e.to_string()))?;

    let mode = if query_vec.is_some() && !vector_hits.is_empty() {
        SearchMode::Normal
    } else {
        SearchMode::LexicalOnly
    };

    // Accumulate per-document candidates from both channels.
    let mut candidates: HashMap<String, DocCandidate> = HashMap::new();

    for hit in fts_hits {
        candidates
            .entry(hit.doc_id.clone())
            .and_modify(|c| {
                if hit.bm25 > c.bm25 {
                    c.bm25 = hit.bm25;
                }
            })
            .or_insert(DocCandidate {
                doc_id: hit.doc_id,
                title: hit.title,
                source: hit.source,
                updated_at: hit.updated_at,
                metadata: hit.metadata,
                bm25: hit.bm25,
                cosine: 0.0,
                snippet: hit.snippet,
            });
    }

    // Chunk → document collapse by max cosine; the winning chunk supplies
    // the snippet when the lexical channel did not.
    for hit in vector_hits {
        let cosine = hit.cosine.max(0.0);
        match candidates.get_mut(&hit.doc_id) {
            Some(c) => {
                if cosine > c.cosine {
                    c.cosine = cosine;
                }
            }
            None => {
                candidates.insert(
                    hit.doc_id.clone(),
                    DocCandidate {
                        doc_id: hit.doc_id,
                        title: hit.title,
                        source: hit.source,
                        updated_at: hit.updated_at,
                        metadata: hit.metadata,
                        bm25: 0.0,
                        cosine,
                        snippet: excerpt(&hit.chunk_text),
                    },
                );
            }
        }
    }

    let mut candidates: Vec<DocCandidate> = candidates.into_values().collect();

    if !filters.participants.is_empty() {
        candidates.retain(|c| matches_participants(c, &filters.participants));
    }

    let hits = fuse_and_rank(
        candidates,
        config.retrieval.w_bm25,
        config.retrieval.w_vec,
        &config.retrieval.thresholds,
        config.retrieval.floor,
        limit,
    );

    Ok(SearchResponse { hits, mode })
}

/// Normalize, fuse, apply the progressive threshold ladder, and order.
fn fuse_and_rank(
    candidates: Vec<DocCandidate>,
    w_bm25: f64,
    w_vec: f64,
    thresholds: &[f64],
    floor: f64,
    limit: usize,
) -> Vec<SearchHit> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_bm25 = candidates.iter().map(|c| c.bm25).fold(0.0f64, f64::max);
    let max_cosine = candidates.iter().map(|c| c.cosine).fold(0.0f64, f64::max);

    let mut scored: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| {
            let bm25_norm = if max_bm25 > 0.0 { c.bm25 / max_bm25 } else { 0.0 };
            let cosine_norm = if max_cosine > 0.0 {
                c.cosine / max_cosine
            } else {
                0.0
            };
            SearchHit {
                doc_id: c.doc_id,
                title: c.title,
                snippet: c.snippet,
                source: c.source,
                score: w_bm25 * bm25_norm + w_vec * cosine_norm,
                bm25: c.bm25,
                cosine: c.cosine,
                updated_at: c.updated_at,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.doc_id.cmp(&b.doc_id))
    });

    // Precision first: stop at the first ladder step with enough survivors.
    let needed = (limit / 2).max(1);
    for &threshold in thresholds {
        let surviving = scored.iter().filter(|h| h.score >= threshold).count();
        if surviving >= needed {
            let mut hits: Vec<SearchHit> = scored
                .into_iter()
                .filter(|h| h.score >= threshold)
                .collect();
            hits.truncate(limit);
            return hits;
        }
    }

    // Recall floor: return whatever clears it rather than nothing.
    let mut hits: Vec<SearchHit> = scored.into_iter().filter(|h| h.score >= floor).collect();
    hits.truncate(limit);
    hits
}

fn matches_participants(candidate: &DocCandidate, participants: &[String]) -> bool {
    let mut haystack = candidate.title.to_lowercase();
    if let Ok(meta) = serde_json::from_str::<serde_json::Value>(&candidate.metadata) {
        if let Some(list) = meta.get("participants").and_then(|p| p.as_array()) {
            for entry in list {
                if let Some(s) = entry.as_str() {
                    haystack.push('\n');
                    haystack.push_str(&s.to_lowercase());
                }
            }
        }
    }
    participants
        .iter()
        .any(|p| haystack.contains(&p.to_lowercase()))
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.len() <= 160 {
        return trimmed.to_string();
    }
    let mut cut = 160;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(doc_id: &str, bm25: f64, cosine: f64, updated_at: i64) -> DocCandidate {
        DocCandidate {
            doc_id: doc_id.to_string(),
            title: doc_id.to_string(),
            source: Source::Mail,
            updated_at,
            metadata: "{}".to_string(),
            bm25,
            cosine,
            snippet: String::new(),
        }
    }

    fn rank(candidates: Vec<DocCandidate>, limit: usize) -> Vec<SearchHit> {
        fuse_and_rank(candidates, 0.5, 0.5, &[0.40, 0.25, 0.15, 0.05], 0.01, limit)
    }

    #[test]
    fn fusion_prefers_dual_channel_hits() {
        let hits = rank(
            vec![
                candidate("a", 8.0, 0.9, 10),
                candidate("b", 10.0, 0.0, 10),
                candidate("c", 0.0, 1.0, 10),
            ],
            10,
        );
        assert_eq!(hits[0].doc_id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn fusion_is_monotonic_in_both_channels() {
        let base = rank(
            vec![candidate("a", 4.0, 0.4, 10), candidate("b", 8.0, 0.8, 10)],
            10,
        );
        let boosted = rank(
            vec![candidate("a", 6.0, 0.6, 10), candidate("b", 8.0, 0.8, 10)],
            10,
        );
        let rank_of = |hits: &[SearchHit], id: &str| {
            hits.iter().position(|h| h.doc_id == id).unwrap()
        };
        assert!(rank_of(&boosted, "a") <= rank_of(&base, "a"));
    }

    #[test]
    fn ties_break_by_recency_then_doc_id() {
        let hits = rank(
            vec![
                candidate("z", 5.0, 0.5, 10),
                candidate("a", 5.0, 0.5, 10),
                candidate("m", 5.0, 0.5, 99),
            ],
            10,
        );
        assert_eq!(hits[0].doc_id, "m");
        assert_eq!(hits[1].doc_id, "a");
        assert_eq!(hits[2].doc_id, "z");
    }

    #[test]
    fn limit_is_respected() {
        let candidates = (0..20)
            .map(|i| candidate(&format!("d{i:02}"), 10.0 - i as f64 * 0.1, 0.0, 0))
            .collect();
        let hits = rank(candidates, 5);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn ladder_admits_mid_scores_when_top_band_is_empty() {
        // Top hit normalizes to 0.5 (lexical channel only at equal weights);
        // a second doc lands at 0.22, below 0.25 but above 0.15.
        let hits = rank(
            vec![candidate("top", 10.0, 0.0, 0), candidate("mid", 4.4, 0.0, 0)],
            4,
        );
        // needed = 2; 0.40 admits one, 0.25 admits one, 0.15 admits both.
        assert_eq!(hits.len(), 2);
        assert!((hits[1].score - 0.22).abs() < 1e-9);
    }

    #[test]
    fn floor_pass_returns_something_rather_than_nothing() {
        // Single candidate: normalizes to bm25_norm 1.0 → score 0.5 ≥ 0.40
        // with needed = 1, so the ladder already succeeds; force the floor
        // by asking for more survivors than exist above every step.
        let hits = fuse_and_rank(
            vec![candidate("only", 1.0, 0.0, 0)],
            0.02,
            0.5,
            &[0.40, 0.25, 0.15, 0.05],
            0.01,
            10,
        );
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= 0.01);
    }

    #[test]
    fn nothing_below_the_effective_threshold_is_returned() {
        let hits = rank(
            vec![
                candidate("strong", 10.0, 1.0, 0),
                candidate("weak", 0.1, 0.0, 0),
            ],
            10,
        );
        // strong fuses to 1.0, so the 0.40 step succeeds; weak (0.005) is out.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "strong");
    }

    #[test]
    fn zero_max_channel_contributes_zero() {
        let hits = rank(vec![candidate("a", 0.0, 0.0, 0)], 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn participants_filter_reads_metadata() {
        let mut c = candidate("a", 1.0, 0.0, 0);
        c.metadata = r#"{"participants": ["Ana Torres", "me@example.com"]}"#.to_string();
        assert!(matches_participants(&c, &["ana".to_string()]));
        assert!(!matches_participants(&c, &["bob".to_string()]));
    }
}
