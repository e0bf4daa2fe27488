//! Paragraph-boundary text chunker.
//!
//! Splits document content into [`Chunk`]s for embedding: blank-line
//! paragraphs are glued into windows up to the soft cap, and a single
//! paragraph is hard-split only when it exceeds the hard cap. Chunk text is
//! always an exact slice of the document, so the recorded offsets reconstruct
//! the chunk and concatenated chunks cover the content deterministically.
//!
//! Chunk ids are derived from the document id, ordinal, offsets, and text, so
//! an ordinal survives re-chunking only when both offsets and text match.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio used for both caps.
const CHARS_PER_TOKEN: usize = 4;

pub fn chunk_document(
    doc_id: &str,
    content: &str,
    soft_cap_tokens: usize,
    hard_cap_tokens: usize,
) -> Vec<Chunk> {
    let soft_chars = soft_cap_tokens * CHARS_PER_TOKEN;
    let hard_chars = hard_cap_tokens * CHARS_PER_TOKEN;

    let spans = paragraph_spans(content);
    if spans.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    // Open window of glued paragraphs: (start, end) offsets into content.
    let mut window: Option<(usize, usize)> = None;

    let mut flush = |window: &mut Option<(usize, usize)>, chunks: &mut Vec<Chunk>| {
        if let Some((start, end)) = window.take() {
            push_chunk(chunks, doc_id, content, start, end);
        }
    };

    for &(start, end) in &spans {
        let len = end - start;

        if len > hard_chars {
            flush(&mut window, &mut chunks);
            hard_split(&mut chunks, doc_id, content, start, end, hard_chars);
            continue;
        }

        match window {
            None => window = Some((start, end)),
            Some((w_start, w_end)) => {
                // Window length includes the separator gap it would absorb.
                if end - w_start > soft_chars {
                    push_chunk(&mut chunks, doc_id, content, w_start, w_end);
                    window = Some((start, end));
                } else {
                    window = Some((w_start, end));
                }
            }
        }
    }
    flush(&mut window, &mut chunks);

    chunks
}

/// Trimmed paragraph byte spans, split on blank lines.
fn paragraph_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for block in content.split("\n\n") {
        let trimmed = block.trim();
        if !trimmed.is_empty() {
            let lead = block.len() - block.trim_start().len();
            let start = offset + lead;
            spans.push((start, start + trimmed.len()));
        }
        offset += block.len() + 2;
    }
    spans
}

fn hard_split(
    chunks: &mut Vec<Chunk>,
    doc_id: &str,
    content: &str,
    start: usize,
    end: usize,
    hard_chars: usize,
) {
    let mut pos = start;
    while pos < end {
        let mut cut = (pos + hard_chars).min(end);
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut < end {
            // Prefer a newline or space boundary inside the window.
            let window = &content[pos..cut];
            if let Some(split) = window.rfind('\n').or_else(|| window.rfind(' ')) {
                if split > 0 {
                    cut = pos + split + 1;
                }
            }
        }
        push_chunk(chunks, doc_id, content, pos, cut);
        pos = cut;
    }
}

fn push_chunk(chunks: &mut Vec<Chunk>, doc_id: &str, content: &str, start: usize, end: usize) {
    let text = content[start..end].trim();
    if text.is_empty() {
        return;
    }
    let lead = content[start..end].len() - content[start..end].trim_start().len();
    let start = start + lead;
    let end = start + text.len();

    let ordinal = chunks.len() as i64;
    chunks.push(Chunk {
        chunk_id: chunk_id(doc_id, ordinal, start, end, text),
        doc_id: doc_id.to_string(),
        ordinal,
        text: text.to_string(),
        char_start: start as i64,
        char_end: end as i64,
    });
}

fn chunk_id(doc_id: &str, ordinal: i64, start: usize, end: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update((start as u64).to_le_bytes());
    hasher.update((end as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
