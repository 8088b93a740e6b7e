//! Paragraph-boundary text chunker.
//!
//! Splits the text of one source into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph
//! boundaries (`\n\n`) to keep each chunk semantically coherent.
//!
//! Each chunk's id comes from [`chunk_id`] over its text, the source and its
//! ordinal, so chunking the same input twice yields identical ids and the
//! store does not grow on retried ingestion.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Locate non-blank paragraphs and their byte spans in the input.
//! 3. Grow the current span paragraph by paragraph until the next one
//!    would push it past `max_chars`, then flush it as a chunk. Lengths are
//!    counted in characters, not bytes.
//! 4. A single paragraph longer than `max_chars` is hard-split at the
//!    nearest newline or space before the limit.
//!
//! Chunk text is the original slice, so `start_offset`/`end_offset` (in
//! characters) always point back into the input.
//!
//! # Example
//!
//! ```rust
//! use hybrid_rag_core::chunk::{chunk_source, ChunkOptions};
//! use hybrid_rag_core::models::Source;
//!
//! let source = Source::Document { path: "notes.md".into() };
//! let chunks = chunk_source(&source, "Hello world.\n\nSecond paragraph.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.chunk_index, 0);
//! ```

use chrono::{SecondsFormat, Utc};

use crate::models::{chunk_id, Chunk, ChunkMetadata, Source};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Per-ingestion settings copied onto every produced chunk.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    pub language: String,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub section: Option<String>,
    pub project: Option<String>,
    pub confidentiality: Option<String>,
    pub agent_hint: Option<String>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 700,
            language: "en".to_string(),
            user_id: None,
            workspace_id: None,
            section: None,
            project: None,
            confidentiality: None,
            agent_hint: None,
        }
    }
}

/// Chunk `text` the way its source kind calls for.
///
/// Transcripts and YouTube captions carrying cue timestamps go through
/// [`crate::transcript::chunk_transcript`] so their chunks record
/// `start_sec`/`end_sec`; everything else is chunked by paragraph.
pub fn chunk_text(source: &Source, text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    match source {
        Source::Document { .. } => chunk_source(source, text, opts),
        Source::Transcript { .. } | Source::Youtube { .. } => {
            crate::transcript::chunk_transcript(source, text, opts)
                .unwrap_or_else(|| chunk_source(source, text, opts))
        }
    }
}

/// Split `text` from `source` into chunks with contiguous ordinals.
///
/// Blank input produces no chunks.
pub fn chunk_source(source: &Source, text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let spans = split_spans(text, max_chars(opts));
    let count = spans.len() as u32;
    let created_at = now();

    spans
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let piece = &text[start..end];
            let start_char = text[..start].chars().count() as u64;
            let mut chunk = build_chunk(source, piece, i as u32, count, &created_at, opts);
            chunk.metadata.start_offset = Some(start_char);
            chunk.metadata.end_offset = Some(start_char + piece.chars().count() as u64);
            chunk
        })
        .collect()
}

pub(crate) fn max_chars(opts: &ChunkOptions) -> usize {
    opts.max_tokens.max(1) * CHARS_PER_TOKEN
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A chunk with no offsets set.
pub(crate) fn build_chunk(
    source: &Source,
    piece: &str,
    ordinal: u32,
    count: u32,
    created_at: &str,
    opts: &ChunkOptions,
) -> Chunk {
    Chunk {
        id: chunk_id(piece, source, ordinal),
        source: source.clone(),
        text: piece.to_string(),
        metadata: ChunkMetadata {
            language: opts.language.clone(),
            chunk_index: ordinal,
            chunk_count: count,
            start_sec: None,
            end_sec: None,
            start_offset: None,
            end_offset: None,
            created_at: created_at.to_string(),
            section: opts.section.clone(),
            project: opts.project.clone(),
            confidentiality: opts.confidentiality.clone(),
            agent_hint: opts.agent_hint.clone(),
        },
        user_id: opts.user_id.clone(),
        workspace_id: opts.workspace_id.clone(),
    }
}

/// Byte spans of the chunks for `text`.
pub(crate) fn split_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (start, end) in paragraph_spans(text) {
        if let Some((cur_start, cur_end)) = current {
            if char_len(text, cur_start, end) > max_chars {
                spans.push((cur_start, cur_end));
                current = None;
            }
        }

        if char_len(text, start, end) > max_chars {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            hard_split(text, start, end, max_chars, &mut spans);
        } else {
            current = Some(match current {
                Some((cur_start, _)) => (cur_start, end),
                None => (start, end),
            });
        }
    }

    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Trimmed, non-blank paragraphs as byte spans.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for para in text.split("\n\n") {
        let lead = para.len() - para.trim_start().len();
        let trimmed = para.trim();
        if !trimmed.is_empty() {
            let start = offset + lead;
            spans.push((start, start + trimmed.len()));
        }
        offset += para.len() + 2;
    }
    spans
}

fn hard_split(
    text: &str,
    start: usize,
    end: usize,
    max_chars: usize,
    spans: &mut Vec<(usize, usize)>,
) {
    let mut pos = start;
    while pos < end {
        let remaining = &text[pos..end];
        let mut cut = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        if cut < remaining.len() {
            cut = remaining[..cut]
                .rfind('\n')
                .or_else(|| remaining[..cut].rfind(' '))
                .map(|p| p + 1)
                .unwrap_or(cut);
        }
        if cut == 0 {
            cut = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let piece = &remaining[..cut];
        let lead = piece.len() - piece.trim_start().len();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            let s = pos + lead;
            spans.push((s, s + trimmed.len()));
        }
        pos += cut;
    }
}

fn char_len(text: &str, start: usize, end: usize) -> usize {
    text[start..end].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Source {
        Source::Document {
            path: "docs/guide.md".to_string(),
        }
    }

    fn opts(max_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            ..ChunkOptions::default()
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_source(&doc(), "Hello, world!", &opts(700));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_index, 0);
        assert_eq!(chunks[0].metadata.chunk_count, 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_source(&doc(), "", &opts(700)).is_empty());
        assert!(chunk_source(&doc(), "  \n\n \n", &opts(700)).is_empty());
    }

    #[test]
    fn test_paragraphs_exceed_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_source(&doc(), text, &opts(6));
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_index, i as u32);
            assert_eq!(c.metadata.chunk_count, 3);
        }
        assert_eq!(chunks[1].text, "This is paragraph two.");
    }

    #[test]
    fn test_offsets_point_into_input() {
        let text = "  First.\n\nSecond one.\n\nThird.";
        let chunks = chunk_source(&doc(), text, &opts(2));
        let chars: Vec<char> = text.chars().collect();
        for c in &chunks {
            let s = c.metadata.start_offset.unwrap() as usize;
            let e = c.metadata.end_offset.unwrap() as usize;
            let slice: String = chars[s..e].iter().collect();
            assert_eq!(slice, c.text);
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "word ".repeat(100);
        let chunks = chunk_source(&doc(), &text, &opts(5));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_source(&doc(), text, &opts(3));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_budget_counts_chars_not_bytes() {
        let text = "äöü ".repeat(20);
        let chunks = chunk_source(&doc(), &text, &opts(5));
        for c in &chunks {
            assert!(c.text.chars().count() <= 20);
        }
        assert_eq!(chunks[0].text, "äöü äöü äöü äöü äöü");

        let paras = "äää äää\n\nööö ööö";
        assert_eq!(chunk_source(&doc(), paras, &opts(5)).len(), 1);
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_source(&doc(), text, &opts(2));
        let b = chunk_source(&doc(), text, &opts(2));
        let ids_a: Vec<_> = a.iter().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_tenant_and_tags_propagate() {
        let o = ChunkOptions {
            workspace_id: Some("w1".to_string()),
            project: Some("apollo".to_string()),
            ..opts(700)
        };
        let chunks = chunk_source(&doc(), "Some text.", &o);
        assert_eq!(chunks[0].workspace_id.as_deref(), Some("w1"));
        assert!(chunks[0].has_tag("project:apollo"));
    }
}
