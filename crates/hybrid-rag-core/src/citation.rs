//! Citation strings for retrieved chunks.

use crate::models::{Chunk, Source};

/// Render a human-followable reference to where `chunk` came from.
///
/// - `youtube`: `url?t=<whole seconds>` when a start offset is known,
///   otherwise the bare URL.
/// - `document` / `transcript`: `path#section` when a section is known,
///   otherwise the bare path.
pub fn format_citation(chunk: &Chunk) -> String {
    match &chunk.source {
        Source::Youtube { url } => match chunk.metadata.start_sec {
            Some(start) => format!("{}?t={}", url, start.trunc() as i64),
            None => url.clone(),
        },
        Source::Document { path } | Source::Transcript { path } => {
            match chunk.metadata.section.as_deref() {
                Some(section) if !section.is_empty() => format!("{}#{}", path, section),
                _ => path.clone(),
            }
        }
    }
}
