//! Timestamp-aware chunking for transcripts and captions.
//!
//! Recognized cue formats:
//!
//! ```text
//! 00:01:02,500 --> 00:01:05,000      SRT
//! 01:02.500 --> 01:05.000 align:start WebVTT (settings ignored)
//! [00:01:02] Speaker line             bracketed prefix, h:m:s or m:s
//! ```
//!
//! Cues are packed in order into chunks of at most `max_tokens * 4`
//! characters. A chunk's `start_sec` is its first cue's start and its
//! `end_sec` the last cue's end; a bracketed cue ends where the next one
//! starts. A cue too long for one chunk is hard-split and every piece keeps
//! the cue's times.

use crate::chunk::{build_chunk, max_chars, now, split_spans, ChunkOptions};
use crate::models::{Chunk, Source};

#[derive(Debug, Clone, PartialEq)]
struct Cue {
    start: f64,
    end: Option<f64>,
    text: String,
}

/// Chunk a timestamped transcript, or `None` when `text` has no cue
/// timestamps at all.
pub fn chunk_transcript(source: &Source, text: &str, opts: &ChunkOptions) -> Option<Vec<Chunk>> {
    let cues = parse_cues(text)?;
    let limit = max_chars(opts);

    // (text, start_sec, end_sec)
    let mut pieces: Vec<(String, f64, f64)> = Vec::new();
    let mut current: Option<(String, f64, f64)> = None;

    for cue in cues {
        let end = cue.end.unwrap_or(cue.start);
        let len = cue.text.chars().count();

        let full = current
            .as_ref()
            .is_some_and(|(body, _, _)| body.chars().count() + 1 + len > limit);
        if full {
            pieces.extend(current.take());
        }

        if len > limit {
            pieces.extend(current.take());
            for (s, e) in split_spans(&cue.text, limit) {
                pieces.push((cue.text[s..e].to_string(), cue.start, end));
            }
            continue;
        }

        current = Some(match current.take() {
            Some((mut body, start, _)) => {
                body.push('\n');
                body.push_str(&cue.text);
                (body, start, end)
            }
            None => (cue.text, cue.start, end),
        });
    }
    pieces.extend(current);

    let count = pieces.len() as u32;
    let created_at = now();
    Some(
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, (body, start, end))| {
                let mut chunk = build_chunk(source, &body, i as u32, count, &created_at, opts);
                chunk.metadata.start_sec = Some(start);
                chunk.metadata.end_sec = Some(end);
                chunk
            })
            .collect(),
    )
}

fn parse_cues(text: &str) -> Option<Vec<Cue>> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut cues: Vec<Cue> = Vec::new();
    let mut preamble = String::new();
    let mut saw_timestamp = false;

    for (i, line) in lines.iter().enumerate() {
        if line.is_empty() || *line == "WEBVTT" {
            continue;
        }
        if let Some((start, end)) = parse_timing_line(line) {
            saw_timestamp = true;
            cues.push(Cue {
                start,
                end: Some(end),
                text: String::new(),
            });
            continue;
        }
        if let Some((start, rest)) = parse_bracket_prefix(line) {
            saw_timestamp = true;
            cues.push(Cue {
                start,
                end: None,
                text: rest.to_string(),
            });
            continue;
        }
        // SRT cue number.
        if line.bytes().all(|b| b.is_ascii_digit()) && next_is_timing(&lines[i + 1..]) {
            continue;
        }

        let target = match cues.last_mut() {
            Some(cue) => &mut cue.text,
            None => &mut preamble,
        };
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(line);
    }

    if !saw_timestamp {
        return None;
    }

    if !preamble.is_empty() {
        cues.insert(
            0,
            Cue {
                start: 0.0,
                end: None,
                text: preamble,
            },
        );
    }

    let starts: Vec<f64> = cues.iter().map(|c| c.start).collect();
    for (i, cue) in cues.iter_mut().enumerate() {
        if cue.end.is_none() {
            cue.end = starts.get(i + 1).copied().filter(|next| *next >= cue.start);
        }
    }
    cues.retain(|c| !c.text.trim().is_empty());
    Some(cues)
}

fn next_is_timing(rest: &[&str]) -> bool {
    rest.iter()
        .find(|l| !l.is_empty())
        .is_some_and(|l| parse_timing_line(l).is_some())
}

/// `start --> end [settings]`
fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    let end = end.split_whitespace().next()?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// `[hh:mm:ss] text` or `[mm:ss] text`
fn parse_bracket_prefix(line: &str) -> Option<(f64, &str)> {
    let inner = line.strip_prefix('[')?;
    let (stamp, rest) = inner.split_once(']')?;
    Some((parse_timestamp(stamp.trim())?, rest.trim()))
}

/// `hh:mm:ss[.,fff]` or `mm:ss[.,fff]` in seconds.
fn parse_timestamp(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let (whole, rest) = parts.split_last()?;
    let seconds: f64 = whole.replace(',', ".").parse().ok()?;
    if !(0.0..60.0).contains(&seconds) || whole.starts_with(['+', '-']) {
        return None;
    }
    let mut total = 0.0;
    for part in rest {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(total * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn talk() -> Source {
        Source::Transcript {
            path: "talks/keynote.srt".to_string(),
        }
    }

    fn opts(max_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            ..ChunkOptions::default()
        }
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("00:01:02,500"), Some(62.5));
        assert_eq!(parse_timestamp("01:02.250"), Some(62.25));
        assert_eq!(parse_timestamp("1:00:00"), Some(3600.0));
        assert_eq!(parse_timestamp("12"), None);
        assert_eq!(parse_timestamp("aa:10"), None);
        assert_eq!(parse_timestamp("00:75"), None);
    }

    #[test]
    fn test_plain_text_is_not_a_transcript() {
        assert!(chunk_transcript(&talk(), "Just words.\n\nMore words.", &opts(700)).is_none());
    }

    #[test]
    fn test_srt_cues_carry_times() {
        let srt = "1\n00:00:01,000 --> 00:00:04,000\nWelcome to the keynote.\n\n\
                   2\n00:00:04,500 --> 00:00:09,000\nToday we cover rockets.\n";
        let chunks = chunk_transcript(&talk(), srt, &opts(700)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Welcome to the keynote.\nToday we cover rockets.");
        assert_eq!(chunks[0].metadata.start_sec, Some(1.0));
        assert_eq!(chunks[0].metadata.end_sec, Some(9.0));
        assert_eq!(chunks[0].metadata.start_offset, None);
    }

    #[test]
    fn test_webvtt_settings_ignored() {
        let vtt = "WEBVTT\n\n00:10.000 --> 00:12.500 align:start\nHello there.\n";
        let chunks = chunk_transcript(&talk(), vtt, &opts(700)).unwrap();
        assert_eq!(chunks[0].metadata.start_sec, Some(10.0));
        assert_eq!(chunks[0].metadata.end_sec, Some(12.5));
    }

    #[test]
    fn test_bracket_cues_split_by_budget() {
        let text = "[00:00] Opening remarks here.\n[00:30] Second topic now.\n[01:15] Closing words.";
        let chunks = chunk_transcript(&talk(), text, &opts(6)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "Second topic now.");
        assert_eq!(chunks[1].metadata.start_sec, Some(30.0));
        assert_eq!(chunks[1].metadata.end_sec, Some(75.0));
        // The last cue has no successor.
        assert_eq!(chunks[2].metadata.end_sec, Some(75.0));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_index, i as u32);
            assert_eq!(c.metadata.chunk_count, 3);
        }
    }

    #[test]
    fn test_preamble_and_long_cue() {
        let text = format!("Recorded live.\n[00:05] {}", "rocket ".repeat(10));
        let chunks = chunk_transcript(&talk(), &text, &opts(5)).unwrap();
        assert_eq!(chunks[0].text, "Recorded live.");
        assert_eq!(chunks[0].metadata.start_sec, Some(0.0));
        assert_eq!(chunks[0].metadata.end_sec, Some(5.0));
        assert!(chunks.len() > 2);
        for c in &chunks[1..] {
            assert!(c.text.chars().count() <= 20);
            assert_eq!(c.metadata.start_sec, Some(5.0));
        }
    }
}
