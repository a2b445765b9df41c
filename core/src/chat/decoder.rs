// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use log::debug;

use crate::chat::error::StreamDecodeWarning;
use crate::chat::extract::{extract_content, fallback};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// What a single complete line contributes to the turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Assistant text to append
    Text(String),
    /// Blank line, sentinel, empty frame, or a frame without known content
    Skip,
    /// Frame that failed to parse as JSON
    Malformed(StreamDecodeWarning),
}

/// Classify and decode one complete line of the response stream
pub fn decode_line(line: &str) -> LineOutcome {
    if line.trim().is_empty() {
        return LineOutcome::Skip;
    }

    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return LineOutcome::Skip;
        }
        return match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(frame) => extract_content(&frame)
                .map(|text| LineOutcome::Text(text.to_string()))
                .unwrap_or(LineOutcome::Skip),
            Err(e) => LineOutcome::Malformed(StreamDecodeWarning {
                line: payload.to_string(),
                cause: e.to_string(),
            }),
        };
    }

    if fallback::applies(line) {
        if let Some(text) = fallback::extract(line) {
            debug!("Recovered text from unframed line via fallback");
            return LineOutcome::Text(text.to_string());
        }
    }

    LineOutcome::Skip
}

/// Result of feeding one chunk to the decoder
#[derive(Debug, Default)]
pub struct DecodeProgress {
    /// Whether any text was appended by this chunk
    pub appended: bool,
    pub warnings: Vec<StreamDecodeWarning>,
}

/// Per-turn accumulator for a streamed response.
///
/// Chunk boundaries are arbitrary: bytes after the last newline are held
/// back until a later chunk completes the line. Splitting happens on raw
/// bytes, so multi-byte characters cut by a chunk boundary survive intact.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    text: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, processing every line it completes.
    ///
    /// Only the new chunk is scanned for newlines, so a long line arriving
    /// over many chunks is not rescanned each time.
    pub fn push(&mut self, chunk: &[u8]) -> DecodeProgress {
        let mut progress = DecodeProgress::default();

        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.pending.extend_from_slice(chunk);
            return progress;
        };

        let mut complete = std::mem::take(&mut self.pending);
        complete.extend_from_slice(&chunk[..last_newline]);
        self.pending.extend_from_slice(&chunk[last_newline + 1..]);

        for line in complete.split(|&b| b == b'\n') {
            match decode_line(&String::from_utf8_lossy(line)) {
                LineOutcome::Text(text) => {
                    self.text.push_str(&text);
                    progress.appended = true;
                }
                LineOutcome::Skip => {}
                LineOutcome::Malformed(warning) => progress.warnings.push(warning),
            }
        }
        progress
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the decoder at end of stream. Any unterminated tail is
    /// discarded; an empty accumulation yields `None`.
    pub fn finish(self) -> Option<String> {
        if !self.pending.is_empty() {
            debug!("Discarding {} bytes of unterminated stream tail", self.pending.len());
        }
        (!self.text.is_empty()).then_some(self.text)
    }
}
