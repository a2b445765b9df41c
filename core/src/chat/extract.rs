// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

//! Assistant text extraction from decoded stream frames.
//!
//! Chat backends disagree on where the text lives. Frames are matched
//! against [`CONTENT_SHAPES`] in order and the first non-empty string wins.
//! Lines that are not `data: ` frames at all go through the [`fallback`]
//! shim instead.

use serde_json::Value;

/// A known response shape: a JSON path leading to a string field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentShape {
    pub name: &'static str,
    pub path: &'static [&'static str],
}

impl ContentShape {
    /// Resolve this shape against a frame
    pub fn extract<'a>(&self, frame: &'a Value) -> Option<&'a str> {
        self.path
            .iter()
            .try_fold(frame, |node, key| node.get(*key))?
            .as_str()
            .filter(|text| !text.is_empty())
    }
}

/// Shapes in priority order
pub const CONTENT_SHAPES: &[ContentShape] = &[
    ContentShape {
        name: "response",
        path: &["response"],
    },
    ContentShape {
        name: "content",
        path: &["content"],
    },
    ContentShape {
        name: "text",
        path: &["text"],
    },
    // Cloudflare Workers AI style
    ContentShape {
        name: "message.content",
        path: &["message", "content"],
    },
];

/// Extract assistant text from a parsed frame. Non-objects yield nothing.
pub fn extract_content(frame: &Value) -> Option<&str> {
    if !frame.is_object() {
        return None;
    }
    CONTENT_SHAPES.iter().find_map(|shape| shape.extract(frame))
}

/// Compatibility shim for backends that emit JSON fragments without SSE
/// framing. Only consulted for lines lacking the `data: ` prefix.
pub mod fallback {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static CONTENT_FIELD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#""content":"([^"]*)""#).expect("valid content regex"));
    static RESPONSE_FIELD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#""response":"([^"]*)""#).expect("valid response regex"));

    /// Whether a bare line carries a recognizable fragment
    pub fn applies(line: &str) -> bool {
        line.contains(r#""content":""#) || line.contains(r#""response":""#)
    }

    /// First non-empty capture, `content` before `response`
    pub fn extract(line: &str) -> Option<&str> {
        [&*CONTENT_FIELD, &*RESPONSE_FIELD].into_iter().find_map(|pattern| {
            pattern
                .captures(line)
                .and_then(|captures| captures.get(1))
                .map(|capture| capture.as_str())
                .filter(|text| !text.is_empty())
        })
    }
}
