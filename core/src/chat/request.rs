// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use serde::Serialize;

use crate::config::ChatConfig;

/// Outgoing chat request body.
///
/// Optional fields are only sent when the configured value differs from
/// what the server assumes by default.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, config: &ChatConfig) -> Self {
        let defaults = &config.server_defaults;
        Self {
            message: message.into(),
            max_tokens: (config.max_output_tokens != defaults.max_output_tokens)
                .then_some(config.max_output_tokens),
            stream: (config.streaming != defaults.streaming).then_some(config.streaming),
        }
    }
}
