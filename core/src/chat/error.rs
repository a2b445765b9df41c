// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Errors that can end a chat turn or reject a submission
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("API request failed: {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
    },

    #[error("Response body is empty")]
    EmptyBody,

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("A request is already in flight")]
    TurnInProgress,

    #[error("Chat client has been shut down")]
    Closed,
}

impl ChatError {
    /// True when the error is the cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }

    /// True for the errors returned by `submit` without starting a turn
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage | ChatError::TurnInProgress | ChatError::Closed
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(Box::new(err))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// A stream line that could not be parsed. Never fatal to the turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse stream line {line:?}: {cause}")]
pub struct StreamDecodeWarning {
    pub line: String,
    pub cause: String,
}
