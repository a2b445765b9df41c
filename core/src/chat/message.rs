// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Appended by `cancel()` when the user abandons an answer.
pub const CANCELLED_TEXT: &str = "回答已取消。";

/// Appended when a turn fails for any reason other than cancellation.
pub const APOLOGY_TEXT: &str = "抱歉，发生了一些问题，请稍后再试。";

/// Opening assistant message of a fresh conversation.
pub const DEFAULT_GREETING: &str = "你好！我是京剧知识助手，请问有什么关于京剧的问题想咨询吗？";

/// Who produced a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Message typed by the user
    User,
    /// Message produced by the assistant (answer, apology or cancellation notice)
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Creation-ordered message identifier, unique within one conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the conversation history. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    id: MessageId,
    content: String,
    sender: Sender,
    timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Append-only conversation history
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a history with an assistant greeting, if one is given
    pub fn with_greeting(greeting: Option<&str>) -> Self {
        let mut conversation = Self::new();
        if let Some(greeting) = greeting {
            conversation.push(Sender::Assistant, greeting);
        }
        conversation
    }

    /// Append a message and return a copy of it
    pub fn push(&mut self, sender: Sender, content: impl Into<String>) -> ConversationMessage {
        self.next_id += 1;
        let message = ConversationMessage {
            id: MessageId(self.next_id),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
