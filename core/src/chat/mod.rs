// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

pub mod client;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod message;
pub mod request;
pub mod transport;

pub use client::{StreamingChatClient, TurnOutcome};
pub use decoder::{LineOutcome, StreamDecoder, decode_line};
pub use diagnostics::DiagnosticLog;
pub use error::{ChatError, ChatResult, StreamDecodeWarning};
pub use message::{
    APOLOGY_TEXT, CANCELLED_TEXT, Conversation, ConversationMessage, DEFAULT_GREETING, MessageId,
    Sender,
};
pub use request::ChatRequest;
pub use transport::{ByteStream, ChatTransport, HttpTransport, TransportResponse};
