// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

//! Streaming chat client.
//!
//! One [`StreamingChatClient`] drives one conversation. Each call to
//! [`StreamingChatClient::submit`] is a turn: the user message is appended,
//! the request is posted, the reply is decoded (streamed or whole-body) and
//! exactly one terminal assistant message is appended, unless the turn is
//! cancelled by [`StreamingChatClient::shutdown`] or ends without text.
//!
//! # Example usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use jingju_core::{ChatConfig, StreamingChatClient, TurnOutcome};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(StreamingChatClient::with_http(ChatConfig::default())?);
//! let mut partial = client.subscribe();
//!
//! let turn = tokio::spawn({
//!     let client = client.clone();
//!     async move { client.submit("梅兰芳的代表剧目有哪些？").await }
//! });
//! while partial.changed().await.is_ok() && client.is_loading() {
//!     println!("{}", *partial.borrow());
//! }
//! if let TurnOutcome::Completed(message) = turn.await?? {
//!     println!("{}", message.content());
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chat::decoder::StreamDecoder;
use crate::chat::diagnostics::DiagnosticLog;
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::message::{
    APOLOGY_TEXT, CANCELLED_TEXT, Conversation, ConversationMessage, Sender,
};
use crate::chat::request::ChatRequest;
use crate::chat::transport::{ByteStream, ChatTransport, HttpTransport, collect_body};
use crate::config::ChatConfig;

/// How a submitted turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// An assistant answer was appended to the history
    Completed(ConversationMessage),
    /// The reply carried no assistant text; nothing was appended
    Empty,
    /// The turn was cancelled. `cancel()` appends its own notice, teardown
    /// appends nothing.
    Cancelled,
    /// The turn failed and the apology message was appended
    Failed {
        error: ChatError,
        message: ConversationMessage,
    },
}

impl TurnOutcome {
    /// The message this turn appended, if any
    pub fn message(&self) -> Option<&ConversationMessage> {
        match self {
            TurnOutcome::Completed(message) | TurnOutcome::Failed { message, .. } => Some(message),
            TurnOutcome::Empty | TurnOutcome::Cancelled => None,
        }
    }
}

#[derive(Debug)]
struct InFlightRequest {
    turn: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct ClientState {
    config: ChatConfig,
    conversation: Conversation,
    in_flight: Option<InFlightRequest>,
    diagnostics: DiagnosticLog,
    closed: bool,
    next_turn: u64,
}

impl ClientState {
    fn owns(&self, turn: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.turn == turn)
    }
}

/// Chat client with at most one request in flight
pub struct StreamingChatClient {
    transport: Arc<dyn ChatTransport>,
    state: Mutex<ClientState>,
    partial: watch::Sender<String>,
}

impl StreamingChatClient {
    pub fn new(config: ChatConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let (partial, _) = watch::channel(String::new());
        let state = ClientState {
            conversation: Conversation::with_greeting(config.greeting.as_deref()),
            diagnostics: DiagnosticLog::new(config.diagnostics),
            config,
            in_flight: None,
            closed: false,
            next_turn: 0,
        };
        Self {
            transport,
            state: Mutex::new(state),
            partial,
        }
    }

    /// Create a client talking HTTP to the configured endpoint
    pub fn with_http(config: ChatConfig) -> ChatResult<Self> {
        config
            .validate()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one turn for `text`.
    ///
    /// Returns an error without touching the history when the trimmed text
    /// is empty, a turn is already in flight, or the client was shut down.
    /// Every other ending is reported as a [`TurnOutcome`].
    pub async fn submit(&self, text: &str) -> ChatResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (config, turn, token) = {
            let mut state = self.state();
            if state.closed {
                return Err(ChatError::Closed);
            }
            if state.in_flight.is_some() {
                return Err(ChatError::TurnInProgress);
            }
            state.conversation.push(Sender::User, text);
            self.partial.send_replace(String::new());

            state.next_turn += 1;
            let turn = state.next_turn;
            let token = CancellationToken::new();
            state.in_flight = Some(InFlightRequest {
                turn,
                token: token.clone(),
            });
            (state.config.clone(), turn, token)
        };
        let guard = TurnGuard {
            client: self,
            turn,
            token: token.clone(),
        };

        let request = ChatRequest::new(text, &config);
        info!("Starting chat turn {} against {}", turn, config.endpoint);
        self.state().diagnostics.begin(|| {
            format!(
                "Connecting: {}\nRequest body: {}",
                config.endpoint,
                serde_json::to_string_pretty(&request).unwrap_or_default()
            )
        });

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ChatError::Cancelled),
            result = self.run_turn(turn, &config, &request) => result,
        };

        Ok(guard.settle(result))
    }

    async fn run_turn(
        &self,
        turn: u64,
        config: &ChatConfig,
        request: &ChatRequest,
    ) -> ChatResult<Option<String>> {
        let response = self.transport.post_json(&config.endpoint, request).await?;
        debug!("Turn {} response status {}", turn, response.status);
        self.record(|| {
            format!(
                "Response status: {}\nResponse headers: {}",
                response.status,
                serde_json::to_string_pretty(&response.headers_json()).unwrap_or_default()
            )
        });

        if !response.is_success() {
            return Err(ChatError::Http {
                status: response.status,
                status_text: response.status_text,
            });
        }
        let body = response.body.ok_or(ChatError::EmptyBody)?;

        if config.streaming {
            self.read_stream(turn, body).await
        } else {
            read_whole_body(body).await
        }
    }

    async fn read_stream(&self, turn: u64, mut body: ByteStream) -> ChatResult<Option<String>> {
        let mut decoder = StreamDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            debug!("Turn {} received {} bytes", turn, chunk.len());

            let progress = decoder.push(&chunk);
            for warning in progress.warnings {
                warn!("Failed to parse SSE data: {}", warning);
                self.record(|| {
                    format!("Parse error: {}\nRaw data: {}", warning.cause, warning.line)
                });
            }
            if progress.appended {
                self.publish_partial(turn, decoder.text());
            }
        }

        Ok(decoder.finish())
    }

    /// Publish partial text, unless the turn no longer owns the client
    fn publish_partial(&self, turn: u64, text: &str) {
        let state = self.state();
        if state.owns(turn) {
            self.partial.send_replace(text.to_string());
        }
    }

    fn record(&self, entry: impl FnOnce() -> String) {
        self.state().diagnostics.record(entry);
    }

    /// Abandon the in-flight turn and append the cancellation notice.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn cancel(&self) -> Option<ConversationMessage> {
        let mut state = self.state();
        let in_flight = state.in_flight.take()?;
        in_flight.token.cancel();
        self.partial.send_replace(String::new());
        info!("Chat turn {} cancelled by user", in_flight.turn);
        Some(state.conversation.push(Sender::Assistant, CANCELLED_TEXT))
    }

    /// Tear the client down: abort any in-flight turn without appending a
    /// message and reject further submissions.
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.closed = true;
        if let Some(in_flight) = state.in_flight.take() {
            in_flight.token.cancel();
            debug!("Chat turn {} aborted by shutdown", in_flight.turn);
        }
        self.partial.send_replace(String::new());
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Whether a turn is in flight
    pub fn is_loading(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Snapshot of the conversation history
    pub fn history(&self) -> Vec<ConversationMessage> {
        self.state().conversation.messages().to_vec()
    }

    /// Current partial text of the streaming turn, empty when idle
    pub fn partial_text(&self) -> String {
        self.partial.borrow().clone()
    }

    /// Watch the partial text as it grows
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.partial.subscribe()
    }

    pub fn config(&self) -> ChatConfig {
        self.state().config.clone()
    }

    /// Replace the configuration. A turn already in flight keeps the
    /// configuration it started with.
    pub fn set_config(&self, config: ChatConfig) {
        let mut state = self.state();
        state.diagnostics.set_enabled(config.diagnostics);
        state.config = config;
    }

    pub fn set_diagnostics(&self, enabled: bool) {
        let mut state = self.state();
        state.config.diagnostics = enabled;
        state.diagnostics.set_enabled(enabled);
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.state().diagnostics.is_enabled()
    }

    /// Diagnostic trace of the latest turn
    pub fn diagnostics(&self) -> String {
        self.state().diagnostics.text()
    }
}

async fn read_whole_body(body: ByteStream) -> ChatResult<Option<String>> {
    let bytes = collect_body(body).await?;
    let document: serde_json::Value = serde_json::from_slice(&bytes)?;
    Ok(document
        .get("response")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

/// Releases the in-flight slot of one turn on every exit path, including
/// the submit future being dropped mid-flight.
struct TurnGuard<'a> {
    client: &'a StreamingChatClient,
    turn: u64,
    token: CancellationToken,
}

impl TurnGuard<'_> {
    /// Record the terminal result and release the in-flight slot under a
    /// single lock, so a concurrent `cancel()` either wins outright or finds
    /// nothing to cancel.
    fn settle(self, result: ChatResult<Option<String>>) -> TurnOutcome {
        let mut state = self.client.state();

        // cancel() or shutdown() got here first
        if self.token.is_cancelled() || !state.owns(self.turn) {
            debug!("Chat turn {} settled after cancellation", self.turn);
            return TurnOutcome::Cancelled;
        }
        state.in_flight = None;
        self.client.partial.send_replace(String::new());

        match result {
            Ok(Some(text)) => {
                info!("Chat turn {} completed ({} bytes)", self.turn, text.len());
                TurnOutcome::Completed(state.conversation.push(Sender::Assistant, text))
            }
            Ok(None) => {
                info!("Chat turn {} completed without assistant text", self.turn);
                TurnOutcome::Empty
            }
            Err(error) if error.is_cancellation() => TurnOutcome::Cancelled,
            Err(error) => {
                error!("API call failed: {}", error);
                state.diagnostics.record(|| format!("API error: {}", error));
                let message = state.conversation.push(Sender::Assistant, APOLOGY_TEXT);
                TurnOutcome::Failed { error, message }
            }
        }
    }
}

/// Only does work when the submit future is dropped before `settle`
impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        let mut state = self.client.state();
        if state.owns(self.turn) {
            state.in_flight = None;
            self.client.partial.send_replace(String::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::DEFAULT_GREETING;
    use crate::chat::transport::{TransportResponse, body_from_chunks};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc;
    use serde_json::{Value, json};
    use std::collections::VecDeque;

    enum Scripted {
        Respond {
            status: u16,
            status_text: &'static str,
            body: Option<ByteStream>,
        },
        Fail(&'static str),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn with(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(String, Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post_json(
            &self,
            endpoint: &str,
            request: &ChatRequest,
        ) -> ChatResult<TransportResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint.to_string(), serde_json::to_value(request)?));
            let next = self.script.lock().unwrap().pop_front();
            match next.expect("unexpected request") {
                Scripted::Respond {
                    status,
                    status_text,
                    body,
                } => Ok(TransportResponse {
                    status,
                    status_text: status_text.to_string(),
                    headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
                    body,
                }),
                Scripted::Fail(reason) => Err(ChatError::Transport(reason.into())),
                Scripted::Hang => std::future::pending().await,
            }
        }
    }

    fn ok(chunks: &[&str]) -> Scripted {
        Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(
                chunks.iter().map(|c| c.as_bytes().to_vec()).collect::<Vec<_>>(),
            )),
        }
    }

    /// Body fed by the test through the returned sender
    fn live() -> (mpsc::UnboundedSender<Vec<u8>>, Scripted) {
        let (tx, rx) = mpsc::unbounded::<Vec<u8>>();
        let body: ByteStream = Box::pin(rx.map(|chunk| Ok(Bytes::from(chunk))));
        (
            tx,
            Scripted::Respond {
                status: 200,
                status_text: "OK",
                body: Some(body),
            },
        )
    }

    fn config() -> ChatConfig {
        ChatConfig::new("http://chat.test/api").with_greeting(None)
    }

    fn client_with(
        config: ChatConfig,
        script: Vec<Scripted>,
    ) -> (Arc<StreamingChatClient>, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::with(script);
        let client = Arc::new(StreamingChatClient::new(config, transport.clone()));
        (client, transport)
    }

    fn contents(client: &StreamingChatClient) -> Vec<(Sender, String)> {
        client
            .history()
            .iter()
            .map(|m| (m.sender(), m.content().to_string()))
            .collect()
    }

    async fn wait_for_partial(client: &StreamingChatClient, expected: &str) {
        let mut partial = client.subscribe();
        partial
            .wait_for(|text| text == expected)
            .await
            .expect("partial channel closed");
    }

    async fn wait_until_loading(client: &StreamingChatClient) {
        while !client.is_loading() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_default_config_posts_minimal_body() {
        let (client, transport) =
            client_with(config(), vec![ok(&["data: {\"response\":\"x\"}\n"])]);
        client.submit("  你好  ").await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://chat.test/api");
        assert_eq!(requests[0].1, json!({"message": "你好"}));
    }

    #[tokio::test]
    async fn test_changed_settings_are_posted() {
        let body = Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(vec![b"{\"response\":\"x\"}".to_vec()])),
        };
        let config = config().with_streaming(false).with_max_output_tokens(1000);
        let (client, transport) = client_with(config, vec![body]);
        client.submit("hi").await.unwrap();

        assert_eq!(
            transport.requests()[0].1,
            json!({"message": "hi", "max_tokens": 1000, "stream": false})
        );
    }

    #[tokio::test]
    async fn test_streaming_turn_completes_with_one_message() {
        let (client, _) = client_with(
            config(),
            vec![ok(&[
                "data: {\"response\":\"京剧\"}\n",
                "data: {\"response\":\"是国粹\"}\n",
                "data: [DONE]\n",
            ])],
        );

        let outcome = client.submit("京剧是什么？").await.unwrap();
        let TurnOutcome::Completed(message) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(message.content(), "京剧是国粹");
        assert_eq!(
            contents(&client),
            vec![
                (Sender::User, "京剧是什么？".to_string()),
                (Sender::Assistant, "京剧是国粹".to_string()),
            ]
        );
        assert!(!client.is_loading());
        assert_eq!(client.partial_text(), "");
    }

    #[tokio::test]
    async fn test_chunk_boundaries_do_not_matter() {
        let record = "data: {\"content\":\"霸王别姬\"}\n";
        let bytes = record.as_bytes();
        for split in [1, 5, 6, 12, bytes.len() - 1] {
            let body = Scripted::Respond {
                status: 200,
                status_text: "OK",
                body: Some(body_from_chunks(vec![
                    bytes[..split].to_vec(),
                    bytes[split..].to_vec(),
                ])),
            };
            let (client, _) = client_with(config(), vec![body]);
            let outcome = client.submit("q").await.unwrap();
            assert_eq!(outcome.message().unwrap().content(), "霸王别姬", "split at {}", split);
        }

        let bytewise = bytes.iter().map(|b| vec![*b]).collect::<Vec<_>>();
        let body = Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(bytewise)),
        };
        let (client, _) = client_with(config(), vec![body]);
        let outcome = client.submit("q").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "霸王别姬");
    }

    #[tokio::test]
    async fn test_each_shape_yields_text() {
        for frame in [
            r#"{"response":"x"}"#,
            r#"{"content":"x"}"#,
            r#"{"text":"x"}"#,
            r#"{"message":{"content":"x"}}"#,
        ] {
            let line = format!("data: {}\n", frame);
            let (client, _) = client_with(config(), vec![ok(&[line.as_str()])]);
            let outcome = client.submit("q").await.unwrap();
            assert_eq!(outcome.message().unwrap().content(), "x", "frame {}", frame);
        }
    }

    #[tokio::test]
    async fn test_shape_priority() {
        let (client, _) = client_with(
            config(),
            vec![ok(&[r#"data: {"text":"t","content":"c","response":"r"}"#, "\n"])],
        );
        let outcome = client.submit("q").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "r");
    }

    #[tokio::test]
    async fn test_sentinels_and_blank_lines_produce_nothing() {
        let (client, _) = client_with(config(), vec![ok(&["data: [DONE]\n", "data: \n", "\n"])]);
        let outcome = client.submit("q").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Empty));
        assert_eq!(contents(&client), vec![(Sender::User, "q".to_string())]);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_abort() {
        let (client, _) = client_with(
            config().with_diagnostics(true),
            vec![ok(&[
                "data: {\"response\":\"a\"}\n",
                "data: {not valid json\n",
                "data: {\"response\":\"b\"}\n",
            ])],
        );
        let outcome = client.submit("q").await.unwrap();

        assert_eq!(outcome.message().unwrap().content(), "ab");
        let trace = client.diagnostics();
        assert!(trace.contains("Connecting: http://chat.test/api"));
        assert!(trace.contains("Response status: 200"));
        assert!(trace.contains("Raw data: {not valid json"));
    }

    #[tokio::test]
    async fn test_fallback_line() {
        let (client, _) =
            client_with(config(), vec![ok(&["foo\":\"bar\",\"content\":\"hello\"\n"])]);
        let outcome = client.submit("q").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "hello");
    }

    #[tokio::test]
    async fn test_empty_accumulation_appends_nothing() {
        let (client, _) = client_with(
            config(),
            vec![ok(&["data: {\"foo\":\"bar\"}\n", "event: end\n"])],
        );
        let outcome = client.submit("q").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Empty));
        assert_eq!(client.history().len(), 1);
        assert!(!client.is_loading());
    }

    #[tokio::test]
    async fn test_partial_text_grows_monotonically() {
        let (tx, body) = live();
        let (client, _) = client_with(config(), vec![body]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });

        let mut seen = Vec::new();
        for (chunk, expected) in [
            ("data: {\"response\":\"生\"}\n", "生"),
            ("data: {\"response\":\"旦\"}\ndata: {\"resp", "生旦"),
            ("onse\":\"净丑\"}\n", "生旦净丑"),
        ] {
            tx.unbounded_send(chunk.as_bytes().to_vec()).unwrap();
            wait_for_partial(&client, expected).await;
            seen.push(client.partial_text());
        }
        drop(tx);

        let outcome = turn.await.unwrap().unwrap();
        assert_eq!(outcome.message().unwrap().content(), "生旦净丑");
        assert!(seen.windows(2).all(|pair| pair[1].starts_with(&pair[0])));
        assert_eq!(client.partial_text(), "");
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_in_flight() {
        let (tx, body) = live();
        let (client, transport) = client_with(config(), vec![body]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("first").await }
        });
        tx.unbounded_send(b"data: {\"response\":\"x\"}\n".to_vec()).unwrap();
        wait_for_partial(&client, "x").await;

        let err = client.submit("second").await.unwrap_err();
        assert!(matches!(err, ChatError::TurnInProgress));
        assert_eq!(transport.requests().len(), 1);

        drop(tx);
        turn.await.unwrap().unwrap();
        assert_eq!(
            contents(&client),
            vec![
                (Sender::User, "first".to_string()),
                (Sender::Assistant, "x".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let (client, transport) = client_with(config(), vec![]);
        assert!(matches!(client.submit("   \n").await, Err(ChatError::EmptyMessage)));
        assert!(client.history().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_without_request_is_noop() {
        let (client, _) = client_with(config(), vec![]);
        assert!(client.cancel().is_none());
        assert!(client.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let (tx, body) = live();
        let (client, _) = client_with(config(), vec![body]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });
        tx.unbounded_send(b"data: {\"response\":\"partial\"}\n".to_vec()).unwrap();
        wait_for_partial(&client, "partial").await;

        let notice = client.cancel().expect("turn was in flight");
        assert_eq!(notice.content(), CANCELLED_TEXT);
        assert!(client.cancel().is_none());
        assert_eq!(client.partial_text(), "");
        assert!(!client.is_loading());

        // late data must not reach the history
        let _ = tx.unbounded_send(b"data: {\"response\":\" more\"}\n".to_vec());
        let outcome = turn.await.unwrap().unwrap();

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(
            contents(&client),
            vec![
                (Sender::User, "q".to_string()),
                (Sender::Assistant, CANCELLED_TEXT.to_string()),
            ]
        );
        assert_eq!(client.partial_text(), "");
    }

    #[tokio::test]
    async fn test_cancel_before_headers() {
        let (client, _) = client_with(config(), vec![Scripted::Hang]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });
        wait_until_loading(&client).await;

        assert!(client.cancel().is_some());
        assert!(matches!(turn.await.unwrap().unwrap(), TurnOutcome::Cancelled));
        assert_eq!(client.history().len(), 2);
    }

    #[tokio::test]
    async fn test_client_usable_after_cancel() {
        let (client, _) = client_with(
            config(),
            vec![Scripted::Hang, ok(&["data: {\"response\":\"again\"}\n"])],
        );
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("one").await }
        });
        wait_until_loading(&client).await;
        client.cancel();
        turn.await.unwrap().unwrap();

        let outcome = client.submit("two").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "again");
        assert_eq!(client.history().len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_mid_stream_is_silent() {
        let (tx, body) = live();
        let (client, _) = client_with(config(), vec![body]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });
        tx.unbounded_send(b"data: {\"response\":\"partial\"}\n".to_vec()).unwrap();
        wait_for_partial(&client, "partial").await;

        client.shutdown();
        let outcome = turn.await.unwrap().unwrap();

        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(contents(&client), vec![(Sender::User, "q".to_string())]);
        assert!(!client.is_loading());
        assert_eq!(client.partial_text(), "");
        assert!(client.is_closed());
        assert!(client.cancel().is_none());
        assert!(matches!(client.submit("again").await, Err(ChatError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_turn_releases_in_flight_handle() {
        let (client, _) = client_with(config(), vec![Scripted::Hang]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });
        wait_until_loading(&client).await;

        turn.abort();
        let _ = turn.await;

        assert!(!client.is_loading());
        assert_eq!(client.history().len(), 1);
    }

    #[tokio::test]
    async fn test_non_streaming_response() {
        let whole = |body: &str| Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(vec![body.as_bytes().to_vec()])),
        };
        let (client, _) = client_with(
            config().with_streaming(false),
            vec![whole(r#"{"response":"hi"}"#), whole(r#"{"foo":"bar"}"#)],
        );

        let outcome = client.submit("one").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "hi");

        let outcome = client.submit("two").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Empty));
        assert_eq!(client.history().len(), 3);
    }

    #[tokio::test]
    async fn test_non_streaming_invalid_json_apologizes() {
        let body = Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(vec![b"<html>".to_vec()])),
        };
        let (client, _) = client_with(config().with_streaming(false), vec![body]);
        let outcome = client.submit("q").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { error: ChatError::Json(_), .. }));
        assert_eq!(client.history().last().unwrap().content(), APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn test_http_error_apologizes() {
        let failing = Scripted::Respond {
            status: 500,
            status_text: "Internal Server Error",
            body: Some(body_from_chunks(vec![b"data: {\"response\":\"leak\"}\n".to_vec()])),
        };
        let (client, _) = client_with(config(), vec![failing]);
        let outcome = client.submit("q").await.unwrap();

        let TurnOutcome::Failed { error, message } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(error, ChatError::Http { status: 500, .. }));
        assert_eq!(message.content(), APOLOGY_TEXT);
        assert_eq!(
            contents(&client),
            vec![
                (Sender::User, "q".to_string()),
                (Sender::Assistant, APOLOGY_TEXT.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_body_apologizes() {
        let empty = Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: None,
        };
        let (client, _) = client_with(config(), vec![empty]);
        let outcome = client.submit("q").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed { error: ChatError::EmptyBody, .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_apologizes() {
        let (client, _) = client_with(
            config().with_diagnostics(true),
            vec![Scripted::Fail("connection refused")],
        );
        let outcome = client.submit("q").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { error: ChatError::Transport(_), .. }));
        assert_eq!(client.history().last().unwrap().content(), APOLOGY_TEXT);
        assert!(client.diagnostics().contains("API error: Transport error: connection refused"));
        assert!(!client.is_loading());
    }

    #[tokio::test]
    async fn test_stream_error_discards_partial_text() {
        let (tx, rx) = mpsc::unbounded::<ChatResult<Bytes>>();
        let body: ByteStream = Box::pin(rx);
        let (client, _) = client_with(
            config(),
            vec![Scripted::Respond {
                status: 200,
                status_text: "OK",
                body: Some(body),
            }],
        );
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("q").await }
        });
        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"response\":\"half\"}\n"))).unwrap();
        wait_for_partial(&client, "half").await;
        tx.unbounded_send(Err(ChatError::Transport("reset by peer".into()))).unwrap();

        let outcome = turn.await.unwrap().unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        assert_eq!(
            contents(&client),
            vec![
                (Sender::User, "q".to_string()),
                (Sender::Assistant, APOLOGY_TEXT.to_string()),
            ]
        );
        assert_eq!(client.partial_text(), "");
    }

    #[tokio::test]
    async fn test_config_change_applies_to_next_turn() {
        let (tx, body) = live();
        let second = Scripted::Respond {
            status: 200,
            status_text: "OK",
            body: Some(body_from_chunks(vec![b"{\"response\":\"whole\"}".to_vec()])),
        };
        let (client, transport) = client_with(config(), vec![body, second]);
        let turn = tokio::spawn({
            let client = client.clone();
            async move { client.submit("one").await }
        });
        tx.unbounded_send(b"data: {\"response\":\"streamed\"}\n".to_vec()).unwrap();
        wait_for_partial(&client, "streamed").await;

        client.set_config(config().with_streaming(false));
        drop(tx);
        let outcome = turn.await.unwrap().unwrap();
        assert_eq!(outcome.message().unwrap().content(), "streamed");

        let outcome = client.submit("two").await.unwrap();
        assert_eq!(outcome.message().unwrap().content(), "whole");
        assert_eq!(transport.requests()[1].1, json!({"message": "two", "stream": false}));
    }

    #[tokio::test]
    async fn test_greeting_seeds_history() {
        let (client, _) = client_with(ChatConfig::default(), vec![]);
        let history = client.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender(), Sender::Assistant);
        assert_eq!(history[0].content(), DEFAULT_GREETING);
    }

    #[tokio::test]
    async fn test_diagnostics_toggle() {
        let (client, _) = client_with(config(), vec![ok(&["data: {\"response\":\"x\"}\n"])]);
        assert!(!client.diagnostics_enabled());
        client.submit("q").await.unwrap();
        assert_eq!(client.diagnostics(), "");

        client.set_diagnostics(true);
        assert!(client.diagnostics_enabled());
        assert!(client.config().diagnostics);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_racing_completion_leaves_one_terminal_message() {
        for _ in 0..50 {
            let (client, _) = client_with(config(), vec![ok(&["data: {\"response\":\"x\"}\n"])]);

            // cancels as soon as the answer shows up in the history
            let canceller = std::thread::spawn({
                let client = client.clone();
                move || loop {
                    if client.history().iter().any(|m| m.content() == "x") {
                        return client.cancel();
                    }
                    std::thread::yield_now();
                }
            });

            let outcome = client.submit("q").await.unwrap();
            let late_cancel = canceller.join().unwrap();

            assert!(matches!(outcome, TurnOutcome::Completed(_)));
            assert!(late_cancel.is_none());
            assert_eq!(
                contents(&client),
                vec![
                    (Sender::User, "q".to_string()),
                    (Sender::Assistant, "x".to_string()),
                ]
            );
            assert!(!client.is_loading());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_concurrent_with_turn_appends_one_terminal_message() {
        for _ in 0..50 {
            let (tx, body) = live();
            let (client, _) = client_with(config(), vec![body]);
            let turn = tokio::spawn({
                let client = client.clone();
                async move { client.submit("q").await }
            });
            tx.unbounded_send(b"data: {\"response\":\"x\"}\n".to_vec()).unwrap();
            wait_for_partial(&client, "x").await;

            // end of stream and cancel race each other
            drop(tx);
            let cancelled = client.cancel();
            let outcome = turn.await.unwrap().unwrap();

            let terminal = client
                .history()
                .iter()
                .filter(|m| m.sender() == Sender::Assistant)
                .count();
            assert_eq!(terminal, 1);
            match outcome {
                TurnOutcome::Completed(_) => assert!(cancelled.is_none()),
                TurnOutcome::Cancelled => assert!(cancelled.is_some()),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_with_http_rejects_bad_endpoint() {
        let result = StreamingChatClient::with_http(ChatConfig::new("not a url"));
        assert!(matches!(result, Err(ChatError::Config(_))));
    }
}
