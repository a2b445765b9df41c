// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

//! Streaming turn demonstration
//!
//! Replays a canned SSE response through the chat client, printing the
//! partial text as it grows and the final history. No network is used.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use jingju_core::chat::transport::body_from_chunks;
use jingju_core::{
    ChatConfig, ChatRequest, ChatResult, ChatTransport, StreamingChatClient, TransportResponse,
    TurnOutcome,
};

const SAMPLE_STREAM: &[&str] = &[
    "data: {\"response\":\"京剧形成于\"}\n",
    "data: {\"response\":\"清代北京，\"}\n\ndata: {\"con",
    "tent\":\"融合了徽调与汉调。\"}\n",
    "data: {not json}\n",
    "data: [DONE]\n",
];

/// Transport that answers every request with [`SAMPLE_STREAM`]
struct ReplayTransport;

#[async_trait]
impl ChatTransport for ReplayTransport {
    async fn post_json(
        &self,
        endpoint: &str,
        request: &ChatRequest,
    ) -> ChatResult<TransportResponse> {
        println!("📤 POST {}", endpoint);
        println!("   {}", serde_json::to_string(request)?);
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(TransportResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
            body: Some(body_from_chunks(
                SAMPLE_STREAM
                    .iter()
                    .map(|chunk| chunk.as_bytes().to_vec())
                    .collect::<Vec<_>>(),
            )),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🎭 Streaming Chat Demonstration");
    println!("===============================");

    let config = ChatConfig::default().with_diagnostics(true);
    let client = Arc::new(StreamingChatClient::new(config, Arc::new(ReplayTransport)));

    let mut partial = client.subscribe();
    let watcher = tokio::spawn(async move {
        while partial.changed().await.is_ok() {
            let text = partial.borrow_and_update().clone();
            if !text.is_empty() {
                println!("📦 Partial: {}", text);
            }
        }
    });

    match client.submit("京剧是怎么形成的？").await? {
        TurnOutcome::Completed(message) => println!("\n✅ Answer: {}", message.content()),
        TurnOutcome::Empty => println!("\n⚠️  No answer text"),
        TurnOutcome::Cancelled => println!("\n🛑 Cancelled"),
        TurnOutcome::Failed { error, message } => {
            println!("\n❌ {} ({})", message.content(), error)
        }
    }

    println!("\n📜 History:");
    for message in client.history() {
        println!("   [{}] {}: {}", message.id(), message.sender(), message.content());
    }

    println!("\n🔍 Diagnostics:\n{}", client.diagnostics());

    drop(client);
    watcher.await?;
    Ok(())
}
