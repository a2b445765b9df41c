// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::{fmt, pin::Pin, time::Duration};

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::request::ChatRequest;
use crate::config::ChatConfig;

/// Response body delivered chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = ChatResult<Bytes>> + Send>>;

/// Status line, headers and (possibly absent) body of a chat response
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<ByteStream>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Headers as a JSON object, for diagnostics
    pub fn headers_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.headers
                .iter()
                .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
                .collect(),
        )
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// Read a whole body into memory
pub async fn collect_body(mut body: ByteStream) -> ChatResult<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Network seam of the chat client
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// POST `request` as JSON to `endpoint`. Resolves once response headers
    /// have arrived; the body is read separately. Dropping the future aborts
    /// the request.
    async fn post_json(
        &self,
        endpoint: &str,
        request: &ChatRequest,
    ) -> ChatResult<TransportResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in &config.extra_headers {
            headers.insert(
                key.parse::<HeaderName>()
                    .map_err(|e| ChatError::Config(format!("Invalid header key: {}", e)))?,
                value
                    .parse::<HeaderValue>()
                    .map_err(|e| ChatError::Config(format!("Invalid header value: {}", e)))?,
            );
        }

        Ok(Self { client, headers })
    }
}

/// Statuses for which a fetch response carries no body at all
fn is_null_body_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 101 | 204 | 205 | 304)
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_json(
        &self,
        endpoint: &str,
        request: &ChatRequest,
    ) -> ChatResult<TransportResponse> {
        let response = self
            .client
            .post(endpoint)
            .headers(self.headers.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(key, value)| {
                (
                    key.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = if is_null_body_status(status) {
            None
        } else {
            let stream: ByteStream = Box::pin(response.bytes_stream().map_err(ChatError::from));
            Some(stream)
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// Build a body stream from in-memory chunks
pub fn body_from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Vec<u8>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(chunks).map(|chunk| Ok::<_, ChatError>(Bytes::from(chunk))))
}
