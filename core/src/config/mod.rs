// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;
use yaml_rust::{Yaml, YamlLoader};

use crate::chat::message::DEFAULT_GREETING;

pub const DEFAULT_ENDPOINT: &str = "https://api.jingju.weidaoo.me";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 524;
pub const DEFAULT_STREAMING: bool = true;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Config errors
#[derive(Debug, Clone, Serialize, Deserialize, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to load file: {0}")]
    LoadFileError(String),

    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Values the chat server assumes when a request field is omitted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerDefaults {
    pub max_output_tokens: u32,
    pub streaming: bool,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            streaming: DEFAULT_STREAMING,
        }
    }
}

/// Request configuration for the chat client.
///
/// A turn snapshots the configuration when it starts; later changes only
/// affect the next turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    pub endpoint: String,
    pub streaming: bool,
    pub max_output_tokens: u32,
    pub server_defaults: ServerDefaults,
    pub greeting: Option<String>,
    pub diagnostics: bool,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            streaming: DEFAULT_STREAMING,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            server_defaults: ServerDefaults::default(),
            greeting: Some(DEFAULT_GREETING.to_string()),
            diagnostics: false,
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT_SECS),
            extra_headers: HashMap::new(),
        }
    }
}

impl ChatConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::default().with_endpoint(endpoint)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_extra_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    /// Check that the endpoint is an absolute http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(invalid(format!("unsupported scheme `{}`", other))),
        }
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::LoadFileError(path.display().to_string()))?;
        Self::from_yaml_str(&source)
    }

    /// Parse the `chat:` section of a YAML document. Missing keys keep
    /// their defaults.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(source)
            .map_err(|e| ConfigError::LoadFileError(e.to_string()))?;

        let mut config = Self::default();
        let Some(doc) = docs.first() else {
            return Ok(config);
        };
        let chat = &doc["chat"];
        if chat.is_badvalue() || chat.is_null() {
            return Ok(config);
        }

        if let Some(endpoint) = get_str_value_or_none_from_yaml(chat, "endpoint")? {
            config.endpoint = endpoint;
        }
        if let Some(streaming) = get_bool_value_or_none_from_yaml(chat, "streaming")? {
            config.streaming = streaming;
        }
        if let Some(max_tokens) = get_u32_value_or_none_from_yaml(chat, "max_tokens")? {
            config.max_output_tokens = max_tokens;
        }
        match &chat["greeting"] {
            Yaml::BadValue => {}
            Yaml::Null => config.greeting = None,
            _ => config.greeting = get_str_value_or_none_from_yaml(chat, "greeting")?,
        }
        if let Some(diagnostics) = get_bool_value_or_none_from_yaml(chat, "diagnostics")? {
            config.diagnostics = diagnostics;
        }
        match &chat["connect_timeout"] {
            Yaml::BadValue => {}
            Yaml::Null => config.connect_timeout_secs = None,
            _ => {
                config.connect_timeout_secs =
                    get_u32_value_or_none_from_yaml(chat, "connect_timeout")?.map(u64::from)
            }
        }

        if let Some(headers) = chat["extra_headers"].as_hash() {
            for (key, value) in headers {
                let (Some(key), Some(value)) = (key.as_str(), value.as_str()) else {
                    return Err(ConfigError::InvalidValue {
                        key: "extra_headers".to_string(),
                        reason: "header names and values must be strings".to_string(),
                    });
                };
                config.extra_headers.insert(key.to_string(), value.to_string());
            }
        }

        let defaults = &chat["server_defaults"];
        if !defaults.is_badvalue() {
            if let Some(max_tokens) = get_u32_value_or_none_from_yaml(defaults, "max_tokens")? {
                config.server_defaults.max_output_tokens = max_tokens;
            }
            if let Some(stream) = get_bool_value_or_none_from_yaml(defaults, "stream")? {
                config.server_defaults.streaming = stream;
            }
        }

        Ok(config)
    }
}

fn invalid_value(key: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected {}", expected),
    }
}

fn get_str_value_or_none_from_yaml(item: &Yaml, key: &str) -> Result<Option<String>, ConfigError> {
    match &item[key] {
        Yaml::BadValue => Ok(None),
        Yaml::String(value) => Ok(Some(value.clone())),
        _ => Err(invalid_value(key, "a string")),
    }
}

fn get_u32_value_or_none_from_yaml(item: &Yaml, key: &str) -> Result<Option<u32>, ConfigError> {
    match &item[key] {
        Yaml::BadValue => Ok(None),
        Yaml::Integer(value) => u32::try_from(*value)
            .map(Some)
            .map_err(|_| invalid_value(key, "a non-negative 32-bit integer")),
        _ => Err(invalid_value(key, "an integer")),
    }
}

fn get_bool_value_or_none_from_yaml(item: &Yaml, key: &str) -> Result<Option<bool>, ConfigError> {
    match &item[key] {
        Yaml::BadValue => Ok(None),
        Yaml::Boolean(value) => Ok(Some(*value)),
        _ => Err(invalid_value(key, "a boolean")),
    }
}
