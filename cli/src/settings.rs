// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use dirs::config_dir;
use jingju_core::ChatConfig;
use log::info;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "jingju_chat.yaml";

const USER_CONFIG_DIR: &str = "jingju-chat";
const USER_CONFIG_FILE: &str = "config.yaml";

/// `<config_dir>/jingju-chat/config.yaml`, if the platform has a config dir
pub fn user_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE))
}

/// Pick the config file to load.
///
/// An explicit path always wins, even if it does not exist, so that a typo
/// is reported instead of silently falling back.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    local: &Path,
    user: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if local.exists() {
        return Some(local.to_path_buf());
    }
    user.filter(|path| path.exists())
}

/// Load the chat configuration, falling back to built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<ChatConfig> {
    let path = resolve_config_path(explicit, Path::new(LOCAL_CONFIG_FILE), user_config_path());

    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ChatConfig::from_yaml(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => Ok(ChatConfig::default()),
    }
}

/// Command-line settings layered over the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub max_tokens: Option<u32>,
    pub no_stream: bool,
    pub debug: bool,
}

impl Overrides {
    pub fn apply(&self, mut config: ChatConfig) -> ChatConfig {
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_output_tokens(max_tokens);
        }
        if self.no_stream {
            config = config.with_streaming(false);
        }
        if self.debug {
            config = config.with_diagnostics(true);
        }
        config
    }
}
