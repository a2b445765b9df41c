// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

pub mod chat;
pub mod config;

pub use chat::*;
pub use config::*;
