// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

/// Human-readable trace of the current turn, kept only while enabled.
///
/// Entries are built lazily so a disabled log costs nothing.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    enabled: bool,
    entries: Vec<String>,
}

impl DiagnosticLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Replace the log with the opening entry of a new turn
    pub fn begin(&mut self, entry: impl FnOnce() -> String) {
        if self.enabled {
            self.entries.clear();
            self.entries.push(entry());
        }
    }

    pub fn record(&mut self, entry: impl FnOnce() -> String) {
        if self.enabled {
            self.entries.push(entry());
        }
    }

    /// The whole log as displayed text
    pub fn text(&self) -> String {
        self.entries.join("\n\n")
    }
}
