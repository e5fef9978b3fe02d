// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is read from an optional TOML file (`sift.toml` by
//! convention). Every field has a default, so an empty file is valid:
//!
//! ```toml
//! url = "ws://localhost:8000/ws/analyze"
//! connect_timeout_ms = 5000
//! reconnect_base_delay_ms = 1000
//! reconnect_max_attempts = 5
//! ack_timeout_ms = 30000
//! analysis_idle_timeout_ms = 300000
//! chunk_size = 1048576
//! max_files = 5
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use sift_core::chunk::{CHUNK_SIZE, MAX_FILES};

use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};
use crate::session::SessionOptions;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "sift.toml";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Engine endpoint (`ws://` or `wss://`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Max time to wait for the channel to open, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// First reconnect delay in milliseconds; doubles on each attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// Max time to wait for a chunk acknowledgment, in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Max silence from the engine during analysis, in milliseconds.
    #[serde(default = "default_analysis_idle_timeout_ms")]
    pub analysis_idle_timeout_ms: u64,
    /// Raw bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Files per session.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_url() -> String {
    "ws://localhost:8000/ws/analyze".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_analysis_idle_timeout_ms() -> u64 {
    300_000
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_max_files() -> usize {
    MAX_FILES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            ack_timeout_ms: default_ack_timeout_ms(),
            analysis_idle_timeout_ms: default_analysis_idle_timeout_ms(),
            chunk_size: default_chunk_size(),
            max_files: default_max_files(),
        }
    }
}

impl ClientConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Serializes the config as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))
    }

    /// Checks the endpoint scheme and that no limit is zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid url '{}'\n  hint: use a ws:// or wss:// endpoint",
                self.url
            )));
        }
        let limits = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("analysis_idle_timeout_ms", self.analysis_idle_timeout_ms),
            ("chunk_size", self.chunk_size as u64),
            ("max_files", self.max_files as u64),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_reconnect_attempts: self.reconnect_max_attempts,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunk_size: self.chunk_size,
            max_files: self.max_files,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            analysis_idle_timeout: Duration::from_millis(self.analysis_idle_timeout_ms),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
