// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Env-var-only configuration. No flag parsing: every option is read under
//! the `AIRSTATE_` prefix, `RUST_LOG` aside, which `tracing_subscriber`
//! reads directly.

use serde::Deserialize;

fn default_port() -> u16 {
    11001
}

fn default_admin_port() -> u16 {
    11002
}

fn default_max_transactional_routines() -> usize {
    4
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_session_channel_capacity() -> usize {
    128
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_max_transactional_routines")]
    pub max_transactional_routines: usize,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_session_channel_capacity")]
    pub session_channel_capacity: usize,
    /// Defaults to `max_transactional_routines` when unset.
    #[serde(default)]
    pub response_channel_capacity: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::prefixed("AIRSTATE_").from_env::<Self>()
    }

    pub fn resolved_response_channel_capacity(&self) -> usize {
        self.response_channel_capacity.unwrap_or(self.max_transactional_routines)
    }
}
