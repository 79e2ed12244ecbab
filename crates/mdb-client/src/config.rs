// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{dial, with_dial_timeout, with_request_timeout, Client, ClientOption};
use crate::error::Result;
use crate::protocol::{DEFAULT_ADDR, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

pub const ENV_ADDR: &str = "MDB_ADDR";
pub const ENV_DIAL_TIMEOUT_MS: &str = "MDB_DIAL_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "MDB_REQUEST_TIMEOUT_MS";

/// Connection settings, loadable from the environment or any serde source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub addr: String,
    pub dial_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT.as_millis() as u64,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Reads `MDB_ADDR`, `MDB_DIAL_TIMEOUT_MS` and `MDB_REQUEST_TIMEOUT_MS`. Unset, blank or
    /// unparsable values keep their defaults. A timeout of 0 is kept and rejected by
    /// [`ClientConfig::dial`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(addr) = read(ENV_ADDR) {
            config.addr = addr;
        }
        if let Some(ms) = read(ENV_DIAL_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            config.dial_timeout_ms = ms;
        }
        if let Some(ms) = read(ENV_REQUEST_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            config.request_timeout_ms = ms;
        }
        config
    }

    pub fn options(&self) -> Vec<ClientOption> {
        vec![
            with_dial_timeout(Duration::from_millis(self.dial_timeout_ms)),
            with_request_timeout(Duration::from_millis(self.request_timeout_ms)),
        ]
    }

    pub fn dial(&self) -> Result<Client> {
        dial(&self.addr, self.options())
    }
}

pub fn dial_from_env() -> Result<Client> {
    ClientConfig::from_env().dial()
}
