// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Muster state configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for the document store
    pub database_url: String,
    /// Interval between agent heartbeat writes
    pub presence_period: Duration,
    /// Interval between presence watcher polls
    pub presence_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `MUSTER_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `MUSTER_PRESENCE_PERIOD_MS`: heartbeat period in milliseconds (default: 500)
    /// - `MUSTER_PRESENCE_POLL_MS`: watcher poll interval in milliseconds (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("MUSTER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("MUSTER_DATABASE_URL"))?;

        let presence_period_ms: u64 = std::env::var("MUSTER_PRESENCE_PERIOD_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MUSTER_PRESENCE_PERIOD_MS", "must be a positive integer")
            })?;

        let presence_poll_ms: u64 = std::env::var("MUSTER_PRESENCE_POLL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MUSTER_PRESENCE_POLL_MS", "must be a positive integer")
            })?;

        if presence_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUSTER_PRESENCE_PERIOD_MS",
                "must be greater than zero",
            ));
        }
        if presence_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUSTER_PRESENCE_POLL_MS",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            database_url,
            presence_period: Duration::from_millis(presence_period_ms),
            presence_poll_interval: Duration::from_millis(presence_poll_ms),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
