//! Configuration management for the poll engine
//!
//! Loads tunables from environment variables (and a `.env` file when present)
//! with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Limits applied to ballots and new polls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Minimum number of ranked entries before a ranked ballot may be submitted
    pub ranked_min_entries: usize,

    /// Minimum number of options a new poll must carry
    pub min_options: usize,

    /// Maximum number of options a new poll may carry
    pub max_options: usize,

    /// Maximum option text length in characters (after trimming)
    pub max_option_length: usize,
}

impl PollConfig {
    /// Load poll configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            ranked_min_entries: parse_or(
                &lookup,
                "POLL_RANKED_MIN_ENTRIES",
                defaults.ranked_min_entries,
            )?,
            min_options: parse_or(&lookup, "POLL_MIN_OPTIONS", defaults.min_options)?,
            max_options: parse_or(&lookup, "POLL_MAX_OPTIONS", defaults.max_options)?,
            max_option_length: parse_or(
                &lookup,
                "POLL_MAX_OPTION_LENGTH",
                defaults.max_option_length,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Check the relationships between the limits
    pub fn validate(&self) -> Result<()> {
        if self.ranked_min_entries == 0 {
            return Err(Error::config("POLL_RANKED_MIN_ENTRIES must be at least 1"));
        }
        if self.min_options == 0 {
            return Err(Error::config("POLL_MIN_OPTIONS must be at least 1"));
        }
        if self.max_options < self.min_options {
            return Err(Error::config(
                "POLL_MAX_OPTIONS must not be smaller than POLL_MIN_OPTIONS",
            ));
        }
        if self.max_option_length == 0 {
            return Err(Error::config("POLL_MAX_OPTION_LENGTH must be at least 1"));
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            ranked_min_entries: 2,
            min_options: 2,
            max_options: 12,
            max_option_length: 200,
        }
    }
}

fn parse_or<F>(lookup: &F, key: &str, default: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid {key}: {raw}"))),
        None => Ok(default),
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub poll: PollConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let poll = PollConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        };

        Ok(Self { poll, logging })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Result<Self> {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Ok(Self {
            poll: PollConfig::for_testing(),
            logging,
        })
    }
}
