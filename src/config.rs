//! Driver configuration
//!
//! Timing constants come from the camera's documented behaviour: it needs
//! ~100 ms to settle after reset, baud or resolution changes, and must not see
//! another command for ~3 s after a reset. Every value can be overridden from
//! `LINKSPRITE_*` environment variables or a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::{BaudRate, DEFAULT_CHUNK_DELAY};
use crate::error::{CameraError, Result};

/// Chunk size used when nothing else is configured
pub const DEFAULT_CHUNK_SIZE: u16 = 256;

/// Camera driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// UART rate the transport is opened at
    pub baud_rate: u32,
    /// Bytes requested per fetch-chunk command
    pub chunk_size: u16,
    /// Transport read timeout
    pub read_timeout_ms: u64,
    /// Consecutive empty reads tolerated before a read fails
    pub read_attempts: u32,
    /// Pause between read attempts
    pub read_retry_delay_ms: u64,
    /// Pause after snap, size and chunk requests
    pub command_delay_ms: u64,
    /// Pause after reset, baud and resolution commands before reading the ack
    pub settle_delay_ms: u64,
    /// Time after a reset during which no command may be sent
    pub reset_quiet_period_ms: u64,
    /// Trailer mismatches tolerated per chunk
    pub max_chunk_retries: u32,
    /// Inter-chunk delay field of the fetch-chunk command (device units)
    pub chunk_delay: u16,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B38400.bps(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout_ms: 250,
            read_attempts: 3,
            read_retry_delay_ms: 50,
            command_delay_ms: 50,
            settle_delay_ms: 100,
            reset_quiet_period_ms: 3000,
            max_chunk_retries: 2,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }
}

impl CameraConfig {
    /// Defaults overlaid with any `LINKSPRITE_*` environment variables
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CameraConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        overlay(&lookup, "LINKSPRITE_BAUD_RATE", &mut config.baud_rate);
        overlay(&lookup, "LINKSPRITE_CHUNK_SIZE", &mut config.chunk_size);
        overlay(&lookup, "LINKSPRITE_READ_TIMEOUT_MS", &mut config.read_timeout_ms);
        overlay(&lookup, "LINKSPRITE_READ_ATTEMPTS", &mut config.read_attempts);
        overlay(
            &lookup,
            "LINKSPRITE_READ_RETRY_DELAY_MS",
            &mut config.read_retry_delay_ms,
        );
        overlay(&lookup, "LINKSPRITE_COMMAND_DELAY_MS", &mut config.command_delay_ms);
        overlay(&lookup, "LINKSPRITE_SETTLE_DELAY_MS", &mut config.settle_delay_ms);
        overlay(
            &lookup,
            "LINKSPRITE_RESET_QUIET_PERIOD_MS",
            &mut config.reset_quiet_period_ms,
        );
        overlay(
            &lookup,
            "LINKSPRITE_MAX_CHUNK_RETRIES",
            &mut config.max_chunk_retries,
        );
        overlay(&lookup, "LINKSPRITE_CHUNK_DELAY", &mut config.chunk_delay);

        config
    }

    /// Load settings from a JSON file; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Transport` if the file cannot be read and
    /// `CameraError::InvalidConfig` if it is not valid JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| CameraError::InvalidConfig(e.to_string()))
    }

    /// Check that the settings can drive the protocol
    ///
    /// # Errors
    ///
    /// Returns `CameraError::InvalidConfig` for a chunk size that cannot hold
    /// the end marker or a zero read budget, and
    /// `CameraError::UnsupportedBaudRate` for a rate the camera cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 2 {
            return Err(CameraError::InvalidConfig(format!(
                "chunk size {} is smaller than the end marker",
                self.chunk_size
            )));
        }
        if self.read_attempts == 0 {
            return Err(CameraError::InvalidConfig(
                "read attempts must be at least 1".to_string(),
            ));
        }
        BaudRate::try_from(self.baud_rate)?;
        Ok(())
    }

    /// Configuration with every delay zeroed, for simulated devices
    pub fn without_delays() -> Self {
        Self {
            read_retry_delay_ms: 0,
            command_delay_ms: 0,
            settle_delay_ms: 0,
            reset_quiet_period_ms: 0,
            ..Self::default()
        }
    }

    /// Transport read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Pause between read attempts
    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    /// Pause after snap, size and chunk requests
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    /// Pause after reset, baud and resolution commands
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Quiet period required after a reset
    pub fn reset_quiet_period(&self) -> Duration {
        Duration::from_millis(self.reset_quiet_period_ms)
    }
}

fn overlay<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => log::warn!("Ignoring {}='{}': not a valid number", key, raw),
    }
}
