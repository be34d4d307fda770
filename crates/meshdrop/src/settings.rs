//! Settings file for the meshdrop tools
//!
//! Settings are read from `meshdrop.toml`. Every table and key is optional;
//! whatever is present overrides the built-in defaults, and command-line flags
//! override the file.

use crate::geometry::{ParseOptions, SplitMode};
use crate::ingest::CoordinatorOptions;
use meshdrop_network::{ReceiverConfig, SenderConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Filename looked up in the working directory
pub const SETTINGS_FILENAME: &str = "meshdrop.toml";

/// Receiver service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverSettings {
    /// Port to listen on
    pub port: Option<u16>,
    /// Address to bind, e.g. "0.0.0.0"
    pub bind: Option<String>,
    /// Directory received files are stored in
    pub storage_dir: Option<PathBuf>,
    /// Accept loop poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,
    /// Largest accepted payload in megabytes
    pub max_payload_mb: Option<u64>,
    /// Per-connection read timeout in seconds; unset means no timeout
    pub read_timeout_secs: Option<u64>,
    /// Extra reserved command names
    pub commands: Option<Vec<String>>,
}

/// Sender settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderSettings {
    pub connect_timeout_ms: Option<u64>,
    pub drain_delay_ms: Option<u64>,
    /// Pause between files of a batch
    pub pause_ms: Option<u64>,
}

/// Parser settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometrySettings {
    pub split_mode: Option<SplitMode>,
    pub max_indices_per_batch: Option<usize>,
    pub lines_per_step: Option<usize>,
    pub max_line_len: Option<usize>,
    /// Parse steps the service runs between queue checks
    pub steps_per_tick: Option<usize>,
}

/// Top-level settings struct, serialized as meshdrop.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub receiver: Option<ReceiverSettings>,
    pub sender: Option<SenderSettings>,
    pub geometry: Option<GeometrySettings>,
}

impl Settings {
    /// Load settings from a meshdrop.toml file in the given directory.
    /// Returns Ok(None) if the file doesn't exist.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, SettingsError> {
        Self::load(&dir.join(SETTINGS_FILENAME))
    }

    /// Load settings from an explicit path.
    /// Returns Ok(None) if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, SettingsError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|e| SettingsError::ParseToml {
                path: path.to_path_buf(),
                source: e,
            })?;
        info!("Loaded settings from {:?}", path);
        Ok(Some(settings))
    }

    pub fn receiver(&self) -> ReceiverSettings {
        self.receiver.clone().unwrap_or_default()
    }

    pub fn sender(&self) -> SenderSettings {
        self.sender.clone().unwrap_or_default()
    }

    pub fn apply_to_receiver(&self, config: &mut ReceiverConfig) {
        let Some(receiver) = &self.receiver else {
            return;
        };
        if let Some(ms) = receiver.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(mb) = receiver.max_payload_mb {
            config.max_payload_len = mb.saturating_mul(1024 * 1024);
        }
        if let Some(secs) = receiver.read_timeout_secs {
            config.read_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(commands) = &receiver.commands {
            for command in commands {
                if !config.commands.contains(command) {
                    config.commands.push(command.clone());
                }
            }
        }
    }

    pub fn apply_to_sender(&self, config: &mut SenderConfig) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Some(ms) = sender.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = sender.drain_delay_ms {
            config.drain_delay = Duration::from_millis(ms);
        }
    }

    pub fn apply_to_parse(&self, options: &mut ParseOptions) {
        let Some(geometry) = &self.geometry else {
            return;
        };
        if let Some(split_mode) = geometry.split_mode {
            options.split_mode = split_mode;
        }
        if let Some(max) = geometry.max_indices_per_batch {
            options.max_indices_per_batch = max;
        }
        if let Some(lines) = geometry.lines_per_step {
            options.lines_per_step = lines;
        }
        if let Some(len) = geometry.max_line_len {
            options.max_line_len = len;
        }
    }

    pub fn apply_to_coordinator(&self, options: &mut CoordinatorOptions) {
        self.apply_to_parse(&mut options.parse);
        if let Some(steps) = self.geometry.as_ref().and_then(|g| g.steps_per_tick) {
            options.steps_per_tick = steps;
        }
    }
}

/// Errors that can occur during settings operations
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
}
