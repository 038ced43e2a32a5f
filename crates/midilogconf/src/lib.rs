//! Minimal configuration loading for midilog.
//!
//! Kept dependency-light so both the daemon and offline tools can import it.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): fixed for the life of the process -
//!   log directory, timing, input port, telemetry.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed runtime state.
//!   After startup, the engine becomes the source of truth.
//!
//! # Usage
//!
//! ```rust,no_run
//! use midilogconf::MidilogConfig;
//!
//! let config = MidilogConfig::load().expect("Failed to load config");
//! println!("Log dir: {}", config.infra.paths.log_dir.display());
//! println!("Tick: {}ms", config.infra.capture.tick_ms);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/midilog/config.toml` (system)
//! 2. `~/.config/midilog/config.toml` (user)
//! 3. `./midilog.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`MIDILOG_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! log_dir = "/mnt/sdcard"
//!
//! [capture]
//! tick_ms = 1
//! ticks_per_beat = 500
//! idle_timeout_ms = 300000
//!
//! [input]
//! port = "USB MIDI"
//! mark_cc = 80
//! tone_cc = 81
//!
//! [telemetry]
//! log_level = "info"
//!
//! [bootstrap]
//! tone_enabled = false
//! marker_labels = "sequence"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, MarkerLabelStyle};
pub use infra::{
    CaptureConfig, InfraConfig, InputConfig, PathsConfig, RemainderMode, TelemetryConfig,
};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Largest identity space an `NNN` suffix can address.
pub const MAX_SESSION_CAPACITY: u32 = 1000;

/// Longest prefix that still leaves room for `NNN` in an 8.3 name.
pub const MAX_PREFIX_LEN: usize = 5;

/// Largest delta a variable-length quantity can carry, in ticks.
pub const MAX_DELTA_TICKS: u64 = 0x0FFF_FFFF;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete midilog configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MidilogConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl MidilogConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/midilog/config.toml`
    /// 3. `~/.config/midilog/config.toml`
    /// 4. `./midilog.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    ///
    /// The result is validated; an inconsistent timing setup fails here rather
    /// than producing unreadable logs later.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Declared tempo in microseconds per quarter note.
    pub fn microseconds_per_beat(&self) -> u64 {
        let capture = &self.infra.capture;
        u64::from(capture.tick_ms) * 1000 * u64::from(capture.ticks_per_beat)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.infra.capture;

        if capture.tick_ms == 0 {
            return Err(ConfigError::Invalid("capture.tick_ms must be positive".into()));
        }
        if capture.ticks_per_beat == 0 || capture.ticks_per_beat >= 0x8000 {
            return Err(ConfigError::Invalid(format!(
                "capture.ticks_per_beat must be in 1..32768, got {}",
                capture.ticks_per_beat
            )));
        }
        let tempo = self.microseconds_per_beat();
        if tempo >= 1 << 24 {
            return Err(ConfigError::Invalid(format!(
                "tempo of {} us/beat does not fit in 24 bits; lower tick_ms or ticks_per_beat",
                tempo
            )));
        }
        if capture.session_capacity == 0 || capture.session_capacity > MAX_SESSION_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "capture.session_capacity must be in 1..={}, got {}",
                MAX_SESSION_CAPACITY, capture.session_capacity
            )));
        }
        if capture.file_prefix.is_empty() || capture.file_prefix.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::Invalid(format!(
                "capture.file_prefix must be 1 to {} characters, got {:?}",
                MAX_PREFIX_LEN, capture.file_prefix
            )));
        }
        if !capture.file_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(format!(
                "capture.file_prefix must be ASCII letters and digits, got {:?}",
                capture.file_prefix
            )));
        }
        if capture.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.flush_interval_ms must be positive".into(),
            ));
        }
        if capture.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.idle_timeout_ms must be positive".into(),
            ));
        }
        // The longest silence a session can hold must still encode as one delta
        let max_idle_ms = MAX_DELTA_TICKS * u64::from(capture.tick_ms);
        if u64::from(capture.idle_timeout_ms) > max_idle_ms {
            return Err(ConfigError::Invalid(format!(
                "capture.idle_timeout_ms must be at most {} with {}ms ticks, got {}",
                max_idle_ms, capture.tick_ms, capture.idle_timeout_ms
            )));
        }
        if capture.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.poll_interval_ms must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so sections come out in a readable order
        let infra = &self.infra;
        let mut output = String::new();

        output.push_str("# midilog configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!("log_dir = \"{}\"\n", infra.paths.log_dir.display()));

        output.push_str("\n[capture]\n");
        output.push_str(&format!("tick_ms = {}\n", infra.capture.tick_ms));
        output.push_str(&format!("ticks_per_beat = {}\n", infra.capture.ticks_per_beat));
        output.push_str(&format!(
            "flush_interval_ms = {}\n",
            infra.capture.flush_interval_ms
        ));
        output.push_str(&format!("idle_timeout_ms = {}\n", infra.capture.idle_timeout_ms));
        output.push_str(&format!(
            "session_capacity = {}\n",
            infra.capture.session_capacity
        ));
        output.push_str(&format!("file_prefix = \"{}\"\n", infra.capture.file_prefix));
        output.push_str(&format!(
            "poll_interval_ms = {}\n",
            infra.capture.poll_interval_ms
        ));
        let remainder = match infra.capture.remainder {
            RemainderMode::Carry => "carry",
            RemainderMode::Drop => "drop",
        };
        output.push_str(&format!("remainder = \"{}\"\n", remainder));

        output.push_str("\n[input]\n");
        output.push_str(&format!("port = \"{}\"\n", infra.input.port));
        output.push_str(&format!("mark_cc = {}\n", infra.input.mark_cc));
        output.push_str(&format!("tone_cc = {}\n", infra.input.tone_cc));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", infra.telemetry.log_level));

        output.push_str("\n[bootstrap]\n");
        output.push_str(&format!("tone_enabled = {}\n", self.bootstrap.tone_enabled));
        let labels = match self.bootstrap.marker_labels {
            MarkerLabelStyle::Sequence => "sequence",
            MarkerLabelStyle::Clock => "clock",
        };
        output.push_str(&format!("marker_labels = \"{}\"\n", labels));

        output
    }
}
