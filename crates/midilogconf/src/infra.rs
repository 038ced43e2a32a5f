//! Infrastructure configuration - fixed for the life of the process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Mount point of the log medium; session files are created directly in it.
    /// Default: ~/.local/share/midilog
    #[serde(default = "PathsConfig::default_log_dir")]
    pub log_dir: PathBuf,
}

impl PathsConfig {
    fn default_log_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/midilog"))
            .unwrap_or_else(|| PathBuf::from(".local/share/midilog"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: Self::default_log_dir(),
        }
    }
}

/// What happens to the part of an interval shorter than one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemainderMode {
    /// Carry it into the next interval; long-run tick totals track real time.
    #[default]
    Carry,
    /// Discard it, flooring each interval independently.
    Drop,
}

/// Timing and session lifecycle of the capture engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Length of one log tick in milliseconds.
    /// Default: 1
    #[serde(default = "CaptureConfig::default_tick_ms")]
    pub tick_ms: u32,

    /// Ticks per beat declared in the file header. Together with `tick_ms`
    /// this fixes the declared tempo.
    /// Default: 500 (120 BPM at 1ms ticks)
    #[serde(default = "CaptureConfig::default_ticks_per_beat")]
    pub ticks_per_beat: u16,

    /// Housekeeping interval; bounds how much data power loss can take.
    /// Default: 1000
    #[serde(default = "CaptureConfig::default_flush_interval_ms")]
    pub flush_interval_ms: u32,

    /// Inactivity before the session is closed and a new one started.
    /// Default: 300000 (5 minutes)
    #[serde(default = "CaptureConfig::default_idle_timeout_ms")]
    pub idle_timeout_ms: u32,

    /// Number of session identities to probe.
    /// Default: 1000
    #[serde(default = "CaptureConfig::default_session_capacity")]
    pub session_capacity: u32,

    /// Session file name prefix (up to 5 characters, 8.3 names).
    /// Default: MIDI
    #[serde(default = "CaptureConfig::default_file_prefix")]
    pub file_prefix: String,

    /// Main loop period.
    /// Default: 1
    #[serde(default = "CaptureConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sub-tick remainder handling: "carry" or "drop".
    /// Default: carry
    #[serde(default)]
    pub remainder: RemainderMode,
}

impl CaptureConfig {
    fn default_tick_ms() -> u32 {
        1
    }

    fn default_ticks_per_beat() -> u16 {
        500
    }

    fn default_flush_interval_ms() -> u32 {
        1000
    }

    fn default_idle_timeout_ms() -> u32 {
        300_000
    }

    fn default_session_capacity() -> u32 {
        1000
    }

    fn default_file_prefix() -> String {
        "MIDI".to_string()
    }

    fn default_poll_interval_ms() -> u64 {
        1
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
            ticks_per_beat: Self::default_ticks_per_beat(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            idle_timeout_ms: Self::default_idle_timeout_ms(),
            session_capacity: Self::default_session_capacity(),
            file_prefix: Self::default_file_prefix(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            remainder: RemainderMode::default(),
        }
    }
}

/// MIDI input and footswitch mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Substring of the input port name. Empty picks the first port.
    /// Default: ""
    #[serde(default)]
    pub port: String,

    /// Controller number driving the mark button level.
    /// Default: 80
    #[serde(default = "InputConfig::default_mark_cc")]
    pub mark_cc: u8,

    /// Controller number driving the tone toggle button level.
    /// Default: 81
    #[serde(default = "InputConfig::default_tone_cc")]
    pub tone_cc: u8,
}

impl InputConfig {
    fn default_mark_cc() -> u8 {
        80
    }

    fn default_tone_cc() -> u8 {
        81
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            mark_cc: Self::default_mark_cc(),
            tone_cc: Self::default_tone_cc(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_defaults() {
        let paths = PathsConfig::default();
        assert!(paths.log_dir.to_string_lossy().contains("midilog"));
    }

    #[test]
    fn test_capture_defaults() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.tick_ms, 1);
        assert_eq!(capture.ticks_per_beat, 500);
        assert_eq!(capture.flush_interval_ms, 1000);
        assert_eq!(capture.idle_timeout_ms, 300_000);
        assert_eq!(capture.file_prefix, "MIDI");
        assert_eq!(capture.remainder, RemainderMode::Carry);
    }

    #[test]
    fn test_input_defaults() {
        let input = InputConfig::default();
        assert!(input.port.is_empty());
        assert_eq!((input.mark_cc, input.tone_cc), (80, 81));
    }
}
