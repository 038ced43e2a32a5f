//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MidilogConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override. It is returned
/// whether or not it exists, so a mistyped path fails in [`load_table`].
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/midilog/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("midilog/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("midilog.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a single config file on its own, without discovery or env overrides.
pub fn load_from_file(path: &Path) -> Result<MidilogConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table).map_err(|e| match e {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Deep-merge `overlay` into `base`; keys present in `overlay` win.
///
/// Nested tables merge key by key so a user file that sets only
/// `capture.tick_ms` keeps every other `capture` value from earlier files.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table, filling gaps with compiled defaults.
pub fn from_table(table: toml::Table) -> Result<MidilogConfig, ConfigError> {
    let mut config: MidilogConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;

    let log_dir = config.infra.paths.log_dir.to_string_lossy().into_owned();
    config.infra.paths.log_dir = expand_path(&log_dir);

    Ok(config)
}

/// Apply environment variable overrides to config.
///
/// Unparseable numeric values are ignored, leaving the file value in place.
pub fn apply_env_overrides(config: &mut MidilogConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MIDILOG_LOG_DIR") {
        config.infra.paths.log_dir = expand_path(&v);
        sources.env_overrides.push("MIDILOG_LOG_DIR".to_string());
    }

    if let Ok(v) = env::var("MIDILOG_IDLE_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.capture.idle_timeout_ms = ms;
            sources.env_overrides.push("MIDILOG_IDLE_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("MIDILOG_FLUSH_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.capture.flush_interval_ms = ms;
            sources.env_overrides.push("MIDILOG_FLUSH_INTERVAL_MS".to_string());
        }
    }

    if let Ok(v) = env::var("MIDILOG_INPUT_PORT") {
        config.infra.input.port = v;
        sources.env_overrides.push("MIDILOG_INPUT_PORT".to_string());
    }

    if let Ok(v) = env::var("MIDILOG_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("MIDILOG_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MarkerLabelStyle, RemainderMode};
    use std::io::Write;

    fn parse(contents: &str) -> MidilogConfig {
        from_table(contents.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_override_is_kept_even_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let files = discover_config_files_with_override(Some(&missing));
        assert_eq!(files.last(), Some(&missing));
        assert!(!files.contains(&PathBuf::from("midilog.toml")));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[paths]
log_dir = "/mnt/sdcard"
"#,
        );
        assert_eq!(config.infra.paths.log_dir, PathBuf::from("/mnt/sdcard"));
        // Other values should be defaults
        assert_eq!(config.infra.capture.ticks_per_beat, 500);
        assert_eq!(config.infra.input.mark_cc, 80);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[paths]
log_dir = "/data/midi"

[capture]
tick_ms = 10
ticks_per_beat = 50
flush_interval_ms = 500
idle_timeout_ms = 60000
session_capacity = 100
file_prefix = "TAKE"
poll_interval_ms = 2
remainder = "drop"

[input]
port = "Keystation"
mark_cc = 64
tone_cc = 67

[telemetry]
log_level = "debug"

[bootstrap]
tone_enabled = true
marker_labels = "clock"
"#,
        );

        assert_eq!(config.infra.paths.log_dir, PathBuf::from("/data/midi"));
        assert_eq!(config.infra.capture.tick_ms, 10);
        assert_eq!(config.infra.capture.ticks_per_beat, 50);
        assert_eq!(config.infra.capture.flush_interval_ms, 500);
        assert_eq!(config.infra.capture.idle_timeout_ms, 60_000);
        assert_eq!(config.infra.capture.session_capacity, 100);
        assert_eq!(config.infra.capture.file_prefix, "TAKE");
        assert_eq!(config.infra.capture.poll_interval_ms, 2);
        assert_eq!(config.infra.capture.remainder, RemainderMode::Drop);
        assert_eq!(config.infra.input.port, "Keystation");
        assert_eq!((config.infra.input.mark_cc, config.infra.input.tone_cc), (64, 67));
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert!(config.bootstrap.tone_enabled);
        assert_eq!(config.bootstrap.marker_labels, MarkerLabelStyle::Clock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_remainder_is_parse_error() {
        let table: toml::Table = "[capture]\nremainder = \"round\"".parse().unwrap();
        assert!(matches!(from_table(table), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_merge_keeps_sibling_keys() {
        let mut base: toml::Table = r#"
[capture]
tick_ms = 10
ticks_per_beat = 50
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = "[capture]\nticks_per_beat = 100".parse().unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base).unwrap();
        assert_eq!(config.infra.capture.tick_ms, 10);
        assert_eq!(config.infra.capture.ticks_per_beat, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[input]\nport = \"Launchkey\"").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.infra.input.port, "Launchkey");
    }

    #[test]
    fn test_load_from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture\ntick_ms = ").unwrap();

        match load_from_file(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = load_table(Path::new("/nonexistent/midilog.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
