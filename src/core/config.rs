//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.waypoint/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WaypointConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub level: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DecodeConfig {
    pub chunk_size: Option<usize>,
    pub pretty: Option<bool>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;
pub const DEFAULT_LOG_FILE: &str = "waypoint.log";
/// Bytes per chunk when replaying a captured body. Small on purpose, so
/// sections and UTF-8 sequences get split the way a network would.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub log_level: LevelFilter,
    pub log_file: PathBuf,
    pub chunk_size: usize,
    pub pretty: bool,
}

/// Values given on the command line. `None`/`false` means not specified.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub chunk_size: Option<usize>,
    pub pretty: bool,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.waypoint/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".waypoint").join("config.toml"))
}

/// Load config from `~/.waypoint/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `WaypointConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<WaypointConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(WaypointConfig::default());
        }
    };
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<WaypointConfig, ConfigError> {
    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(path);
        return Ok(WaypointConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: WaypointConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# Waypoint Configuration
# All settings are optional. Defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [log]
# level = "info"               # Or set WAYPOINT_LOG_LEVEL
# file = "waypoint.log"        # Or set WAYPOINT_LOG_FILE

# [decode]
# chunk_size = 64              # Or set WAYPOINT_CHUNK_SIZE, or pass --chunk-size
# pretty = false               # Or pass --pretty
"#;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create config directory: {}", e);
            return;
        }
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
pub fn resolve(config: &WaypointConfig, cli: &CliOverrides) -> ResolvedConfig {
    resolve_with_env(config, cli, |name| std::env::var(name).ok())
}

fn resolve_with_env(
    config: &WaypointConfig,
    cli: &CliOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    // Log level: env → config → default
    let log_level = env("WAYPOINT_LOG_LEVEL")
        .or_else(|| config.log.level.clone())
        .and_then(|level| match level.parse::<LevelFilter>() {
            Ok(filter) => Some(filter),
            Err(_) => {
                warn!("Unknown log level {:?}, using {}", level, DEFAULT_LOG_LEVEL);
                None
            }
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);

    // Log file: env → config → default
    let log_file = env("WAYPOINT_LOG_FILE")
        .or_else(|| config.log.file.clone())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

    // Chunk size: CLI → env → config → default
    let env_chunk_size = env("WAYPOINT_CHUNK_SIZE").and_then(|raw| match raw.parse::<usize>() {
        Ok(size) => Some(size),
        Err(e) => {
            warn!("Ignoring WAYPOINT_CHUNK_SIZE={:?}: {}", raw, e);
            None
        }
    });
    let chunk_size = cli
        .chunk_size
        .or(env_chunk_size)
        .or(config.decode.chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE)
        .max(1);

    ResolvedConfig {
        log_level,
        log_file: PathBuf::from(log_file),
        chunk_size,
        pretty: cli.pretty || config.decode.pretty.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config_parses() {
        let config = WaypointConfig::default();
        assert!(config.log.level.is_none());
        assert!(config.decode.chunk_size.is_none());
    }

    #[test]
    fn test_resolve_uses_defaults_when_empty() {
        let resolved =
            resolve_with_env(&WaypointConfig::default(), &CliOverrides::default(), no_env);
        assert_eq!(resolved.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(resolved.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(resolved.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!resolved.pretty);
    }

    #[test]
    fn test_resolve_config_values_override_defaults() {
        let config = WaypointConfig {
            log: LogConfig {
                level: Some("debug".to_string()),
                file: Some("/tmp/w.log".to_string()),
            },
            decode: DecodeConfig {
                chunk_size: Some(3),
                pretty: Some(true),
            },
        };
        let resolved = resolve_with_env(&config, &CliOverrides::default(), no_env);
        assert_eq!(resolved.log_level, LevelFilter::Debug);
        assert_eq!(resolved.log_file, PathBuf::from("/tmp/w.log"));
        assert_eq!(resolved.chunk_size, 3);
        assert!(resolved.pretty);
    }

    #[test]
    fn test_env_beats_config_and_cli_beats_env() {
        let config = WaypointConfig {
            decode: DecodeConfig {
                chunk_size: Some(3),
                pretty: None,
            },
            ..Default::default()
        };
        let env: HashMap<&str, &str> =
            [("WAYPOINT_CHUNK_SIZE", "16"), ("WAYPOINT_LOG_LEVEL", "warn")]
                .into_iter()
                .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let resolved = resolve_with_env(&config, &CliOverrides::default(), lookup);
        assert_eq!(resolved.chunk_size, 16);
        assert_eq!(resolved.log_level, LevelFilter::Warn);

        let cli = CliOverrides {
            chunk_size: Some(1),
            pretty: true,
        };
        let resolved = resolve_with_env(&config, &cli, lookup);
        assert_eq!(resolved.chunk_size, 1);
        assert!(resolved.pretty);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = WaypointConfig {
            log: LogConfig {
                level: Some("chatty".to_string()),
                file: None,
            },
            ..Default::default()
        };
        let lookup = |name: &str| (name == "WAYPOINT_CHUNK_SIZE").then(|| "lots".to_string());
        let resolved = resolve_with_env(&config, &CliOverrides::default(), lookup);
        assert_eq!(resolved.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(resolved.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let cli = CliOverrides {
            chunk_size: Some(0),
            pretty: false,
        };
        let resolved = resolve_with_env(&WaypointConfig::default(), &cli, no_env);
        assert_eq!(resolved.chunk_size, 1);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
[log]
level = "trace"
file = "nav.log"

[decode]
chunk_size = 8
pretty = true
"#;
        let config: WaypointConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log.level.as_deref(), Some("trace"));
        assert_eq!(config.log.file.as_deref(), Some("nav.log"));
        assert_eq!(config.decode.chunk_size, Some(8));
        assert_eq!(config.decode.pretty, Some(true));
    }

    #[test]
    fn test_sparse_toml_parses() {
        // Only override one thing; everything else stays default
        let toml_str = r#"
[decode]
pretty = true
"#;
        let config: WaypointConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.decode.pretty, Some(true));
        assert!(config.decode.chunk_size.is_none());
        assert!(config.log.level.is_none());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("waypoint-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "[decode\nchunk_size = ").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_generates_default() {
        let dir = std::env::temp_dir().join(format!("waypoint-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let config = load_config_from(&path).unwrap();
        assert!(config.decode.chunk_size.is_none());
        let generated = fs::read_to_string(&path).unwrap();
        assert!(generated.starts_with("# Waypoint Configuration"));
        // the generated file is all comments, so it parses back to defaults
        let reparsed: WaypointConfig = toml::from_str(&generated).unwrap();
        assert!(reparsed.log.level.is_none());
        fs::remove_dir_all(&dir).ok();
    }
}
