//! Process-wide settings.
//!
//! [`Config`] holds the artifact extension the engine appends and the
//! "safely delete source after encrypt" preference the CLI passes along.
//! Values come from a JSON file and environment variables.
//!
//! ## Environment Variables
//!
//! - `LOCKBOX_CONFIG`: config file path when none is given explicitly
//! - `LOCKBOX_EXTENSION`: override `extension`
//! - `LOCKBOX_DELETE_SOURCE`: override `deleteSourceAfter` (`true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`)

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

pub const ENV_CONFIG_PATH: &str = "LOCKBOX_CONFIG";
pub const ENV_EXTENSION: &str = "LOCKBOX_EXTENSION";
pub const ENV_DELETE_SOURCE: &str = "LOCKBOX_DELETE_SOURCE";

/// Extension used when nothing else is configured.
pub const DEFAULT_EXTENSION: &str = ".lockbox";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Suffix appended to encrypted artifacts, leading dot included.
    pub extension: String,
    /// Wipe and delete the source once its artifact is safely written.
    pub delete_source_after: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            delete_source_after: false,
        }
    }
}

fn config_error(msg: impl Into<String>) -> LockboxError {
    LockboxError::with_kind(ErrorCategory::User, ErrorKind::Config, msg)
}

impl Config {
    /// Load config from an explicit file path, then apply environment
    /// overrides. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading config from file");
        let mut config = Self::read_file(path)?;
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    ///
    /// The file is taken from `LOCKBOX_CONFIG`; an unset variable or a
    /// missing file means defaults.
    pub fn load_with_env() -> Result<Self> {
        let mut config = match env::var_os(ENV_CONFIG_PATH) {
            Some(p) if Path::new(&p).exists() => {
                let path = Path::new(&p);
                info!(path = %path.display(), "loading config from file");
                Self::read_file(path)?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Config,
                format!("reading config file {}", path.display()),
                e,
            )
        })?;
        serde_json::from_str(&s).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Config,
                format!("parsing config file {}: {}", path.display(), e),
                e,
            )
        })
    }

    /// Apply overrides looked up by variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(extension) = lookup(ENV_EXTENSION) {
            debug!(extension = %extension, "overriding extension from environment");
            self.extension = extension;
        }

        if let Some(raw) = lookup(ENV_DELETE_SOURCE) {
            self.delete_source_after = parse_bool(&raw).ok_or_else(|| {
                config_error(format!("{} must be a boolean, got {:?}", ENV_DELETE_SOURCE, raw))
            })?;
            debug!(
                delete_source_after = self.delete_source_after,
                "overriding deleteSourceAfter from environment"
            );
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let ext = &self.extension;
        if ext.trim().is_empty() {
            return Err(config_error("extension cannot be empty"));
        }
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(config_error(format!(
                "extension {:?} must be a dot followed by at least one character",
                ext
            )));
        }
        if ext.contains(['/', '\\', '\0']) {
            return Err(config_error(format!(
                "extension {:?} must not contain path separators",
                ext
            )));
        }
        Ok(())
    }

    /// Create a new config with explicit values
    pub fn new(extension: impl Into<String>, delete_source_after: bool) -> Self {
        Self {
            extension: extension.into(),
            delete_source_after,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.extension, ".lockbox");
        assert!(!config.delete_source_after);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"extension": ".enc", "deleteSourceAfter": true}"#).unwrap();

        let config = Config::read_file(&path).unwrap();
        assert_eq!(config, Config::new(".enc", true));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"deleteSourceAfter": true}"#).unwrap();

        let config = Config::read_file(&path).unwrap();
        assert_eq!(config.extension, DEFAULT_EXTENSION);
        assert!(config.delete_source_after);
    }

    #[test]
    fn test_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let err = Config::read_file(&path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_EXTENSION, ".sealed"),
                (ENV_DELETE_SOURCE, "YES"),
            ]))
            .unwrap();
        assert_eq!(config, Config::new(".sealed", true));
    }

    #[test]
    fn test_env_bad_bool() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup_from(&[(ENV_DELETE_SOURCE, "maybe")]))
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }

    #[test]
    fn test_validate_rejects_bad_extensions() {
        for ext in ["", "  ", "lockbox", ".", "./x", ".a\\b", ".a\0"] {
            let err = Config::new(ext, false).validate().unwrap_err();
            assert_eq!(err.kind, Some(ErrorKind::Config), "{:?}", ext);
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }

    #[test]
    fn test_load_rejects_invalid_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"extension": "noleadingdot"}"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }
}
