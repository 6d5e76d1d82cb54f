//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. `veritag.toml` next to the executable
//! 2. `~/.config/veritag/config.toml`
//! 3. Environment variable overrides (e.g. `VERITAG_REGISTRY_DB`)
//!
//! CLI arguments always take precedence over config file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VeritagConfig {
    pub paths: PathsConfig,
    pub registration: RegistrationConfig,
    pub verify: VerifyConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub registry_db: PathBuf,
    pub store_db: PathBuf,
    pub asset_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Bounded retry count for duplicate-token rejections (fresh tokens are
    /// issued for every retry).
    pub max_duplicate_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Template for turning an asset content hash into a dereferenceable URL.
    /// `{hash}` is replaced with the hex content address.  Empty string means
    /// no URL is constructed.
    pub asset_url_template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Opaque authenticated principal recorded as the manufacturer on every
    /// batch this process registers.
    pub manufacturer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines structured log file.  Empty string means no file
    /// logging.
    pub json_log_file: String,
    /// Whether to also output JSON to stdout (for container pipelines).
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for VeritagConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            registration: RegistrationConfig::default(),
            verify: VerifyConfig::default(),
            identity: IdentityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry_db: PathBuf::from("veritag-registry.db"),
            store_db: PathBuf::from("veritag-store.db"),
            asset_dir: PathBuf::from("veritag-assets"),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_duplicate_retries: 3,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            asset_url_template: String::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            manufacturer: "unattributed".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl VeritagConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: VeritagConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order:
    /// 1. Explicit path (if given)
    /// 2. `veritag.toml` next to the running binary
    /// 3. `~/.config/veritag/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        // Next to executable.
        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("veritag.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        // Platform-standard config directory.
        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home)
                .join(".config")
                .join("veritag")
                .join("config.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("VERITAG_REGISTRY_DB") {
            self.paths.registry_db = PathBuf::from(db);
        }
        if let Ok(db) = std::env::var("VERITAG_STORE_DB") {
            self.paths.store_db = PathBuf::from(db);
        }
        if let Ok(dir) = std::env::var("VERITAG_ASSET_DIR") {
            self.paths.asset_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("VERITAG_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = VeritagConfig::default();
        assert_eq!(cfg.registration.max_duplicate_retries, 3);
        assert_eq!(cfg.paths.registry_db, PathBuf::from("veritag-registry.db"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = VeritagConfig::load_from(Path::new("nonexistent_file_xyz.toml")).unwrap();
        assert_eq!(cfg.identity.manufacturer, "unattributed");
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[registration]
max_duplicate_retries = 5

[verify]
asset_url_template = "https://ipfs.io/ipfs/{hash}"
"#;
        let cfg: VeritagConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.registration.max_duplicate_retries, 5);
        assert_eq!(cfg.verify.asset_url_template, "https://ipfs.io/ipfs/{hash}");
        // Other sections should be defaults.
        assert_eq!(cfg.paths.store_db, PathBuf::from("veritag-store.db"));
    }
}
