//! Typed configuration, mirroring the YAML schema in spec.md §6.
//!
//! The default configuration is baked in as a YAML literal (the same trick
//! `pybackup2.py` used with its `defaultCfg` string) and merged with a
//! user-supplied file, key by key. Unknown keys are tolerated; missing keys
//! fall back to the default since `Config` always starts life as
//! `Config::default_yaml()` before the override is layered on top.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "EmailConfig::default_server")]
    pub server: String,
    #[serde(default = "EmailConfig::default_subject")]
    pub subject: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "EmailConfig::default_from")]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
}

impl EmailConfig {
    fn default_server() -> String {
        "localhost".to_string()
    }
    fn default_subject() -> String {
        "Result from backvault".to_string()
    }
    fn default_from() -> String {
        "backup@localhost".to_string()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            server: Self::default_server(),
            subject: Self::default_subject(),
            user: None,
            password: None,
            from: Self::default_from(),
            to: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_log")]
    pub log: String,
    #[serde(default = "Config::default_db")]
    pub db: String,
    #[serde(default = "Config::default_min_age")]
    pub min_age: u64,
    #[serde(default = "Config::default_max_target_size")]
    pub max_target_size: String,
    #[serde(default = "Config::default_exclude_flag")]
    pub exclude_flag: String,
    #[serde(default = "Config::default_target")]
    pub target: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub backup: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default = "Config::default_result_t", rename = "resultT")]
    pub result_t: String,
    #[serde(default = "Config::default_result_h", rename = "resultH")]
    pub result_h: String,
}

impl Config {
    fn default_log() -> String {
        "backvault.log".to_string()
    }
    fn default_db() -> String {
        "/tmp/backvault.db".to_string()
    }
    fn default_min_age() -> u64 {
        300
    }
    fn default_max_target_size() -> String {
        "500M".to_string()
    }
    fn default_exclude_flag() -> String {
        ".bkexclude".to_string()
    }
    fn default_target() -> String {
        "%t.tar.xz.enc".to_string()
    }
    fn default_result_t() -> String {
        "backed up: {backed_up} incremental: {incremental} cyclic: {cyclic}".to_string()
    }
    fn default_result_h() -> String {
        "<html><body>backvault result</body></html>".to_string()
    }

    /// The built-in defaults, equivalent to `pybackup2.py`'s `defaultCfg`.
    pub fn defaults() -> Self {
        serde_yaml::from_str("{}").expect("empty mapping deserializes to all defaults")
    }

    /// Load defaults, then merge a user config file on top (key-by-key, via
    /// `-c <path>`). Unknown keys in the file are ignored.
    pub fn load_and_merge(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::merge_str(&text)
    }

    /// Merge raw YAML text into the defaults. Exposed separately so tests
    /// don't need a file on disk.
    pub fn merge_str(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mut merged = serde_yaml::to_value(Self::defaults()).expect("defaults serialize");
        merge_yaml(&mut merged, &value);
        Ok(serde_yaml::from_value(merged)?)
    }

    /// Substitute `%h` (hostname) and `%t` (`YY-MM-DD_HH-MM-SS`) in a
    /// template string, as used for both `target` and, eventually, archive
    /// naming in the report.
    pub fn substitute_template(template: &str, now: chrono::DateTime<chrono::Local>) -> String {
        let host = hostname();
        let stamp = now.format("%y-%m-%d_%H-%M-%S").to_string();
        template.replace("%h", &host).replace("%t", &stamp)
    }
}

/// Recursively overlay `patch` on top of `base`, replacing scalar/sequence
/// keys and merging nested mappings. Mirrors `dict.update()`'s shallow
/// behavior for scalars while still merging nested tables like `email`.
fn merge_yaml(base: &mut serde_yaml::Value, patch: &serde_yaml::Value) {
    match (base, patch) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(patch_map)) => {
            for (k, v) in patch_map {
                match base_map.get_mut(k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// Best-effort hostname lookup. Falls back to `"localhost"` rather than
/// failing the run over a cosmetic template token.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .filter(|o| o.status.success())
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
