use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use quay_kv::LogConfig;
use serde::{Deserialize, Serialize};

/// Name of the key-value log inside the data directory.
pub const LOG_FILE: &str = "quay.log";

/// CLI configuration, optionally read from a TOML file.
///
/// ```toml
/// data_dir = "/var/lib/quay"
///
/// [log]
/// compact_on_open = false
///
/// [log.sync_mode]
/// mode = "periodic"
/// interval_ms = 200
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub log: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".quay"),
            log: LogConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path` if given, then apply the `--data` override.
    pub fn load(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }
        Ok(config)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_kv::SyncMode;

    #[test]
    fn defaults_without_file() {
        let config = CliConfig::load(None, None).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.log.sync_mode, SyncMode::EveryWrite);
        assert_eq!(config.log_path(), PathBuf::from(".quay").join(LOG_FILE));
    }

    #[test]
    fn reads_toml_and_applies_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quay.toml");
        fs::write(
            &path,
            "data_dir = \"/srv/quay\"\n\n[log]\ncompact_on_open = true\n\n[log.sync_mode]\nmode = \"periodic\"\ninterval_ms = 50\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(&path), None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/quay"));
        assert!(config.log.compact_on_open);
        assert_eq!(config.log.sync_mode, SyncMode::Periodic { interval_ms: 50 });

        let config = CliConfig::load(Some(&path), Some(PathBuf::from("/tmp/other"))).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/other"));
        assert!(config.log.compact_on_open);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quay.toml");
        fs::write(&path, "[log]\ncompact_on_open = true\n").unwrap();
        let config = CliConfig::load(Some(&path), None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".quay"));
        assert_eq!(config.log.sync_mode, SyncMode::EveryWrite);
    }

    #[test]
    fn bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quay.toml");
        fs::write(&path, "data_dir = [").unwrap();
        assert!(CliConfig::load(Some(&path), None).is_err());
    }
}
