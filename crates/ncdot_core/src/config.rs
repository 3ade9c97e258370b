use crate::settings::STORE_NAME;
use crate::sort::{default_order, SortSpec};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const INCIDENTS_URL: &str =
    "https://eapps.ncdot.gov/services/traffic-prod/v1/incidents?verbose=true";
pub const CAMERAS_URL: &str = "https://eapps.ncdot.gov/services/traffic-prod/v1/cameras?verbose=true";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feeds: FeedConfig,
    pub storage: StorageConfig,
    pub table: TableConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub incidents_url: String,
    pub cameras_url: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            incidents_url: INCIDENTS_URL.to_string(),
            cameras_url: CAMERAS_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub store_name: String,
    pub remote_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ncdot.db"),
            store_name: STORE_NAME.to_string(),
            remote_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub sort: Vec<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sort: default_order().iter().map(ToString::to_string).collect(),
        }
    }
}

impl TableConfig {
    pub fn sort_order(&self) -> Result<Vec<SortSpec>> {
        self.sort
            .iter()
            .map(|key| {
                key.parse::<SortSpec>()
                    .with_context(|| format!("Invalid [table] sort entry {key:?}"))
            })
            .collect()
    }
}

impl AppConfig {
    /// A missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.table.sort_order()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/ncdot.toml")).unwrap();
        assert_eq!(config.feeds.incidents_url, INCIDENTS_URL);
        assert_eq!(config.storage.store_name, STORE_NAME);
        assert_eq!(config.table.sort_order().unwrap(), default_order());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncdot.toml");
        fs::write(
            &path,
            "[storage]\nremote_dir = \"/srv/sync\"\n\n[table]\nsort = [\"-road\", \"start\"]\n",
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.storage.remote_dir, Some(PathBuf::from("/srv/sync")));
        assert_eq!(config.feeds.timeout_secs, 30);
        assert_eq!(config.table.sort_order().unwrap()[0].to_string(), "-road");
    }

    #[test]
    fn bad_sort_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncdot.toml");
        fs::write(&path, "[table]\nsort = [\"severity\"]\n").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
