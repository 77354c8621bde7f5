use crate::error::ConfigError;
use crate::retention::RetentionConfig;
use crate::types::TaskSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".tally";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DB_FILE: &str = "completed.db";
pub const DB_PATH_ENV: &str = "TALLY_DB_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Name of the to-do list that holds finished items.
    pub todo_completed_container: String,
    /// Name of the board column that holds finished cards.
    pub board_completed_container: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            todo_completed_container: "Completed tasks".to_string(),
            board_completed_container: "Completed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub db_path: Option<PathBuf>,
    pub completion: CompletionConfig,
    pub retention: RetentionConfig,
    /// Source display name -> normalized JSON export.
    pub feeds: BTreeMap<String, PathBuf>,
}

impl TallyConfig {
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(root, |key| std::env::var(key).ok())
    }

    /// Reads `<root>/.tally/config.toml` (missing file means defaults), then
    /// applies overrides from `env`.
    pub fn load_with_env<F>(root: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = root.join(CONFIG_DIR).join(CONFIG_FILE);
        let mut config = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|err| ConfigError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };

        if let Some(db_path) = env(DB_PATH_ENV).filter(|value| !value.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(db_path));
        }
        Ok(config)
    }

    pub fn resolved_db_path(&self, root: &Path) -> PathBuf {
        match &self.db_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(CONFIG_DIR).join(DEFAULT_DB_FILE),
        }
    }

    /// Configured feeds with paths resolved against `root`.
    pub fn feed_sources(&self, root: &Path) -> Result<Vec<(TaskSource, PathBuf)>, ConfigError> {
        self.feeds
            .iter()
            .map(|(name, path)| {
                let source = parse_source(name)?;
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    root.join(path)
                };
                Ok((source, path))
            })
            .collect()
    }
}

/// Parses a `SOURCE=PATH` feed argument.
pub fn parse_feed_arg(value: &str) -> Result<(TaskSource, PathBuf), ConfigError> {
    let (name, path) = value
        .split_once('=')
        .filter(|(_, path)| !path.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidFeed {
            value: value.to_string(),
        })?;
    Ok((parse_source(name)?, PathBuf::from(path.trim())))
}

fn parse_source(name: &str) -> Result<TaskSource, ConfigError> {
    let source = TaskSource::parse(name);
    if source.is_empty() {
        return Err(ConfigError::InvalidFeed {
            value: name.to_string(),
        });
    }
    Ok(source)
}
