//! Credentials for the completion endpoint, persisted as a small JSON file.

use chatpipe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Settings {
    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> Option<&str> {
        non_empty(&self.base_url).map(|s| s.trim_end_matches('/'))
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some() && self.base_url().is_some()
    }

    /// Copy safe to print: all but the last four key characters masked.
    pub fn redacted(&self) -> Settings {
        let api_key = self.api_key().map(|k| {
            let tail: String = k
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if k.chars().count() <= 4 {
                "****".to_string()
            } else {
                format!("****{tail}")
            }
        });
        Settings {
            api_key,
            base_url: self.base_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Read settings from `path`. A missing or unreadable file loads as empty settings.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Settings>(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt settings file");
                Settings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "settings file unreadable");
                Settings::default()
            }
        };
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace both values and write them to disk.
    pub fn replace(&mut self, api_key: Option<String>, base_url: Option<String>) -> Result<()> {
        self.settings = Settings { api_key, base_url };
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Settings(format!("create {}: {e}", dir.display())))?;
        }
        let raw = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| Error::Settings(e.to_string()))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| Error::Settings(format!("write {}: {e}", self.path.display())))?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
