use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::normalizer::DateWindow;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default = "default_date_past_years")]
    pub date_past_years: u32,
    #[serde(default = "default_date_future_days")]
    pub date_future_days: u32,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_company_name() -> String {
    "Default".to_string()
}

fn default_date_past_years() -> u32 {
    30
}

fn default_date_future_days() -> u32 {
    31
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_name: String::new(),
            company_name: default_company_name(),
            date_past_years: default_date_past_years(),
            date_future_days: default_date_future_days(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Settings {
    /// Transaction dates accepted relative to today.
    pub fn date_window(&self) -> DateWindow {
        DateWindow::ending_today(self.date_past_years, self.date_future_days)
    }

    /// Name recorded as `uploaded_by`, falling back to the login name.
    pub fn uploader(&self) -> String {
        if !self.user_name.is_empty() {
            return self.user_name.clone();
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("stmt-import")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("stmt-import")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings).map_err(|e| ImportError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("imports.db")
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            user_name: "Thandi".to_string(),
            company_name: "Acme (Pty) Ltd".to_string(),
            date_past_years: 10,
            date_future_days: 7,
            max_upload_bytes: 1024,
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.user_name, "Thandi");
        assert_eq!(loaded.company_name, "Acme (Pty) Ltd");
        assert_eq!(loaded.date_past_years, 10);
        assert_eq!(loaded.max_upload_bytes, 1024);
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.user_name.is_empty());
        assert_eq!(s.date_past_years, 30);
        assert_eq!(s.date_future_days, 31);
        assert_eq!(s.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(!s.data_dir.is_empty());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "user_name": "Bob"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.company_name, "Default");
        assert_eq!(s.date_future_days, 31);
        assert_eq!(s.user_name, "Bob");
    }

    #[test]
    fn test_uploader_prefers_configured_name() {
        let s = Settings {
            user_name: "Thandi".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.uploader(), "Thandi");
    }

    #[test]
    fn test_db_path_inside_data_dir() {
        let p = db_path(std::path::Path::new("/data"));
        assert_eq!(p, PathBuf::from("/data/imports.db"));
    }
}
