//! Runtime configuration.
//!
//! Values come from process environment variables with a `.env` file
//! fallback. The file is parsed by hand (plain KEY=VALUE lines), so no
//! extra loader dependency is needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::database::CategoryLabels;
use crate::error::AppError;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_RPM_LIMIT: usize = 15;
const DEFAULT_MAX_CATEGORIES: usize = 30;
const DEFAULT_DB_PATH: &str = "podsift.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub playlist_id: Option<String>,
    pub spotify_access_token: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub spotify_refresh_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub rpm_limit: usize,
    pub max_categories: usize,
    pub labels: CategoryLabels,
}

impl Config {
    /// Read configuration, preferring process env vars over `.env` entries.
    pub fn load(env_file: &Path) -> Result<Self, AppError> {
        let file_values = parse_env_file(env_file);
        let var = |key: &str| -> Option<String> {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| file_values.get(key).cloned())
        };

        let rpm_limit = parse_positive(var("GEMINI_RPM_LIMIT"), "GEMINI_RPM_LIMIT", DEFAULT_RPM_LIMIT)?;
        let max_categories =
            parse_positive(var("MAX_CATEGORIES"), "MAX_CATEGORIES", DEFAULT_MAX_CATEGORIES)?;

        let mut labels = CategoryLabels::default();
        if let Some(label) = var("UNCATEGORIZED_LABEL") {
            labels.pending = label;
        }
        if let Some(label) = var("CATEGORIZATION_FAILED_LABEL") {
            labels.failed = label;
        }

        Ok(Self {
            db_path: var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            playlist_id: var("SPOTIFY_PLAYLIST_ID"),
            spotify_access_token: var("SPOTIFY_ACCESS_TOKEN"),
            spotify_client_id: var("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: var("SPOTIFY_CLIENT_SECRET"),
            spotify_refresh_token: var("SPOTIFY_REFRESH_TOKEN"),
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_model: var("GEMINI_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            rpm_limit,
            max_categories,
            labels,
        })
    }

    /// True when either a direct access token or a full refresh-token
    /// credential set is available.
    pub fn has_spotify_credentials(&self) -> bool {
        self.spotify_access_token.is_some()
            || (self.spotify_client_id.is_some()
                && self.spotify_client_secret.is_some()
                && self.spotify_refresh_token.is_some())
    }
}

fn parse_positive(raw: Option<String>, key: &str, default: usize) -> Result<usize, AppError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(default),
    };
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AppError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}

/// Parse KEY=VALUE lines from a `.env` file. A missing file is fine.
fn parse_env_file(path: &Path) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return values,
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !value.is_empty() {
                values.insert(key.trim().to_string(), value.to_string());
            }
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_parse_env_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "SPOTIFY_PLAYLIST_ID=abc123").unwrap();
        writeln!(file, "GEMINI_API_KEY=\"quoted\"").unwrap();
        writeln!(file, "EMPTY=").unwrap();
        writeln!(file, "not a kv line").unwrap();

        let values = parse_env_file(&path);
        assert_eq!(values.get("SPOTIFY_PLAYLIST_ID").unwrap(), "abc123");
        assert_eq!(values.get("GEMINI_API_KEY").unwrap(), "quoted");
        assert!(!values.contains_key("EMPTY"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_parse_env_file_missing_is_empty() {
        let values = parse_env_file(Path::new("/nonexistent/.env"));
        assert!(values.is_empty());
    }

    #[test]
    fn test_parse_positive_rejects_zero_and_garbage() {
        assert_eq!(parse_positive(None, "K", 15).unwrap(), 15);
        assert_eq!(parse_positive(Some("3".to_string()), "K", 15).unwrap(), 3);
        assert!(parse_positive(Some("0".to_string()), "K", 15).is_err());
        assert!(parse_positive(Some("abc".to_string()), "K", 15).is_err());
    }
}
