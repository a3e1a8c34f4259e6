// Runtime settings for the API, read from the environment (and `.env`)

use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8090";
pub const DEFAULT_AUTH_SECRET: &str = "secretKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub auth_secret: String,
    /// Registry JSON; the built-in languages when unset
    pub languages_config: Option<PathBuf>,
    /// Parent directory for request workspaces; system temp dir when unset
    pub workspace_root: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match non_empty("SANDBOX_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("SANDBOX_LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        };

        Ok(Self {
            bind_addr: non_empty("SANDBOX_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            auth_secret: non_empty("SANDBOX_AUTH_SECRET")
                .unwrap_or_else(|| DEFAULT_AUTH_SECRET.to_string()),
            languages_config: non_empty("SANDBOX_LANGUAGES_CONFIG").map(PathBuf::from),
            workspace_root: non_empty("SANDBOX_WORKSPACE_ROOT").map(PathBuf::from),
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.auth_secret, DEFAULT_AUTH_SECRET);
        assert!(config.languages_config.is_none());
        assert!(config.workspace_root.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("SANDBOX_BIND_ADDR", "127.0.0.1:9000"),
            ("SANDBOX_AUTH_SECRET", "hunter2"),
            ("SANDBOX_LANGUAGES_CONFIG", "config/languages.json"),
            ("SANDBOX_WORKSPACE_ROOT", "/srv/sandbox"),
            ("SANDBOX_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.auth_secret, "hunter2");
        assert_eq!(
            config.languages_config,
            Some(PathBuf::from("config/languages.json"))
        );
        assert_eq!(config.workspace_root, Some(PathBuf::from("/srv/sandbox")));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[("SANDBOX_AUTH_SECRET", "  ")])).unwrap();
        assert_eq!(config.auth_secret, DEFAULT_AUTH_SECRET);
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(ApiConfig::from_lookup(lookup(&[("SANDBOX_LOG_FORMAT", "xml")])).is_err());
    }
}
