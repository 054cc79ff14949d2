use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::GatewayConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: Option<String>,
    pub gemini_api_key: String,
    pub gemini_model: Option<String>,
    pub fast_mode: bool,
    pub fast_mode_max_tree_entries: usize,
    pub llm_timeout: Duration,
    pub daily_usage_limit: u32,
    pub user_id: Option<String>,
    pub database_path: String,
    pub source_cache_ttl: Duration,
    pub analysis_cache_ttl: Duration,
    pub budget_capacity: u32,
    pub budget_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            gemini_api_key: String::new(),
            gemini_model: None,
            fast_mode: true,
            fast_mode_max_tree_entries: 400,
            llm_timeout: Duration::from_millis(120_000),
            daily_usage_limit: 0,
            user_id: None,
            database_path: "repolens.db".to_string(),
            source_cache_ttl: Duration::from_secs(300),
            analysis_cache_ttl: Duration::from_secs(3600),
            budget_capacity: 10,
            budget_window: Duration::from_millis(60_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source; unset numeric values fall
    /// back to defaults, malformed ones are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = var("GEMINI_API_KEY").ok_or_else(|| {
            Error::InvalidConfiguration("GEMINI_API_KEY environment variable not set".to_string())
        })?;

        let fast_mode = match var("FAST_MODE") {
            Some(v) => parse_bool("FAST_MODE", &v)?,
            None => defaults.fast_mode,
        };

        Ok(Self {
            github_token: var("GITHUB_TOKEN"),
            gemini_api_key,
            gemini_model: var("GEMINI_MODEL"),
            fast_mode,
            fast_mode_max_tree_entries: parse_or(
                &var,
                "FAST_MODE_MAX_TREE_ENTRIES",
                defaults.fast_mode_max_tree_entries,
            )?,
            llm_timeout: Duration::from_millis(parse_or(&var, "LLM_TIMEOUT_MS", 120_000u64)?),
            daily_usage_limit: parse_or(&var, "DAILY_USAGE_LIMIT", defaults.daily_usage_limit)?,
            user_id: var("USER_ID"),
            database_path: var("DATABASE_PATH").unwrap_or(defaults.database_path),
            source_cache_ttl: Duration::from_secs(parse_or(&var, "SOURCE_CACHE_TTL_SECS", 300u64)?),
            analysis_cache_ttl: Duration::from_secs(parse_or(
                &var,
                "ANALYSIS_CACHE_TTL_SECS",
                3600u64,
            )?),
            budget_capacity: parse_or(&var, "BUDGET_CAPACITY", defaults.budget_capacity)?,
            budget_window: Duration::from_millis(parse_or(&var, "BUDGET_WINDOW_MS", 60_000u64)?),
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            call_timeout: self.llm_timeout,
            ..GatewayConfig::default()
        }
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| {
            Error::InvalidConfiguration(format!("{} must be a non-negative number, got '{}'", name, raw))
        }),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfiguration(format!(
            "{} must be true or false, got '{}'",
            name, raw
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fast_mode: bool,
    pub max_tree_entries: usize,
    pub commit_sample: u32,
    pub daily_usage_limit: u32,
    pub user_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            fast_mode: config.fast_mode,
            max_tree_entries: config.fast_mode_max_tree_entries,
            commit_sample: 20,
            daily_usage_limit: config.daily_usage_limit,
            user_id: config.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ErrorKind;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "key")])).unwrap();
        assert!(config.fast_mode);
        assert_eq!(config.fast_mode_max_tree_entries, 400);
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.daily_usage_limit, 0);
        assert!(config.github_token.is_none());
        assert_eq!(config.database_path, "repolens.db");
    }

    #[test]
    fn test_missing_api_key_is_invalid_configuration() {
        let err = Config::from_lookup(lookup(&[("GITHUB_TOKEN", "ghp_x")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_overrides_and_malformed_values() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("FAST_MODE", "false"),
            ("LLM_TIMEOUT_MS", "500"),
            ("USER_ID", "dev-1"),
        ]))
        .unwrap();
        assert!(!config.fast_mode);
        assert_eq!(config.llm_timeout, Duration::from_millis(500));

        let pipeline = PipelineConfig::from(&config);
        assert_eq!(pipeline.user_id.as_deref(), Some("dev-1"));
        assert!(!pipeline.fast_mode);

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("BUDGET_CAPACITY", "lots"),
        ]))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
