use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use platform_db::DatabaseSettings;
use products_crm::{PipelineSettings, StageDeletePolicy};

const DEFAULT_ROLE_CACHE_TTL_SECS: u64 = 5;
const DEFAULT_ROLE_CACHE_CAPACITY: usize = 100;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub pipeline: PipelineSettings,
    pub role_cache_ttl: Duration,
    pub role_cache_capacity: usize,
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` when present.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let stage_delete_policy = match lookup("STAGE_DELETE_POLICY") {
            Some(raw) if !raw.trim().is_empty() => raw
                .parse::<StageDeletePolicy>()
                .context("invalid STAGE_DELETE_POLICY")?,
            _ => StageDeletePolicy::default(),
        };

        let role_cache_ttl = Duration::from_secs(
            parse_or(&lookup, "ROLE_CACHE_TTL_SECS", DEFAULT_ROLE_CACHE_TTL_SECS)?,
        );
        let role_cache_capacity =
            parse_or(&lookup, "ROLE_CACHE_CAPACITY", DEFAULT_ROLE_CACHE_CAPACITY)?;
        if role_cache_capacity == 0 {
            return Err(anyhow!("ROLE_CACHE_CAPACITY must be at least 1"));
        }

        Ok(Self {
            database: DatabaseSettings::from_env(),
            pipeline: PipelineSettings {
                stage_delete_policy,
            },
            role_cache_ttl,
            role_cache_capacity,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.pipeline.stage_delete_policy, StageDeletePolicy::Block);
        assert_eq!(config.role_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.role_cache_capacity, 100);
    }

    #[test]
    fn reads_policy_and_cache_settings() {
        let config = config(&[
            ("STAGE_DELETE_POLICY", "allow_dangling"),
            ("ROLE_CACHE_TTL_SECS", "30"),
            ("ROLE_CACHE_CAPACITY", " 8 "),
        ])
        .unwrap();
        assert_eq!(
            config.pipeline.stage_delete_policy,
            StageDeletePolicy::AllowDangling
        );
        assert_eq!(config.role_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.role_cache_capacity, 8);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("STAGE_DELETE_POLICY", "cascade")]).is_err());
        assert!(config(&[("ROLE_CACHE_TTL_SECS", "soon")]).is_err());
        assert!(config(&[("ROLE_CACHE_CAPACITY", "0")]).is_err());
    }
}
