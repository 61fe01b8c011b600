//! Runtime configuration of the enrichment jobs.
//!
//! Configuration is read from JSON or from the environment:
//!
//! | Variable                      | Default  |
//! |-------------------------------|----------|
//! | `REJOB_SEO_ENABLED`           | `true`   |
//! | `REJOB_TAGS_ENABLED`          | `true`   |
//! | `REJOB_TRANSLATION_ENABLED`   | `true`   |
//! | `REJOB_LOCALES`               | `fr,de`  |
//! | `REJOB_MAX_TAGS`              | `10`     |
//! | `REJOB_SEO_WAIT_ATTEMPTS`     | `5`      |
//! | `REJOB_SEO_WAIT_BASE_SECS`    | `10`     |
use std::{collections::HashMap, str::FromStr};

use chrono::TimeDelta;
use rejob::{dependency::Dependency, scheduler::RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEO_ENABLED: &str = "REJOB_SEO_ENABLED";
const TAGS_ENABLED: &str = "REJOB_TAGS_ENABLED";
const TRANSLATION_ENABLED: &str = "REJOB_TRANSLATION_ENABLED";
const LOCALES: &str = "REJOB_LOCALES";
const MAX_TAGS: &str = "REJOB_MAX_TAGS";
const SEO_WAIT_ATTEMPTS: &str = "REJOB_SEO_WAIT_ATTEMPTS";
const SEO_WAIT_BASE_SECS: &str = "REJOB_SEO_WAIT_BASE_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub seo_enabled: bool,
    pub tags_enabled: bool,
    pub translation_enabled: bool,
    /// The locales a translation job is enqueued for.
    pub locales: Vec<String>,
    pub max_tags: usize,
    /// How often a translation waits for the SEO data before giving up.
    pub seo_wait_attempts: u16,
    pub seo_wait_base_secs: i64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            seo_enabled: true,
            tags_enabled: true,
            translation_enabled: true,
            locales: vec!["fr".to_owned(), "de".to_owned()],
            max_tags: 10,
            seo_wait_attempts: 5,
            seo_wait_base_secs: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {name}")]
    InvalidVariable { name: &'static str, value: String },
}

impl EnrichmentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Read the configuration from `REJOB_*` variables, unset variables keep their default.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with("REJOB_"))
            .collect();
        let defaults = Self::default();

        Ok(Self {
            seo_enabled: parse_bool(&vars, SEO_ENABLED, defaults.seo_enabled)?,
            tags_enabled: parse_bool(&vars, TAGS_ENABLED, defaults.tags_enabled)?,
            translation_enabled: parse_bool(
                &vars,
                TRANSLATION_ENABLED,
                defaults.translation_enabled,
            )?,
            locales: vars
                .get(LOCALES)
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|locale| !locale.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or(defaults.locales),
            max_tags: parse(&vars, MAX_TAGS, defaults.max_tags)?,
            seo_wait_attempts: parse(&vars, SEO_WAIT_ATTEMPTS, defaults.seo_wait_attempts)?,
            seo_wait_base_secs: parse(&vars, SEO_WAIT_BASE_SECS, defaults.seo_wait_base_secs)?,
        })
    }

    /// The wait applied by the translation job while the SEO data is missing.
    pub fn seo_dependency(&self) -> Dependency {
        Dependency::new("SEO data not yet available").with_policy(RetryPolicy::linear(
            self.seo_wait_attempts,
            TimeDelta::seconds(self.seo_wait_base_secs.max(0)),
        ))
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = vars.get(name) else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVariable {
            name,
            value: value.clone(),
        }),
    }
}

fn parse<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    vars.get(name).map_or(Ok(default), |value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVariable {
                name,
                value: value.clone(),
            })
    })
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = EnrichmentConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();

        assert_eq!(config, EnrichmentConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = EnrichmentConfig::from_vars(vars(&[
            (SEO_ENABLED, "off"),
            (TAGS_ENABLED, "No"),
            (LOCALES, "es, it,,pt-BR"),
            (MAX_TAGS, "3"),
            (SEO_WAIT_ATTEMPTS, "2"),
        ]))
        .unwrap();

        assert!(!config.seo_enabled);
        assert!(!config.tags_enabled);
        assert!(config.translation_enabled);
        assert_eq!(config.locales, ["es", "it", "pt-BR"]);
        assert_eq!(config.max_tags, 3);
        assert_eq!(config.seo_wait_attempts, 2);
        assert_eq!(config.seo_wait_base_secs, 10);
    }

    #[test]
    fn invalid_variables_are_rejected() {
        assert_matches!(
            EnrichmentConfig::from_vars(vars(&[(TRANSLATION_ENABLED, "maybe")])),
            Err(ConfigError::InvalidVariable { name: TRANSLATION_ENABLED, .. })
        );
        assert_matches!(
            EnrichmentConfig::from_vars(vars(&[(MAX_TAGS, "-1")])),
            Err(ConfigError::InvalidVariable { name: MAX_TAGS, .. })
        );
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EnrichmentConfig::from_json(r#"{"locales": ["ja"], "max_tags": 5}"#).unwrap();

        assert_eq!(config.locales, ["ja"]);
        assert_eq!(config.max_tags, 5);
        assert!(config.seo_enabled);

        assert_matches!(
            EnrichmentConfig::from_json("{\"max_tags\": \"many\"}"),
            Err(ConfigError::Json(_))
        );
    }

    #[test]
    fn seo_dependency_uses_configured_policy() {
        let dependency = EnrichmentConfig {
            seo_wait_attempts: 3,
            seo_wait_base_secs: 2,
            ..Default::default()
        }
        .seo_dependency();

        assert_eq!(
            dependency.policy(),
            RetryPolicy::linear(3, TimeDelta::seconds(2))
        );
    }
}
