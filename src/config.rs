use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::memo::cache::CacheLimits;

pub const ENV_MAX_ENTRIES_PER_SITE: &str = "PTRMEMO_MAX_ENTRIES_PER_SITE";
pub const ENV_MAX_TOTAL_ENTRIES: &str = "PTRMEMO_MAX_TOTAL_ENTRIES";
pub const ENV_VALIDATION_SAMPLE_RATE: &str = "PTRMEMO_VALIDATION_SAMPLE_RATE";
pub const ENV_INVALIDATE_ON_DEMOTION: &str = "PTRMEMO_INVALIDATE_ON_DEMOTION";

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    pub max_entries_per_site: usize,
    pub max_total_entries: usize,
    /// Fraction of cache hits re-checked against the real handler.
    pub validation_sample_rate: f64,
    /// Drop a site's entries as soon as it is found impure instead of letting them age out.
    pub invalidate_on_demotion: bool,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            max_entries_per_site: 256,
            max_total_entries: 64 * 1024,
            validation_sample_rate: 0.01,
            invalidate_on_demotion: true,
        }
    }
}

impl MemoConfig {
    pub fn new(
        max_entries_per_site: usize,
        max_total_entries: usize,
        validation_sample_rate: f64,
    ) -> Self {
        Self {
            max_entries_per_site,
            max_total_entries,
            validation_sample_rate,
            ..Self::default()
        }
    }

    pub fn with_invalidate_on_demotion(mut self, invalidate: bool) -> Self {
        self.invalidate_on_demotion = invalidate;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_entries_per_site == 0 {
            return Err(ConfigurationError::ZeroSiteCapacity);
        }
        if self.max_total_entries == 0 {
            return Err(ConfigurationError::ZeroTotalCapacity);
        }
        let rate = self.validation_sample_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(ConfigurationError::SampleRate(rate));
        }
        Ok(())
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_per_site: self.max_entries_per_site,
            max_total: self.max_total_entries,
        }
    }

    /// Reads overrides from `PTRMEMO_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = parse_var(&lookup, ENV_MAX_ENTRIES_PER_SITE)? {
            config.max_entries_per_site = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_MAX_TOTAL_ENTRIES)? {
            config.max_total_entries = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_VALIDATION_SAMPLE_RATE)? {
            config.validation_sample_rate = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_INVALIDATE_ON_DEMOTION)? {
            config.invalidate_on_demotion = value;
        }
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(source).map_err(|err| ConfigurationError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml-config")]
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Ok(Self::from_toml_str(&source)?)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigurationError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })
}
