//! Store configuration.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::substrate::check_tag_count;
use crate::TAG_COUNT;

/// Environment variable for the number of tags.
pub const ENV_TAG_COUNT: &str = "BLINDHEAP_TAG_COUNT";
/// Environment variable for the per-scan read budget.
pub const ENV_MAX_SCAN_SAMPLES: &str = "BLINDHEAP_MAX_SCAN_SAMPLES";
/// Environment variable for the repair attempt budget.
pub const ENV_MAX_ATTEMPTS: &str = "BLINDHEAP_MAX_ATTEMPTS";
/// Environment variable for the RNG seed.
pub const ENV_SEED: &str = "BLINDHEAP_SEED";

/// Configuration for a store and the heap backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of tags (and substrate cells), 1..=128
    pub tag_count: usize,

    /// Reads allowed per lookup or repair scan before the update is parked
    pub max_scan_samples: Option<u64>,

    /// Repair attempts allowed per update before it is parked
    pub max_attempts: Option<u32>,

    /// Seed for the heap RNG; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tag_count: TAG_COUNT,
            max_scan_samples: None,
            max_attempts: None,
            seed: None,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let tag_count = parse_var(&lookup, ENV_TAG_COUNT)?.unwrap_or(defaults.tag_count);
        check_tag_count(tag_count)?;

        Ok(Self {
            tag_count,
            max_scan_samples: parse_var(&lookup, ENV_MAX_SCAN_SAMPLES)?,
            max_attempts: parse_var(&lookup, ENV_MAX_ATTEMPTS)?,
            seed: parse_var(&lookup, ENV_SEED)?,
        })
    }

    /// Set the tag count.
    #[must_use]
    pub fn with_tag_count(mut self, tag_count: usize) -> Self {
        self.tag_count = tag_count;
        self
    }

    /// Set the per-scan read budget.
    #[must_use]
    pub fn with_max_scan_samples(mut self, samples: u64) -> Self {
        self.max_scan_samples = Some(samples);
        self
    }

    /// Set the repair attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.tag_count, 128);
    }

    #[test]
    fn reads_every_variable() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_TAG_COUNT, "16"),
            (ENV_MAX_SCAN_SAMPLES, "10000"),
            (ENV_MAX_ATTEMPTS, " 8 "),
            (ENV_SEED, "42"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::default()
                .with_tag_count(16)
                .with_max_scan_samples(10_000)
                .with_max_attempts(8)
                .with_seed(42)
        );
    }

    #[test]
    fn blank_values_fall_back() {
        let config = StoreConfig::from_lookup(lookup(&[(ENV_SEED, "  ")])).unwrap();
        assert_eq!(config.seed, None);
    }

    #[test]
    fn rejects_garbage() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "lots")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(ENV_MAX_ATTEMPTS)));
    }

    #[test]
    fn rejects_oversized_tag_count() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_TAG_COUNT, "129")])).unwrap_err();
        assert!(matches!(err, Error::InvalidTagCount(129)));
    }
}
