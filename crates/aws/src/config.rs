//! JSON config schema (§6) for the `aws` driver.

use aquarium_aws_core::{DedicatedPoolRecord, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub region: String,
    pub key_id: String,
    pub secret_key: String,
    #[serde(default)]
    pub account_ids: Vec<String>,
    #[serde(default)]
    pub instance_tags: HashMap<String, String>,
    #[serde(default)]
    pub dedicated_pool: HashMap<String, PoolConfigEntry>,
    #[serde(with = "humantime_serde", default = "default_image_create_wait")]
    pub image_create_wait: Duration,
}

fn default_image_create_wait() -> Duration {
    Duration::from_secs(600)
}

/// A `dedicated_pool.<name>` entry; combined with the map key to build a
/// full [`DedicatedPoolRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfigEntry {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub zones: Vec<String>,
    pub max: u32,
    #[serde(with = "humantime_serde", default)]
    pub scrubbing_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub release_delay: Duration,
    #[serde(with = "humantime_serde", default)]
    pub pending_to_available_delay: Duration,
}

impl Config {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Config = serde_json::from_slice(bytes)
            .map_err(|e| Error::Configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(Error::Configuration("region is required".into()));
        }
        if self.key_id.is_empty() {
            return Err(Error::Configuration("key_id is required".into()));
        }
        if self.secret_key.is_empty() {
            return Err(Error::Configuration("secret_key is required".into()));
        }
        for (name, entry) in &self.dedicated_pool {
            self.pool_record(name, entry)?.validate()?;
        }
        Ok(())
    }

    pub fn pool_records(&self) -> Result<Vec<DedicatedPoolRecord>> {
        self.dedicated_pool
            .iter()
            .map(|(name, entry)| self.pool_record(name, entry))
            .collect()
    }

    fn pool_record(&self, name: &str, entry: &PoolConfigEntry) -> Result<DedicatedPoolRecord> {
        Ok(DedicatedPoolRecord {
            name: name.to_string(),
            instance_type: entry.instance_type.clone(),
            zones: entry.zones.clone(),
            max: entry.max,
            scrubbing_delay: entry.scrubbing_delay,
            release_delay: entry.release_delay,
            pending_to_available_delay: entry.pending_to_available_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_credentials() {
        let json = br#"{"region":"us-west-2","key_id":"","secret_key":"x"}"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn rejects_mac_pool_with_short_release_delay() {
        let json = br#"{
            "region": "us-west-2",
            "key_id": "k",
            "secret_key": "s",
            "dedicated_pool": {
                "macbuilders": {
                    "type": "mac2.metal",
                    "zones": ["us-west-2a"],
                    "max": 3,
                    "scrubbing_delay": "1h",
                    "release_delay": "1h"
                }
            }
        }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn accepts_valid_mac_pool() {
        let json = br#"{
            "region": "us-west-2",
            "key_id": "k",
            "secret_key": "s",
            "dedicated_pool": {
                "macbuilders": {
                    "type": "mac2.metal",
                    "zones": ["us-west-2a", "us-west-2b"],
                    "max": 3,
                    "scrubbing_delay": "25h",
                    "release_delay": "24h"
                }
            }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.pool_records().unwrap().len(), 1);
    }
}
