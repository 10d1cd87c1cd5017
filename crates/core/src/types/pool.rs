use crate::error::{Error, Result};
use crate::helpers::type_matches;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable-after-load configuration for one dedicated-host pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedicatedPoolRecord {
    pub name: String,
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

/// 24h licensing floor the provider imposes on Apple/mac dedicated hosts.
pub const MAC_RELEASE_DELAY_FLOOR: Duration = Duration::from_secs(24 * 3600);

impl DedicatedPoolRecord {
    pub fn is_mac(&self) -> bool {
        type_matches(&self.instance_type, &["mac"])
    }

    /// §3 invariant: `releaseDelay >= 24h` whenever `type` denotes a mac family.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Configuration("pool name must not be empty".into()));
        }
        if self.zones.is_empty() {
            return Err(Error::Configuration(format!(
                "pool {}: zones must not be empty",
                self.name
            )));
        }
        if self.is_mac() && self.release_delay < MAC_RELEASE_DELAY_FLOOR {
            return Err(Error::Configuration(format!(
                "pool {}: release_delay must be >= 24h for mac instance types, got {:?}",
                self.name, self.release_delay
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pool() -> DedicatedPoolRecord {
        DedicatedPoolRecord {
            name: "macbuilders".into(),
            instance_type: "mac2.metal".into(),
            zones: vec!["us-west-2a".into()],
            max: 3,
            scrubbing_delay: Duration::from_secs(3600),
            release_delay: Duration::from_secs(24 * 3600),
            pending_to_available_delay: Duration::ZERO,
        }
    }

    #[test]
    fn rejects_short_release_delay_for_mac() {
        let mut p = base_pool();
        p.release_delay = Duration::from_secs(23 * 3600);
        assert!(p.validate().is_err());
    }

    #[test]
    fn accepts_short_release_delay_for_non_mac() {
        let mut p = base_pool();
        p.instance_type = "c6a.4xlarge".into();
        p.release_delay = Duration::from_secs(60);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn rejects_empty_zones() {
        let mut p = base_pool();
        p.zones.clear();
        assert!(p.validate().is_err());
    }
}
