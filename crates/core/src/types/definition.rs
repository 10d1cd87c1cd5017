use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Format to serialize the allocation engine's metadata into instance user-data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserDataFormat {
    Json,
    Env,
    Ps1,
}

/// One disk attachment: device name -> spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Ignored when `clone` is set.
    #[serde(default)]
    pub size_gb: u32,
    /// `"type[:iops[:throughput]]"`; empty means a plain gp3 volume.
    #[serde(default)]
    pub disk_type: String,
    /// `snap-*` id or `key:value` tag selector.
    #[serde(default)]
    pub clone: Option<String>,
    /// `"k:v,k:v,..."`.
    #[serde(default)]
    pub label: String,
}

/// A workload request the planner and placement selector act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub instance_type: String,
    /// vCPUs required; used by the on-demand planner arithmetic (§4.5 step 3).
    pub cpu: i64,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub security_group: String,
    /// id, `key:value` tag selector, or empty for the account's default VPC.
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub disks: HashMap<String, DiskSpec>,
    #[serde(default)]
    pub encrypt_key: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub userdata_format: Option<UserDataFormat>,
    #[serde(default)]
    pub userdata_prefix: String,
    /// Named pool to place on, or empty for auto-place / on-demand.
    #[serde(default)]
    pub pool: String,
}

impl Definition {
    pub fn pool_name(&self) -> Option<&str> {
        if self.pool.is_empty() {
            None
        } else {
            Some(&self.pool)
        }
    }
}

impl DiskSpec {
    /// Parses `"type[:iops[:throughput]]"`; empty means a plain gp3 volume.
    pub fn parse_type(&self) -> (String, Option<i64>, Option<i64>) {
        if self.disk_type.is_empty() {
            return ("gp3".to_string(), None, None);
        }
        let mut parts = self.disk_type.splitn(3, ':');
        let volume_type = parts.next().unwrap_or("gp3").to_string();
        let iops = parts.next().and_then(|s| s.parse().ok());
        let throughput = parts.next().and_then(|s| s.parse().ok());
        (volume_type, iops, throughput)
    }

    /// Parses `"k:v,k:v,..."` into a tag map.
    pub fn parse_label(&self) -> HashMap<String, String> {
        self.label
            .split(',')
            .filter_map(|pair| pair.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_type_defaults_to_gp3() {
        let disk = DiskSpec { size_gb: 10, disk_type: String::new(), clone: None, label: String::new() };
        assert_eq!(disk.parse_type(), ("gp3".to_string(), None, None));
    }

    #[test]
    fn parse_type_with_iops_and_throughput() {
        let disk = DiskSpec { size_gb: 10, disk_type: "io2:3000:500".into(), clone: None, label: String::new() };
        assert_eq!(disk.parse_type(), ("io2".to_string(), Some(3000), Some(500)));
    }

    #[test]
    fn parse_label_splits_pairs() {
        let disk = DiskSpec {
            size_gb: 10,
            disk_type: String::new(),
            clone: None,
            label: "role:data,tier:fast".into(),
        };
        let labels = disk.parse_label();
        assert_eq!(labels.get("role").map(String::as_str), Some("data"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("fast"));
    }
}
