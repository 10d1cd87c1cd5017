use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Observed and locally-overlaid state of a dedicated host.
///
/// `Reserved` is never returned by the cloud provider; it is written
/// locally between the moment a worker picks a host and the next refresh
/// of the provider view (see the pool worker's `reserve_host`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    Available,
    UnderAssessment,
    PermanentFailure,
    Pending,
    Reserved,
}

impl HostState {
    pub fn as_provider_str(&self) -> Option<&'static str> {
        match self {
            HostState::Available => Some("available"),
            HostState::UnderAssessment => Some("under-assessment"),
            HostState::PermanentFailure => Some("permanent-failure"),
            HostState::Pending => Some("pending"),
            // reserved is purely local, the provider never reports it
            HostState::Reserved => None,
        }
    }

    pub fn from_provider_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(HostState::Available),
            "under-assessment" => Some(HostState::UnderAssessment),
            "permanent-failure" => Some(HostState::PermanentFailure),
            "pending" => Some(HostState::Pending),
            _ => None,
        }
    }
}

/// A dedicated host as tracked by a pool worker.
#[derive(Debug, Clone)]
pub struct Host {
    pub host_id: String,
    pub availability_zone: String,
    pub allocation_time: DateTime<Utc>,
    pub instance_type: String,
    pub instances: HashSet<String>,
    pub available_capacity: i64,
    pub state: HostState,
}

impl Host {
    /// §3: a host is "used" iff it is locally reserved, or has instances placed on it.
    pub fn is_used(&self) -> bool {
        self.state == HostState::Reserved || !self.instances.is_empty()
    }

    /// §3: a host has positive capacity iff it is available and has slots free.
    pub fn has_capacity(&self) -> bool {
        self.state == HostState::Available && self.available_capacity > 0
    }

    /// Age of the host's allocation, used for the mac release-delay floor.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.allocation_time
    }
}

/// Tag key prefix marking a host as a member of a named pool.
pub fn pool_tag_key(pool_name: &str) -> String {
    format!("AquariumDedicatedPool-{pool_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(state: HostState, instances: &[&str]) -> Host {
        Host {
            host_id: "h-1".into(),
            availability_zone: "us-west-2a".into(),
            allocation_time: Utc::now(),
            instance_type: "mac2.metal".into(),
            instances: instances.iter().map(|s| s.to_string()).collect(),
            available_capacity: 1,
            state,
        }
    }

    #[test]
    fn used_iff_reserved_or_has_instances() {
        assert!(host(HostState::Reserved, &[]).is_used());
        assert!(host(HostState::Available, &["i-1"]).is_used());
        assert!(!host(HostState::Available, &[]).is_used());
    }

    #[test]
    fn capacity_requires_available_and_positive_slots() {
        let mut h = host(HostState::Available, &[]);
        assert!(h.has_capacity());
        h.available_capacity = 0;
        assert!(!h.has_capacity());
        let h = host(HostState::Pending, &[]);
        assert!(!h.has_capacity());
    }

    #[test]
    fn pool_tag_key_format() {
        assert_eq!(pool_tag_key("macbuilders"), "AquariumDedicatedPool-macbuilders");
    }
}
