//! The Cloud Client Facade contract (§4.1).
//!
//! Implementations own pagination internally: every method here returns the
//! fully-drained result of what the provider SDK would otherwise hand back
//! as pages. Callers never see a continuation token.

use crate::error::Result;
use crate::types::Host;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub states: Vec<&'static str>,
    pub availability_zone: Option<String>,
    pub instance_type: Option<String>,
    pub tag_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReleaseFailure {
    pub host_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseOutcome {
    pub succeeded: Vec<String>,
    pub unsuccessful: Vec<ReleaseFailure>,
}

/// A resolved disk attachment, ready to hand to `RunInstance`. Built by
/// `lookup::resolve_disk` from a [`crate::types::DiskSpec`] (§6 Disk spec).
#[derive(Debug, Clone)]
pub struct ResolvedDisk {
    pub device_name: String,
    /// Ignored when `snapshot_id` is set.
    pub size_gb: u32,
    /// `gp3` unless the disk's `type` field overrides it.
    pub volume_type: String,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub snapshot_id: Option<String>,
    pub tags: HashMap<String, String>,
    /// Resolved KMS key id, from the definition's `encryptKey` (§6), applied
    /// to this volume at `RunInstance` time.
    pub kms_key_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunInstanceSpec {
    pub image_id: String,
    pub instance_type: String,
    pub host_id: Option<String>,
    pub tenancy_host: bool,
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub tags: HashMap<String, String>,
    pub user_data_base64: Option<String>,
    pub disks: Vec<ResolvedDisk>,
}

#[derive(Debug, Clone)]
pub struct RunInstanceResult {
    pub instance_id: String,
    pub private_ip: Option<String>,
}

/// Point-in-time view of a single instance, used both by `Allocate`'s
/// private-IP poll and by `Status` (§6).
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub state: String,
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTypeInfo {
    pub vcpus: i64,
    pub core_count: i64,
    pub threads_per_core: i64,
    /// First entry of the provider's `SupportedArchitectures` list, used to
    /// pick an image when scrubbing (§4.2, §4.6).
    pub architecture: String,
}

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub instance_type: String,
    pub state: String,
    pub core_count: i64,
    pub threads_per_core: i64,
}

#[derive(Debug, Clone)]
pub struct VpcInfo {
    pub vpc_id: String,
    pub is_default: bool,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    pub available_ip_address_count: i64,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub image_id: String,
    pub name: String,
    pub state: String,
    pub creation_date: String,
    pub architecture: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub status: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SecurityGroupInfo {
    pub group_id: String,
    pub group_name: String,
}

#[derive(Debug, Clone)]
pub struct KmsAliasInfo {
    pub alias_name: String,
    pub target_key_id: String,
}

#[derive(Debug, Clone)]
pub struct ServiceQuotaInfo {
    pub quota_name: String,
    pub value: f64,
}

/// Typed wrapper over the provider API calls the core actually uses.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn describe_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>>;
    async fn allocate_hosts(
        &self,
        zone: &str,
        instance_type: &str,
        quantity: u32,
        tags: &HashMap<String, String>,
    ) -> Result<Vec<String>>;
    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseOutcome>;

    async fn run_instance(&self, spec: &RunInstanceSpec) -> Result<RunInstanceResult>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
    /// Polled by `Allocate` (§6) while waiting for a private IP to appear,
    /// and by `Status` to report whether the instance is still running.
    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceSnapshot>>;
    /// Pages `DescribeInstances` filtered only by non-terminated state, with
    /// no `instance-type` filter. Callers bucket the results client-side
    /// (`QuotaBucket::matches`) so a whole family's vCPU usage can be summed
    /// against its shared quota (§4.5 step 3).
    async fn describe_active_instances(&self) -> Result<Vec<InstanceInfo>>;

    async fn describe_instance_types(
        &self,
        types: &[String],
    ) -> Result<HashMap<String, InstanceTypeInfo>>;

    async fn describe_vpcs(&self, owner_accounts: &[String]) -> Result<Vec<VpcInfo>>;
    async fn describe_vpcs_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<VpcInfo>>;
    async fn describe_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetInfo>>;
    async fn describe_subnet(&self, subnet_id: &str, owner_accounts: &[String]) -> Result<Option<SubnetInfo>>;
    async fn describe_subnets_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SubnetInfo>>;

    async fn describe_images_by_name(
        &self,
        name: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<ImageInfo>>;
    async fn describe_public_images_by_architecture_and_date(
        &self,
        architecture: &str,
        creation_date_filter: &str,
    ) -> Result<Vec<ImageInfo>>;

    async fn describe_snapshots_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SnapshotInfo>>;

    async fn describe_security_groups_by_name(
        &self,
        name: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SecurityGroupInfo>>;

    async fn list_kms_aliases(&self) -> Result<Vec<KmsAliasInfo>>;

    async fn list_service_quotas(&self) -> Result<Vec<ServiceQuotaInfo>>;
}
