//! In-memory [`CloudClient`] used by unit and integration tests across the
//! pool worker, planner, and quota cache. Never compiled into the real
//! driver binary.

use aquarium_aws_core::client::{
    CloudClient, HostFilter, ImageInfo, InstanceInfo, InstanceSnapshot, InstanceTypeInfo,
    KmsAliasInfo, ReleaseFailure, ReleaseOutcome, RunInstanceResult, RunInstanceSpec,
    SecurityGroupInfo, ServiceQuotaInfo, SnapshotInfo, SubnetInfo, VpcInfo,
};
use aquarium_aws_core::{Host, HostState, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeClient {
    pub hosts: Mutex<Vec<Host>>,
    pub instance_types: Mutex<HashMap<String, InstanceTypeInfo>>,
    pub quotas: Mutex<HashMap<String, f64>>,
    pub subnets: Mutex<Vec<SubnetInfo>>,
    pub vpcs: Mutex<Vec<VpcInfo>>,
    pub images: Mutex<Vec<ImageInfo>>,
    pub active_instances: Mutex<Vec<InstanceInfo>>,
    pub next_host_seq: Mutex<u64>,
    /// Remaining allocations that should fail, keyed by zone.
    pub fail_zones: Mutex<Vec<String>>,
    pub instances: Mutex<HashMap<String, InstanceSnapshot>>,
    pub kms_aliases: Mutex<Vec<KmsAliasInfo>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quota(&self, name: &str, value: f64) {
        self.quotas.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn set_instance_type(&self, name: &str, vcpus: i64, core_count: i64, threads_per_core: i64) {
        self.set_instance_type_arch(name, vcpus, core_count, threads_per_core, "x86_64");
    }

    pub fn set_instance_type_arch(
        &self,
        name: &str,
        vcpus: i64,
        core_count: i64,
        threads_per_core: i64,
        architecture: &str,
    ) {
        self.instance_types.lock().unwrap().insert(
            name.to_string(),
            InstanceTypeInfo {
                vcpus,
                core_count,
                threads_per_core,
                architecture: architecture.to_string(),
            },
        );
    }

    pub fn push_host(&self, host: Host) {
        self.hosts.lock().unwrap().push(host);
    }

    pub fn set_subnets(&self, subnets: Vec<SubnetInfo>) {
        *self.subnets.lock().unwrap() = subnets;
    }

    pub fn set_vpcs(&self, vpcs: Vec<VpcInfo>) {
        *self.vpcs.lock().unwrap() = vpcs;
    }

    pub fn fail_zone(&self, zone: &str) {
        self.fail_zones.lock().unwrap().push(zone.to_string());
    }

    pub fn set_kms_aliases(&self, aliases: Vec<KmsAliasInfo>) {
        *self.kms_aliases.lock().unwrap() = aliases;
    }

    pub fn set_active_instances(&self, instances: Vec<InstanceInfo>) {
        *self.active_instances.lock().unwrap() = instances;
    }
}

#[async_trait]
impl CloudClient for FakeClient {
    async fn describe_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>> {
        let hosts = self.hosts.lock().unwrap();
        Ok(hosts
            .iter()
            .filter(|h| {
                filter
                    .instance_type
                    .as_ref()
                    .is_none_or(|t| &h.instance_type == t)
                    && filter
                        .availability_zone
                        .as_ref()
                        .is_none_or(|z| &h.availability_zone == z)
                    && (filter.states.is_empty()
                        || h.state
                            .as_provider_str()
                            .is_some_and(|s| filter.states.contains(&s)))
            })
            .cloned()
            .collect())
    }

    async fn allocate_hosts(
        &self,
        zone: &str,
        instance_type: &str,
        quantity: u32,
        _tags: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        if self.fail_zones.lock().unwrap().contains(&zone.to_string()) {
            return Err(aquarium_aws_core::Error::Provider(format!(
                "no capacity in {zone}"
            )));
        }
        let mut seq = self.next_host_seq.lock().unwrap();
        let mut ids = Vec::new();
        for _ in 0..quantity {
            *seq += 1;
            let id = format!("h-fake-{seq}");
            self.hosts.lock().unwrap().push(Host {
                host_id: id.clone(),
                availability_zone: zone.to_string(),
                allocation_time: chrono::Utc::now(),
                instance_type: instance_type.to_string(),
                instances: Default::default(),
                available_capacity: 1,
                state: HostState::Available,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseOutcome> {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.retain(|h| !host_ids.contains(&h.host_id));
        Ok(ReleaseOutcome {
            succeeded: host_ids.to_vec(),
            unsuccessful: Vec::new(),
        })
    }

    async fn run_instance(&self, spec: &RunInstanceSpec) -> Result<RunInstanceResult> {
        let instance_id = format!("i-fake-{}", spec.image_id);
        self.instances.lock().unwrap().insert(
            instance_id.clone(),
            InstanceSnapshot {
                state: "running".to_string(),
                private_ip: Some("10.0.0.1".to_string()),
            },
        );
        Ok(RunInstanceResult {
            instance_id,
            private_ip: Some("10.0.0.1".to_string()),
        })
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        if let Some(snapshot) = self.instances.lock().unwrap().get_mut(instance_id) {
            snapshot.state = "terminated".to_string();
        }
        Ok(())
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceSnapshot>> {
        Ok(self.instances.lock().unwrap().get(instance_id).cloned())
    }

    async fn describe_active_instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self.active_instances.lock().unwrap().clone())
    }

    async fn describe_instance_types(
        &self,
        types: &[String],
    ) -> Result<HashMap<String, InstanceTypeInfo>> {
        let map = self.instance_types.lock().unwrap();
        Ok(types
            .iter()
            .filter_map(|t| map.get(t).map(|info| (t.clone(), info.clone())))
            .collect())
    }

    async fn describe_vpcs(&self, _owner_accounts: &[String]) -> Result<Vec<VpcInfo>> {
        Ok(self.vpcs.lock().unwrap().iter().filter(|v| v.is_default).cloned().collect())
    }

    async fn describe_vpcs_by_tag(
        &self,
        key: &str,
        value: &str,
        _owner_accounts: &[String],
    ) -> Result<Vec<VpcInfo>> {
        Ok(self
            .vpcs
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.tags.get(key).map(|v2| v2.as_str()) == Some(value))
            .cloned()
            .collect())
    }

    async fn describe_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetInfo>> {
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn describe_subnet(&self, subnet_id: &str, _owner_accounts: &[String]) -> Result<Option<SubnetInfo>> {
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.subnet_id == subnet_id)
            .cloned())
    }

    async fn describe_subnets_by_tag(
        &self,
        key: &str,
        value: &str,
        _owner_accounts: &[String],
    ) -> Result<Vec<SubnetInfo>> {
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.tags.get(key).map(|v2| v2.as_str()) == Some(value))
            .cloned()
            .collect())
    }

    async fn describe_images_by_name(
        &self,
        name: &str,
        _owner_accounts: &[String],
    ) -> Result<Vec<ImageInfo>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    async fn describe_public_images_by_architecture_and_date(
        &self,
        architecture: &str,
        _creation_date_filter: &str,
    ) -> Result<Vec<ImageInfo>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.architecture == architecture)
            .cloned()
            .collect())
    }

    async fn describe_snapshots_by_tag(
        &self,
        _key: &str,
        _value: &str,
        _owner_accounts: &[String],
    ) -> Result<Vec<SnapshotInfo>> {
        Ok(Vec::new())
    }

    async fn describe_security_groups_by_name(
        &self,
        _name: &str,
        _owner_accounts: &[String],
    ) -> Result<Vec<SecurityGroupInfo>> {
        Ok(Vec::new())
    }

    async fn list_kms_aliases(&self) -> Result<Vec<KmsAliasInfo>> {
        Ok(self.kms_aliases.lock().unwrap().clone())
    }

    async fn list_service_quotas(&self) -> Result<Vec<ServiceQuotaInfo>> {
        Ok(self
            .quotas
            .lock()
            .unwrap()
            .iter()
            .map(|(name, value)| ServiceQuotaInfo {
                quota_name: name.clone(),
                value: *value,
            })
            .collect())
    }
}
