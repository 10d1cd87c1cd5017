//! Capacity Planner (§4.5): "how many instances of this definition can
//! this node place right now?"

use crate::lookup::{is_mac_instance_type, resolve_subnet};
use crate::pool::PoolWorker;
use crate::quota::QuotaCache;
use aquarium_aws_core::client::HostFilter;
use aquarium_aws_core::{CloudClient, Definition, QuotaBucket, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub struct CapacityPlanner<C: CloudClient> {
    client: Arc<C>,
    quotas: Arc<QuotaCache<C>>,
    pools: HashMap<String, Arc<PoolWorker<C>>>,
    owner_accounts: Vec<String>,
}

impl<C: CloudClient + 'static> CapacityPlanner<C> {
    pub fn new(
        client: Arc<C>,
        quotas: Arc<QuotaCache<C>>,
        pools: HashMap<String, Arc<PoolWorker<C>>>,
        owner_accounts: Vec<String>,
    ) -> Self {
        Self { client, quotas, pools, owner_accounts }
    }

    /// §4.5 `AvailableCapacity(nodeUsage, definition)`. `nodeUsage` does not
    /// factor into this provider-side arithmetic (it is the allocation
    /// engine's own bookkeeping of what it has already placed), so it is
    /// not threaded through here.
    pub async fn available_capacity(&self, definition: &Definition) -> Result<i64> {
        if let Some(pool_name) = definition.pool_name() {
            let Some(pool) = self.pools.get(pool_name) else {
                return Ok(-1);
            };
            return Ok(pool.available_capacity(&definition.instance_type).await);
        }

        if is_mac_instance_type(&definition.instance_type) {
            return self.auto_place_mac_capacity(&definition.instance_type).await;
        }

        self.on_demand_capacity(definition).await
    }

    /// §4.5 step 2: mac hosts outside any managed pool, each hosting
    /// exactly one instance.
    async fn auto_place_mac_capacity(&self, instance_type: &str) -> Result<i64> {
        let filter = HostFilter {
            states: vec!["available"],
            availability_zone: None,
            instance_type: Some(instance_type.to_string()),
            tag_key: None,
        };
        let hosts = self.client.describe_hosts(&filter).await?;
        Ok(hosts.len() as i64)
    }

    /// §4.5 steps 3-5: quota/vCPU arithmetic bounded by subnet IP budget.
    async fn on_demand_capacity(&self, definition: &Definition) -> Result<i64> {
        if let Err(e) = self.quotas.refresh(false).await {
            // §7: a failed quota refresh is non-fatal; fall back to the
            // last known values.
            tracing::warn!(error = %e, "quota refresh failed, using last known values");
        }

        let Some(bucket) = QuotaBucket::for_instance_type(&definition.instance_type) else {
            return Ok(-1);
        };

        let quota_vcpus = self.quotas.get(bucket).await;
        let instances = self.client.describe_active_instances().await?;
        let used_vcpus: i64 = instances
            .iter()
            .filter(|i| bucket.matches(&i.instance_type))
            .map(|i| i.core_count * i.threads_per_core)
            .sum();
        let headroom_vcpus = (quota_vcpus - used_vcpus).max(0);
        let inst_count = if definition.cpu > 0 {
            headroom_vcpus / definition.cpu
        } else {
            0
        };

        let resolution = resolve_subnet(self.client.as_ref(), &definition.subnet, &self.owner_accounts).await?;
        Ok(inst_count.min(resolution.available_ip_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use aquarium_aws_core::client::{InstanceInfo, SubnetInfo, VpcInfo};
    use std::collections::HashMap as Map;

    fn planner(client: Arc<FakeClient>) -> CapacityPlanner<FakeClient> {
        let quotas = Arc::new(QuotaCache::new(client.clone()));
        CapacityPlanner::new(client, quotas, HashMap::new(), Vec::new())
    }

    fn definition(instance_type: &str, cpu: i64) -> Definition {
        Definition {
            instance_type: instance_type.to_string(),
            cpu,
            image: String::new(),
            security_group: String::new(),
            subnet: String::new(),
            disks: Map::new(),
            encrypt_key: String::new(),
            tags: Map::new(),
            userdata_format: None,
            userdata_prefix: String::new(),
            pool: String::new(),
        }
    }

    #[tokio::test]
    async fn scenario_on_demand_planner() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 256.0);
        client.set_vpcs(vec![VpcInfo { vpc_id: "vpc-1".into(), is_default: true, tags: Map::new() }]);
        client.set_subnets(vec![SubnetInfo {
            subnet_id: "subnet-a".into(),
            vpc_id: "vpc-1".into(),
            availability_zone: "us-west-2a".into(),
            available_ip_address_count: 20,
            tags: Map::new(),
        }]);
        client.set_active_instances(vec![InstanceInfo {
            instance_id: "i-1".into(),
            instance_type: "c6a.4xlarge".into(),
            state: "running".into(),
            core_count: 32,
            threads_per_core: 2,
        }]);

        let planner = planner(client);
        let capacity = planner.available_capacity(&definition("c6a.4xlarge", 16)).await.unwrap();
        assert_eq!(capacity, 12, "min((256-64)/16, 20) = 12");
    }

    #[tokio::test]
    async fn on_demand_planner_sums_vcpus_across_whole_bucket() {
        // Standard covers a/c/d/h/i/m/r/t/z: an m6i instance running
        // alongside the requested c6a type must still count against the
        // shared quota (§4.5 step 3, §8 invariant 6).
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 256.0);
        client.set_vpcs(vec![VpcInfo { vpc_id: "vpc-1".into(), is_default: true, tags: Map::new() }]);
        client.set_subnets(vec![SubnetInfo {
            subnet_id: "subnet-a".into(),
            vpc_id: "vpc-1".into(),
            availability_zone: "us-west-2a".into(),
            available_ip_address_count: 20,
            tags: Map::new(),
        }]);
        client.set_active_instances(vec![
            InstanceInfo {
                instance_id: "i-1".into(),
                instance_type: "c6a.4xlarge".into(),
                state: "running".into(),
                core_count: 16,
                threads_per_core: 2,
            },
            InstanceInfo {
                instance_id: "i-2".into(),
                instance_type: "m6i.2xlarge".into(),
                state: "running".into(),
                core_count: 16,
                threads_per_core: 2,
            },
        ]);

        let planner = planner(client);
        let capacity = planner.available_capacity(&definition("c6a.4xlarge", 16)).await.unwrap();
        assert_eq!(capacity, 12, "(256 - (32+32)) / 16 = 12, the m6i usage must count too");
    }

    #[tokio::test]
    async fn scenario_unknown_family_returns_minus_one() {
        let client = Arc::new(FakeClient::new());
        let planner = planner(client);
        assert_eq!(planner.available_capacity(&definition("zz.garbage", 1)).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn z9_garbage_matches_standard_bucket() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 10.0);
        client.set_vpcs(vec![VpcInfo { vpc_id: "vpc-1".into(), is_default: true, tags: Map::new() }]);
        client.set_subnets(vec![SubnetInfo {
            subnet_id: "subnet-a".into(),
            vpc_id: "vpc-1".into(),
            availability_zone: "us-west-2a".into(),
            available_ip_address_count: 5,
            tags: Map::new(),
        }]);
        let planner = planner(client);
        assert!(planner.available_capacity(&definition("z9.garbage", 1)).await.unwrap() >= 0);
    }

    #[tokio::test]
    async fn quota_deficit_clamps_to_zero() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 10.0);
        client.set_vpcs(vec![VpcInfo { vpc_id: "vpc-1".into(), is_default: true, tags: Map::new() }]);
        client.set_subnets(vec![SubnetInfo {
            subnet_id: "subnet-a".into(),
            vpc_id: "vpc-1".into(),
            availability_zone: "us-west-2a".into(),
            available_ip_address_count: 5,
            tags: Map::new(),
        }]);
        client.set_active_instances(vec![InstanceInfo {
            instance_id: "i-1".into(),
            instance_type: "c6a.4xlarge".into(),
            state: "running".into(),
            core_count: 64,
            threads_per_core: 2,
        }]);
        let planner = planner(client);
        assert_eq!(planner.available_capacity(&definition("c6a.4xlarge", 16)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_pool_returns_minus_one() {
        let client = Arc::new(FakeClient::new());
        let planner = planner(client);
        let mut def = definition("mac2.metal", 1);
        def.pool = "ghost".to_string();
        assert_eq!(planner.available_capacity(&def).await.unwrap(), -1);
    }
}
