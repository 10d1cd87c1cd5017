//! Placement Selector and Scrubber (§4.6).

use crate::lookup::{is_mac_instance_type, resolve_image_by_instance_type};
use crate::pool::PoolWorker;
use aquarium_aws_core::client::RunInstanceSpec;
use aquarium_aws_core::{CloudClient, Definition, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SCRUB_TERMINATE_BACKOFF: Duration = Duration::from_secs(10);

/// Where to place a new instance: a specific reserved host, auto-place
/// tenancy against any available dedicated host of the right type, or
/// default (shared) tenancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub tenancy_host: bool,
    pub host_id: Option<String>,
    pub availability_zone: Option<String>,
}

/// Resolves a definition's placement (§4.6):
/// - `pool` set -> reserve/allocate a host from that pool, pinned by id.
/// - mac, no pool -> auto-place tenancy against any available mac host.
/// - otherwise -> default tenancy.
pub async fn resolve_placement<C: CloudClient + 'static>(
    definition: &Definition,
    pools: &HashMap<String, Arc<PoolWorker<C>>>,
) -> Result<Placement> {
    if let Some(pool_name) = definition.pool_name() {
        let pool = pools
            .get(pool_name)
            .ok_or_else(|| Error::Configuration(format!("unknown pool {pool_name}")))?;
        let (host_id, zone) = pool.reserve_allocate_host(&definition.instance_type).await;
        if host_id.is_empty() {
            return Err(Error::CapacityDenied(format!(
                "pool {pool_name} has no capacity for {}",
                definition.instance_type
            )));
        }
        return Ok(Placement {
            tenancy_host: true,
            host_id: Some(host_id),
            availability_zone: Some(zone),
        });
    }

    if is_mac_instance_type(&definition.instance_type) {
        return Ok(Placement {
            tenancy_host: true,
            host_id: None,
            availability_zone: None,
        });
    }

    Ok(Placement::default())
}

/// Triggers the provider's dedicated-host scrub workflow: place then
/// immediately terminate an ephemeral instance on `host_id` (§4.6, GLOSSARY
/// "Scrubbing"). Retries the terminate call indefinitely with a 10s
/// back-off; an unterminated ephemeral instance is a budget leak, so this
/// loop must not give up.
pub async fn scrub_host<C: CloudClient>(client: &C, host_id: &str, instance_type: &str) -> Result<()> {
    let types = client
        .describe_instance_types(&[instance_type.to_string()])
        .await?;
    let info = types
        .get(instance_type)
        .ok_or_else(|| Error::NotFound(format!("instance type {instance_type}")))?;

    let image_id =
        resolve_image_by_instance_type(client, &info.architecture, chrono::Utc::now().date_naive()).await?;

    let spec = RunInstanceSpec {
        image_id,
        instance_type: instance_type.to_string(),
        host_id: Some(host_id.to_string()),
        tenancy_host: true,
        subnet_id: None,
        security_group_id: None,
        tags: HashMap::new(),
        user_data_base64: None,
        disks: Vec::new(),
    };
    let result = client.run_instance(&spec).await?;

    loop {
        match client.terminate_instance(&result.instance_id).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    host_id,
                    instance_id = %result.instance_id,
                    error = %e,
                    "scrub terminate failed, retrying in 10s"
                );
                tokio::time::sleep(SCRUB_TERMINATE_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use aquarium_aws_core::{DedicatedPoolRecord, Host, HostState};
    use std::time::Duration as StdDuration;

    fn definition(instance_type: &str, pool: &str) -> Definition {
        Definition {
            instance_type: instance_type.to_string(),
            cpu: 1,
            image: String::new(),
            security_group: String::new(),
            subnet: String::new(),
            disks: HashMap::new(),
            encrypt_key: String::new(),
            tags: HashMap::new(),
            userdata_format: None,
            userdata_prefix: String::new(),
            pool: pool.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mac_without_pool_is_auto_place() {
        let pools = HashMap::<String, Arc<PoolWorker<FakeClient>>>::new();
        let placement = resolve_placement(&definition("mac2.metal", ""), &pools).await.unwrap();
        assert!(placement.tenancy_host);
        assert!(placement.host_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_without_pool_is_default_tenancy() {
        let pools = HashMap::<String, Arc<PoolWorker<FakeClient>>>::new();
        let placement = resolve_placement(&definition("c6a.4xlarge", ""), &pools).await.unwrap();
        assert_eq!(placement, Placement::default());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_pool_is_configuration_error() {
        let pools = HashMap::<String, Arc<PoolWorker<FakeClient>>>::new();
        assert!(resolve_placement(&definition("mac2.metal", "ghost"), &pools)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pool_with_capacity_pins_a_host_id() {
        let client = Arc::new(FakeClient::new());
        client.push_host(Host {
            host_id: "h-1".into(),
            availability_zone: "us-west-2a".into(),
            allocation_time: chrono::Utc::now(),
            instance_type: "mac2.metal".into(),
            instances: Default::default(),
            available_capacity: 1,
            state: HostState::Available,
        });
        let record = DedicatedPoolRecord {
            name: "macbuilders".into(),
            instance_type: "mac2.metal".into(),
            zones: vec!["us-west-2a".into()],
            max: 3,
            scrubbing_delay: StdDuration::from_secs(3600),
            release_delay: StdDuration::from_secs(24 * 3600),
            pending_to_available_delay: StdDuration::ZERO,
        };
        let worker = Arc::new(PoolWorker::new(record, client, HashMap::new()).await);
        worker.update_dedicated_hosts().await.unwrap();

        let mut pools = HashMap::new();
        pools.insert("macbuilders".to_string(), worker);

        let placement = resolve_placement(&definition("mac2.metal", "macbuilders"), &pools)
            .await
            .unwrap();
        assert_eq!(placement.host_id, Some("h-1".to_string()));
        assert_eq!(placement.availability_zone, Some("us-west-2a".to_string()));
    }
}
