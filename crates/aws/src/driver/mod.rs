//! `AwsDriver`: the external interface consumed by the node allocation
//! engine (§6). Wires the Cloud Client Facade, Quota Cache, per-pool
//! workers, Capacity Planner and Placement Selector together, and owns
//! config parsing/validation.

use crate::client::Ec2Client;
use crate::config::Config;
use crate::lookup;
use crate::placement::{self, Placement};
use crate::planner::CapacityPlanner;
use crate::pool::PoolWorker;
use crate::quota::QuotaCache;
use aquarium_aws_core::client::{InstanceSnapshot, ResolvedDisk, RunInstanceSpec};
use aquarium_aws_core::{CloudClient, Definition, Error, Result, UserDataFormat};
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What `Allocate` hands back to the allocation engine: enough to track and
/// later deallocate the instance.
#[derive(Debug, Clone)]
pub struct Resource {
    pub identifier: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Allocated,
    None,
}

/// `GetTask` (§6): an image-create or snapshot-create task description
/// handed back to the allocation engine's secondary task runner (out of
/// scope for this driver to execute, §1).
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub options_json: String,
}

const IP_WAIT_TOTAL: Duration = Duration::from_secs(60);
const IP_WAIT_STEP: Duration = Duration::from_secs(5);

pub struct AwsDriver<C: CloudClient> {
    client: Arc<C>,
    config: Config,
    pools: HashMap<String, Arc<PoolWorker<C>>>,
    planner: CapacityPlanner<C>,
    _shutdown_tx: watch::Sender<()>,
}

impl AwsDriver<Ec2Client> {
    /// `Prepare(configBytes)` (§6) against the real EC2-backed client.
    pub async fn prepare(config_bytes: &[u8]) -> Result<Self> {
        let config = Config::from_json(config_bytes)?;
        let client = Arc::new(Ec2Client::from_config(&config.region, &config.key_id, &config.secret_key).await);
        Self::prepare_with_client(config, client).await
    }
}

impl<C: CloudClient + 'static> AwsDriver<C> {
    /// Same as [`AwsDriver::prepare`] but with an injected client, so tests
    /// and the CLI can drive the driver against a [`crate::client::fake::FakeClient`].
    pub async fn prepare_with_client(config: Config, client: Arc<C>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let quotas = Arc::new(QuotaCache::new(client.clone()));

        let mut pools = HashMap::new();
        for record in config.pool_records()? {
            let worker = Arc::new(PoolWorker::new(record, client.clone(), config.instance_tags.clone()).await);
            worker.spawn(shutdown_rx.clone());
            pools.insert(worker.name().to_string(), worker);
        }

        let planner = CapacityPlanner::new(client.clone(), quotas, pools.clone(), config.account_ids.clone());

        Ok(Self {
            client,
            config,
            pools,
            planner,
            _shutdown_tx: shutdown_tx,
        })
    }

    pub fn name(&self) -> &'static str {
        "aws"
    }

    /// `ValidateDefinition(def)` (§6).
    pub fn validate_definition(&self, definition: &Definition) -> Result<()> {
        if definition.instance_type.is_empty() {
            return Err(Error::Configuration("instance_type is required".into()));
        }
        if let Some(pool_name) = definition.pool_name() {
            if !self.pools.contains_key(pool_name) {
                return Err(Error::Configuration(format!("unknown pool {pool_name}")));
            }
        }
        for (device, disk) in &definition.disks {
            if disk.clone.is_none() && disk.size_gb == 0 {
                return Err(Error::Configuration(format!(
                    "disk {device}: size_gb is required when clone is unset"
                )));
            }
        }
        Ok(())
    }

    /// `AvailableCapacity(nodeUsage, def)` (§4.5, §6).
    pub async fn available_capacity(&self, definition: &Definition) -> Result<i64> {
        self.planner.available_capacity(definition).await
    }

    /// `Allocate(def, metadata)` (§6): resolve placement and every lookup,
    /// run the instance, tag volumes, and wait up to 60s for a private IP.
    pub async fn allocate(&self, definition: &Definition, metadata: &HashMap<String, String>) -> Result<Resource> {
        let generation_tag = format!("aquarium-{}", uuid::Uuid::new_v4());
        self.allocate_inner(definition, metadata, &generation_tag)
            .await
            .map_err(|e| tag_generation(&generation_tag, e))
    }

    async fn allocate_inner(
        &self,
        definition: &Definition,
        metadata: &HashMap<String, String>,
        generation_tag: &str,
    ) -> Result<Resource> {
        let placement = placement::resolve_placement(definition, &self.pools).await?;

        let image_id = lookup::resolve_image(self.client.as_ref(), &definition.image, &self.config.account_ids).await?;

        let subnet = if definition.subnet.is_empty() && placement.tenancy_host {
            None
        } else {
            Some(lookup::resolve_subnet(self.client.as_ref(), &definition.subnet, &self.config.account_ids).await?)
        };

        let security_group_id = if definition.security_group.is_empty() {
            None
        } else {
            Some(
                lookup::resolve_security_group(
                    self.client.as_ref(),
                    &definition.security_group,
                    &self.config.account_ids,
                )
                .await?,
            )
        };

        let kms_key_id = if definition.encrypt_key.is_empty() {
            None
        } else {
            Some(lookup::resolve_kms_key(self.client.as_ref(), &definition.encrypt_key).await?)
        };

        let mut disks = Vec::with_capacity(definition.disks.len());
        for (device, spec) in &definition.disks {
            disks.push(
                lookup::resolve_disk(self.client.as_ref(), device, spec, &self.config.account_ids, kms_key_id.clone())
                    .await?,
            );
        }

        let mut tags = self.config.instance_tags.clone();
        tags.extend(definition.tags.clone());
        tags.insert("AquariumGeneration".to_string(), generation_tag.to_string());

        let user_data_base64 = definition
            .userdata_format
            .map(|format| encode_user_data(format, &definition.userdata_prefix, metadata));

        let result = self
            .client
            .run_instance(&build_run_instance_spec(definition, &image_id, &placement, subnet.as_ref().map(|s| s.subnet_id.as_str()), security_group_id, tags, user_data_base64, disks))
            .await?;

        let ip = self.wait_for_private_ip(&result.instance_id, result.private_ip).await;
        Ok(Resource { identifier: result.instance_id, ip })
    }

    async fn wait_for_private_ip(&self, instance_id: &str, initial: Option<String>) -> Option<String> {
        if initial.is_some() {
            return initial;
        }
        let mut waited = Duration::ZERO;
        while waited < IP_WAIT_TOTAL {
            tokio::time::sleep(IP_WAIT_STEP).await;
            waited += IP_WAIT_STEP;
            match self.client.describe_instance(instance_id).await {
                Ok(Some(InstanceSnapshot { private_ip: Some(ip), .. })) => return Some(ip),
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(instance_id, error = %e, "failed to poll instance for private IP");
                }
            }
        }
        None
    }

    /// `Status(resource)` (§6).
    pub async fn status(&self, resource: &Resource) -> Result<ResourceStatus> {
        match self.client.describe_instance(&resource.identifier).await? {
            Some(snapshot) if snapshot.state != "terminated" && snapshot.state != "shutting-down" => {
                Ok(ResourceStatus::Allocated)
            }
            _ => Ok(ResourceStatus::None),
        }
    }

    /// `Deallocate(resource)` (§6): idempotent from the caller's
    /// perspective; only a provider rejection is an error.
    pub async fn deallocate(&self, resource: &Resource) -> Result<()> {
        self.client.terminate_instance(&resource.identifier).await
    }

    /// `GetTask(name, optionsJson)` (§6). Building and running the task
    /// itself is out of scope (§1); this only constructs its description,
    /// filling in the config-level `image_create_wait` default for image
    /// tasks that don't specify their own wait.
    pub fn get_task(&self, name: &str, options_json: &str) -> Task {
        let options_json = if name == "image" {
            inject_default_wait(options_json, self.config.image_create_wait)
        } else {
            options_json.to_string()
        };
        Task { name: name.to_string(), options_json }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_run_instance_spec(
    definition: &Definition,
    image_id: &str,
    placement: &Placement,
    subnet_id: Option<&str>,
    security_group_id: Option<String>,
    tags: HashMap<String, String>,
    user_data_base64: Option<String>,
    disks: Vec<ResolvedDisk>,
) -> RunInstanceSpec {
    RunInstanceSpec {
        image_id: image_id.to_string(),
        instance_type: definition.instance_type.clone(),
        host_id: placement.host_id.clone(),
        tenancy_host: placement.tenancy_host,
        subnet_id: subnet_id.map(str::to_string),
        security_group_id,
        tags,
        user_data_base64,
        disks,
    }
}

fn inject_default_wait(options_json: &str, image_create_wait: Duration) -> String {
    let mut value: serde_json::Value =
        serde_json::from_str(options_json).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.entry("wait_seconds").or_insert_with(|| image_create_wait.as_secs().into());
    }
    value.to_string()
}

fn tag_generation(generation_tag: &str, error: Error) -> Error {
    match error {
        Error::Configuration(m) => Error::Configuration(format!("[{generation_tag}] {m}")),
        Error::NotFound(m) => Error::NotFound(format!("[{generation_tag}] {m}")),
        Error::CapacityDenied(m) => Error::CapacityDenied(format!("[{generation_tag}] {m}")),
        Error::Transient(m) => Error::Transient(format!("[{generation_tag}] {m}")),
        Error::LicenseViolation(m) => Error::LicenseViolation(format!("[{generation_tag}] {m}")),
        Error::Provider(m) => Error::Provider(format!("[{generation_tag}] {m}")),
    }
}

/// §6 UserData format: serialize `metadata` per `format`, with `prefix`
/// applied to keys, then base64-encode.
fn encode_user_data(format: UserDataFormat, prefix: &str, metadata: &HashMap<String, String>) -> String {
    let rendered = match format {
        UserDataFormat::Json => {
            let prefixed: HashMap<String, String> =
                metadata.iter().map(|(k, v)| (format!("{prefix}{k}"), v.clone())).collect();
            serde_json::to_string(&prefixed).unwrap_or_default()
        }
        UserDataFormat::Env => {
            let mut keys: Vec<&String> = metadata.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| format!("{prefix}{}={}", k.to_ascii_uppercase(), metadata[k]))
                .collect::<Vec<_>>()
                .join("\n")
        }
        UserDataFormat::Ps1 => {
            let mut keys: Vec<&String> = metadata.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| format!("$env:{prefix}{} = \"{}\"", k.to_ascii_uppercase(), metadata[k]))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    base64::engine::general_purpose::STANDARD.encode(rendered)
}
