//! Real `aws-sdk-ec2` / `aws-sdk-servicequotas` backed implementation of
//! [`CloudClient`] (§4.1).

use super::retry::with_retry;
use aquarium_aws_core::client::{
    CloudClient, HostFilter, ImageInfo, InstanceInfo, InstanceSnapshot, InstanceTypeInfo,
    KmsAliasInfo, ReleaseFailure, ReleaseOutcome, RunInstanceResult, RunInstanceSpec,
    SecurityGroupInfo, ServiceQuotaInfo, SnapshotInfo, SubnetInfo, VpcInfo,
};
use aquarium_aws_core::{Host, HostState, Result};
use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, Tag, TagSpecification, ResourceType};
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub struct Ec2Client {
    ec2: aws_sdk_ec2::Client,
    quotas: aws_sdk_servicequotas::Client,
    kms: aws_sdk_kms::Client,
}

impl Ec2Client {
    pub async fn from_config(region: &str, key_id: &str, secret_key: &str) -> Self {
        let credentials = aws_sdk_ec2::config::Credentials::new(
            key_id,
            secret_key,
            None,
            None,
            "aquarium-aws-static",
        );
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_ec2::config::Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await;
        Self {
            ec2: aws_sdk_ec2::Client::new(&shared),
            quotas: aws_sdk_servicequotas::Client::new(&shared),
            kms: aws_sdk_kms::Client::new(&shared),
        }
    }

    fn filter(name: &str, values: Vec<String>) -> Filter {
        Filter::builder().name(name).set_values(Some(values)).build()
    }

    fn tag_specs(resource_type: ResourceType, tags: &HashMap<String, String>) -> Vec<TagSpecification> {
        if tags.is_empty() {
            return Vec::new();
        }
        let tag_list: Vec<Tag> = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        vec![TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(tag_list))
            .build()]
    }

    fn host_state_from_sdk(state: Option<&aws_sdk_ec2::types::AllocationState>) -> Option<HostState> {
        HostState::from_provider_str(state?.as_str())
    }
}

fn tag_map(tags: Option<&[aws_sdk_ec2::types::Tag]>) -> HashMap<String, String> {
    tags.unwrap_or_default()
        .iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect()
}

#[async_trait]
impl CloudClient for Ec2Client {
    async fn describe_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>> {
        let mut filters = Vec::new();
        if !filter.states.is_empty() {
            filters.push(Self::filter(
                "state",
                filter.states.iter().map(|s| s.to_string()).collect(),
            ));
        }
        if let Some(zone) = &filter.availability_zone {
            filters.push(Self::filter("availability-zone", vec![zone.clone()]));
        }
        if let Some(instance_type) = &filter.instance_type {
            filters.push(Self::filter("instance-type", vec![instance_type.clone()]));
        }
        if let Some(tag_key) = &filter.tag_key {
            filters.push(Self::filter("tag-key", vec![tag_key.clone()]));
        }

        with_retry("describe_hosts", || async {
            let mut hosts = Vec::new();
            let mut pages = self
                .ec2
                .describe_hosts()
                .set_filter(Some(filters.clone()))
                .into_paginator()
                .send();
            use futures::stream::TryStreamExt;
            while let Some(page) = pages.try_next().await.map_err(|e| e.to_string())? {
                for h in page.hosts() {
                    let Some(host_id) = h.host_id() else { continue };
                    let Some(state) = Self::host_state_from_sdk(h.state()) else { continue };
                    let instance_type = h
                        .host_properties()
                        .and_then(|p| p.instance_type())
                        .unwrap_or_default()
                        .to_string();
                    let available_capacity = h
                        .available_capacity()
                        .and_then(|c| c.available_instance_capacity())
                        .iter()
                        .flat_map(|caps| caps.iter())
                        .find(|c| c.instance_type() == Some(instance_type.as_str()))
                        .and_then(|c| c.available_capacity())
                        .unwrap_or(0) as i64;
                    let instances = h
                        .instances()
                        .iter()
                        .filter_map(|i| i.instance_id().map(|s| s.to_string()))
                        .collect();
                    let allocation_time: DateTime<Utc> = h
                        .allocation_time()
                        .and_then(|t| t.to_chrono_utc().ok())
                        .unwrap_or_else(Utc::now);

                    hosts.push(Host {
                        host_id: host_id.to_string(),
                        availability_zone: h.availability_zone().unwrap_or_default().to_string(),
                        allocation_time,
                        instance_type,
                        instances,
                        available_capacity,
                        state,
                    });
                }
            }
            Ok(hosts)
        })
        .await
    }

    async fn allocate_hosts(
        &self,
        zone: &str,
        instance_type: &str,
        quantity: u32,
        tags: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        with_retry("allocate_hosts", || async {
            let resp = self
                .ec2
                .allocate_hosts()
                .availability_zone(zone)
                .instance_type(instance_type)
                .quantity(quantity as i32)
                .set_tag_specifications(Some(Self::tag_specs(ResourceType::DedicatedHost, tags)))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp.host_ids().to_vec())
        })
        .await
    }

    async fn release_hosts(&self, host_ids: &[String]) -> Result<ReleaseOutcome> {
        with_retry("release_hosts", || async {
            let resp = self
                .ec2
                .release_hosts()
                .set_host_ids(Some(host_ids.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let succeeded = resp.successful().to_vec();
            let unsuccessful = resp
                .unsuccessful()
                .iter()
                .filter_map(|u| {
                    Some(ReleaseFailure {
                        host_id: u.resource_id()?.to_string(),
                        reason: u
                            .error()
                            .and_then(|e| e.message())
                            .unwrap_or("unknown")
                            .to_string(),
                    })
                })
                .collect();
            Ok(ReleaseOutcome { succeeded, unsuccessful })
        })
        .await
    }

    async fn run_instance(&self, spec: &RunInstanceSpec) -> Result<RunInstanceResult> {
        with_retry("run_instance", || async {
            let mut placement = aws_sdk_ec2::types::Placement::builder();
            if spec.tenancy_host {
                placement = placement.tenancy(aws_sdk_ec2::types::Tenancy::Host);
            }
            if let Some(host_id) = &spec.host_id {
                placement = placement.host_id(host_id);
            }

            let mut tag_specs = Self::tag_specs(ResourceType::Instance, &spec.tags);
            let mut block_device_mappings = Vec::new();
            for disk in &spec.disks {
                let mut ebs = aws_sdk_ec2::types::EbsBlockDevice::builder();
                if let Some(snapshot_id) = &disk.snapshot_id {
                    ebs = ebs.snapshot_id(snapshot_id);
                } else {
                    ebs = ebs.volume_size(disk.size_gb as i32);
                }
                ebs = ebs.volume_type(aws_sdk_ec2::types::VolumeType::from(disk.volume_type.as_str()));
                if let Some(iops) = disk.iops {
                    ebs = ebs.iops(iops as i32);
                }
                if let Some(throughput) = disk.throughput {
                    ebs = ebs.throughput(throughput as i32);
                }
                if let Some(kms_key_id) = &disk.kms_key_id {
                    ebs = ebs.encrypted(true).kms_key_id(kms_key_id);
                }
                block_device_mappings.push(
                    aws_sdk_ec2::types::BlockDeviceMapping::builder()
                        .device_name(&disk.device_name)
                        .ebs(ebs.build())
                        .build(),
                );
                if !disk.tags.is_empty() {
                    tag_specs.extend(Self::tag_specs(ResourceType::Volume, &disk.tags));
                }
            }

            let mut req = self
                .ec2
                .run_instances()
                .image_id(&spec.image_id)
                .instance_type(aws_sdk_ec2::types::InstanceType::from(spec.instance_type.as_str()))
                .min_count(1)
                .max_count(1)
                .placement(placement.build())
                .set_block_device_mappings(if block_device_mappings.is_empty() {
                    None
                } else {
                    Some(block_device_mappings)
                })
                .set_tag_specifications(Some(tag_specs));

            if let Some(subnet_id) = &spec.subnet_id {
                req = req.subnet_id(subnet_id);
            }
            if let Some(sg_id) = &spec.security_group_id {
                req = req.security_group_ids(sg_id);
            }
            if let Some(user_data) = &spec.user_data_base64 {
                req = req.user_data(user_data);
            }

            let resp = req.send().await.map_err(|e| e.to_string())?;
            let instance = resp
                .instances()
                .first()
                .ok_or_else(|| "run_instances returned no instances".to_string())?;
            Ok(RunInstanceResult {
                instance_id: instance.instance_id().unwrap_or_default().to_string(),
                private_ip: instance.private_ip_address().map(|s| s.to_string()),
            })
        })
        .await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        with_retry("terminate_instance", || async {
            self.ec2
                .terminate_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceSnapshot>> {
        with_retry("describe_instance", || async {
            let resp = self
                .ec2
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp
                .reservations()
                .iter()
                .flat_map(|r| r.instances())
                .next()
                .map(|i| InstanceSnapshot {
                    state: i
                        .state()
                        .and_then(|s| s.name())
                        .map(|n| n.as_str().to_string())
                        .unwrap_or_default(),
                    private_ip: i.private_ip_address().map(|s| s.to_string()),
                }))
        })
        .await
    }

    async fn describe_active_instances(&self) -> Result<Vec<InstanceInfo>> {
        let filters = vec![Self::filter(
            "instance-state-name",
            vec![
                "pending".into(),
                "running".into(),
                "shutting-down".into(),
                "stopping".into(),
                "stopped".into(),
            ],
        )];
        with_retry("describe_active_instances", || async {
            let mut out = Vec::new();
            let mut pages = self
                .ec2
                .describe_instances()
                .set_filters(Some(filters.clone()))
                .into_paginator()
                .send();
            use futures::stream::TryStreamExt;
            while let Some(page) = pages.try_next().await.map_err(|e| e.to_string())? {
                for reservation in page.reservations() {
                    for i in reservation.instances() {
                        out.push(InstanceInfo {
                            instance_id: i.instance_id().unwrap_or_default().to_string(),
                            instance_type: i.instance_type().map(|t| t.as_str().to_string()).unwrap_or_default(),
                            state: i
                                .state()
                                .and_then(|s| s.name())
                                .map(|n| n.as_str().to_string())
                                .unwrap_or_default(),
                            core_count: i
                                .cpu_options()
                                .and_then(|c| c.core_count())
                                .unwrap_or(0) as i64,
                            threads_per_core: i
                                .cpu_options()
                                .and_then(|c| c.threads_per_core())
                                .unwrap_or(1) as i64,
                        });
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn describe_instance_types(
        &self,
        types: &[String],
    ) -> Result<HashMap<String, InstanceTypeInfo>> {
        with_retry("describe_instance_types", || async {
            let resp = self
                .ec2
                .describe_instance_types()
                .set_instance_types(Some(
                    types
                        .iter()
                        .map(|t| aws_sdk_ec2::types::InstanceType::from(t.as_str()))
                        .collect(),
                ))
                .send()
                .await
                .map_err(|e| e.to_string())?;

            Ok(resp
                .instance_types()
                .iter()
                .filter_map(|t| {
                    let name = t.instance_type()?.as_str().to_string();
                    let vcpu_info = t.v_cpu_info()?;
                    let architecture = t
                        .processor_info()
                        .and_then(|p| p.supported_architectures().first())
                        .map(|a| a.as_str().to_string())
                        .unwrap_or_default();
                    Some((
                        name,
                        InstanceTypeInfo {
                            vcpus: vcpu_info.default_v_cpus().unwrap_or(0) as i64,
                            core_count: vcpu_info.default_cores().unwrap_or(0) as i64,
                            threads_per_core: vcpu_info.default_threads_per_core().unwrap_or(1) as i64,
                            architecture,
                        },
                    ))
                })
                .collect())
        })
        .await
    }

    async fn describe_vpcs(&self, owner_accounts: &[String]) -> Result<Vec<VpcInfo>> {
        let filters = vec![Self::filter("is-default", vec!["true".into()])];
        self.describe_vpcs_filtered(filters, owner_accounts).await
    }

    async fn describe_vpcs_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<VpcInfo>> {
        let filters = vec![Self::filter(&format!("tag:{key}"), vec![value.to_string()])];
        self.describe_vpcs_filtered(filters, owner_accounts).await
    }

    async fn describe_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetInfo>> {
        let filters = vec![Self::filter("vpc-id", vec![vpc_id.to_string()])];
        with_retry("describe_subnets", || async {
            let resp = self
                .ec2
                .describe_subnets()
                .set_filters(Some(filters.clone()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp.subnets().iter().map(subnet_info).collect())
        })
        .await
    }

    async fn describe_subnet(&self, subnet_id: &str, owner_accounts: &[String]) -> Result<Option<SubnetInfo>> {
        with_retry("describe_subnet", || async {
            let resp = self
                .ec2
                .describe_subnets()
                .subnet_ids(subnet_id)
                .set_owners(Some(owner_accounts.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp.subnets().first().map(subnet_info))
        })
        .await
    }

    async fn describe_subnets_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SubnetInfo>> {
        let filters = vec![Self::filter(&format!("tag:{key}"), vec![value.to_string()])];
        with_retry("describe_subnets_by_tag", || async {
            let resp = self
                .ec2
                .describe_subnets()
                .set_filters(Some(filters.clone()))
                .set_owners(Some(owner_accounts.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp.subnets().iter().map(subnet_info).collect())
        })
        .await
    }

    async fn describe_images_by_name(
        &self,
        name: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<ImageInfo>> {
        let filters = vec![
            Self::filter("name", vec![name.to_string()]),
            Self::filter("state", vec!["available".into()]),
        ];
        with_retry("describe_images_by_name", || async {
            let mut out = Vec::new();
            let resp = self
                .ec2
                .describe_images()
                .set_filters(Some(filters.clone()))
                .set_owners(Some(owner_accounts.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            for img in resp.images() {
                out.push(image_info(img));
            }
            Ok(out)
        })
        .await
    }

    async fn describe_public_images_by_architecture_and_date(
        &self,
        architecture: &str,
        creation_date_filter: &str,
    ) -> Result<Vec<ImageInfo>> {
        let filters = vec![
            Self::filter("architecture", vec![architecture.to_string()]),
            Self::filter("state", vec!["available".into()]),
            Self::filter("creation-date", vec![creation_date_filter.to_string()]),
        ];
        with_retry("describe_public_images_by_architecture_and_date", || async {
            let resp = self
                .ec2
                .describe_images()
                .set_filters(Some(filters.clone()))
                .owners("amazon")
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp.images().iter().map(image_info).collect())
        })
        .await
    }

    async fn describe_snapshots_by_tag(
        &self,
        key: &str,
        value: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SnapshotInfo>> {
        let filters = vec![
            Self::filter(&format!("tag:{key}"), vec![value.to_string()]),
            Self::filter("status", vec!["completed".into()]),
        ];
        with_retry("describe_snapshots_by_tag", || async {
            let mut out = Vec::new();
            let mut pages = self
                .ec2
                .describe_snapshots()
                .set_filters(Some(filters.clone()))
                .set_owner_ids(Some(owner_accounts.to_vec()))
                .into_paginator()
                .send();
            use futures::stream::TryStreamExt;
            while let Some(page) = pages.try_next().await.map_err(|e| e.to_string())? {
                for s in page.snapshots() {
                    let Some(snapshot_id) = s.snapshot_id() else { continue };
                    let start_time = s
                        .start_time()
                        .and_then(|t| t.to_chrono_utc().ok())
                        .unwrap_or_else(Utc::now);
                    out.push(SnapshotInfo {
                        snapshot_id: snapshot_id.to_string(),
                        status: s.state().map(|st| st.as_str().to_string()).unwrap_or_default(),
                        start_time,
                        tags: tag_map(Some(s.tags())),
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    async fn describe_security_groups_by_name(
        &self,
        name: &str,
        owner_accounts: &[String],
    ) -> Result<Vec<SecurityGroupInfo>> {
        let filters = vec![Self::filter("group-name", vec![name.to_string()])];
        with_retry("describe_security_groups_by_name", || async {
            let resp = self
                .ec2
                .describe_security_groups()
                .set_filters(Some(filters.clone()))
                .set_owners(Some(owner_accounts.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp
                .security_groups()
                .iter()
                .filter_map(|sg| {
                    Some(SecurityGroupInfo {
                        group_id: sg.group_id()?.to_string(),
                        group_name: sg.group_name().unwrap_or_default().to_string(),
                    })
                })
                .collect())
        })
        .await
    }

    async fn list_kms_aliases(&self) -> Result<Vec<KmsAliasInfo>> {
        with_retry("list_kms_aliases", || async {
            let mut out = Vec::new();
            let mut pages = self.kms.list_aliases().into_paginator().send();
            use futures::stream::TryStreamExt;
            while let Some(page) = pages.try_next().await.map_err(|e| e.to_string())? {
                for alias in page.aliases() {
                    let (Some(alias_name), Some(target_key_id)) =
                        (alias.alias_name(), alias.target_key_id())
                    else {
                        continue;
                    };
                    out.push(KmsAliasInfo {
                        alias_name: alias_name.to_string(),
                        target_key_id: target_key_id.to_string(),
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    async fn list_service_quotas(&self) -> Result<Vec<ServiceQuotaInfo>> {
        with_retry("list_service_quotas", || async {
            let mut out = Vec::new();
            let mut pages = self
                .quotas
                .list_service_quotas()
                .service_code("ec2")
                .into_paginator()
                .send();
            use futures::stream::TryStreamExt;
            while let Some(page) = pages.try_next().await.map_err(|e| e.to_string())? {
                for q in page.quotas() {
                    let Some(name) = q.quota_name() else { continue };
                    let Some(value) = q.value() else { continue };
                    out.push(ServiceQuotaInfo {
                        quota_name: name.to_string(),
                        value,
                    });
                }
            }
            Ok(out)
        })
        .await
    }
}

impl Ec2Client {
    async fn describe_vpcs_filtered(
        &self,
        filters: Vec<Filter>,
        owner_accounts: &[String],
    ) -> Result<Vec<VpcInfo>> {
        with_retry("describe_vpcs", || async {
            let resp = self
                .ec2
                .describe_vpcs()
                .set_filters(Some(filters.clone()))
                .set_owner_ids(Some(owner_accounts.to_vec()))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            Ok(resp
                .vpcs()
                .iter()
                .filter_map(|v| {
                    Some(VpcInfo {
                        vpc_id: v.vpc_id()?.to_string(),
                        is_default: v.is_default().unwrap_or(false),
                        tags: tag_map(Some(v.tags())),
                    })
                })
                .collect())
        })
        .await
    }
}

fn subnet_info(s: &aws_sdk_ec2::types::Subnet) -> SubnetInfo {
    SubnetInfo {
        subnet_id: s.subnet_id().unwrap_or_default().to_string(),
        vpc_id: s.vpc_id().unwrap_or_default().to_string(),
        availability_zone: s.availability_zone().unwrap_or_default().to_string(),
        available_ip_address_count: s.available_ip_address_count().unwrap_or(0) as i64,
        tags: tag_map(Some(s.tags())),
    }
}

fn image_info(img: &aws_sdk_ec2::types::Image) -> ImageInfo {
    ImageInfo {
        image_id: img.image_id().unwrap_or_default().to_string(),
        name: img.name().unwrap_or_default().to_string(),
        state: img.state().map(|s| s.as_str().to_string()).unwrap_or_default(),
        creation_date: img.creation_date().unwrap_or_default().to_string(),
        architecture: img.architecture().map(|a| a.as_str().to_string()).unwrap_or_default(),
    }
}
