//! Lookup & Resolution Helpers (§4.2): turn human-friendly identifiers into
//! provider ids.

use aquarium_aws_core::client::{CloudClient, ImageInfo, ResolvedDisk, SnapshotInfo};
use aquarium_aws_core::helpers::{aws_last_year_filter_values, type_matches};
use aquarium_aws_core::{DiskSpec, Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Result of subnet/VPC resolution: the winning subnet id, and the
/// planner's IP budget (sum of available IPs across the VPC, or the
/// subnet's own count when resolved directly by id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetResolution {
    pub subnet_id: String,
    pub available_ip_count: i64,
}

pub async fn resolve_subnet<C: CloudClient>(
    client: &C,
    selector: &str,
    owner_accounts: &[String],
) -> Result<SubnetResolution> {
    if let Some(rest) = selector.strip_prefix("subnet-") {
        let id = format!("subnet-{rest}");
        let subnet = client
            .describe_subnet(&id, owner_accounts)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subnet {id}")))?;
        if subnet.available_ip_address_count == 0 {
            return Err(Error::NotFound(format!("subnet {id} has no available IPs")));
        }
        return Ok(SubnetResolution {
            subnet_id: subnet.subnet_id,
            available_ip_count: subnet.available_ip_address_count,
        });
    }

    if selector.contains(':') {
        let (key, value) = selector
            .split_once(':')
            .ok_or_else(|| Error::Configuration(format!("invalid tag selector {selector}")))?;
        let vpcs = client.describe_vpcs_by_tag(key, value, owner_accounts).await?;
        if let Some(vpc) = vpcs.first() {
            return resolve_best_subnet_in_vpc(client, &vpc.vpc_id).await;
        }
        let subnets = client.describe_subnets_by_tag(key, value, owner_accounts).await?;
        let subnet = subnets
            .first()
            .ok_or_else(|| Error::NotFound(format!("VPC or subnet tagged {selector}")))?;
        if subnet.available_ip_address_count == 0 {
            return Err(Error::NotFound(format!(
                "subnet {} has no available IPs",
                subnet.subnet_id
            )));
        }
        return Ok(SubnetResolution {
            subnet_id: subnet.subnet_id.clone(),
            available_ip_count: subnet.available_ip_address_count,
        });
    }

    // `vpc-...` or empty: resolve to a VPC (empty -> the default VPC).
    let vpc_id = if let Some(rest) = selector.strip_prefix("vpc-") {
        format!("vpc-{rest}")
    } else {
        let defaults = client.describe_vpcs(owner_accounts).await?;
        defaults
            .first()
            .ok_or_else(|| Error::NotFound("default VPC".into()))?
            .vpc_id
            .clone()
    };
    resolve_best_subnet_in_vpc(client, &vpc_id).await
}

async fn resolve_best_subnet_in_vpc<C: CloudClient>(
    client: &C,
    vpc_id: &str,
) -> Result<SubnetResolution> {
    let subnets = client.describe_subnets(vpc_id).await?;
    let winner = subnets
        .iter()
        .max_by_key(|s| s.available_ip_address_count)
        .ok_or_else(|| Error::NotFound(format!("subnets in VPC {vpc_id}")))?;
    if winner.available_ip_address_count == 0 {
        return Err(Error::NotFound(format!("VPC {vpc_id} has no available IPs")));
    }
    let total: i64 = subnets.iter().map(|s| s.available_ip_address_count).sum();
    Ok(SubnetResolution {
        subnet_id: winner.subnet_id.clone(),
        available_ip_count: total,
    })
}

/// Parses `YYYY-MM-DDTHH:MM:SS.fffZ` as reported by `DescribeImages`.
fn parse_creation_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|d| d.and_utc())
}

pub async fn resolve_image<C: CloudClient>(
    client: &C,
    selector: &str,
    owner_accounts: &[String],
) -> Result<String> {
    if selector.starts_with("ami-") {
        return Ok(selector.to_string());
    }
    let images = client.describe_images_by_name(selector, owner_accounts).await?;
    newest_image(images)
        .map(|img| img.image_id)
        .ok_or_else(|| Error::NotFound(format!("image named {selector}")))
}

fn newest_image(images: Vec<ImageInfo>) -> Option<ImageInfo> {
    images
        .into_iter()
        .filter_map(|img| parse_creation_date(&img.creation_date).map(|d| (d, img)))
        .max_by_key(|(d, _)| *d)
        .map(|(_, img)| img)
}

/// Resolves an image by instance type for scrubbing (§4.6): finds the
/// type's first supported architecture, then scans Amazon-owned public
/// images, walking the `creation-date` filter back one month at a time for
/// up to 10 years, returning the first year with any result.
pub async fn resolve_image_by_instance_type<C: CloudClient>(
    client: &C,
    architecture: &str,
    reference: chrono::NaiveDate,
) -> Result<String> {
    for years_back in 0..10 {
        let reference = reference
            .checked_sub_signed(chrono::Duration::days(365 * years_back))
            .ok_or_else(|| Error::NotFound("date arithmetic overflow".into()))?;
        for month_filter in aws_last_year_filter_values(reference) {
            let images = client
                .describe_public_images_by_architecture_and_date(architecture, &month_filter)
                .await?;
            if let Some(img) = newest_image(images) {
                return Ok(img.image_id);
            }
        }
    }
    Err(Error::NotFound(format!(
        "public image for architecture {architecture} in the last 10 years"
    )))
}

pub async fn resolve_snapshot<C: CloudClient>(
    client: &C,
    selector: &str,
    owner_accounts: &[String],
) -> Result<String> {
    if selector.starts_with("snap-") {
        return Ok(selector.to_string());
    }
    let (key, value) = selector
        .split_once(':')
        .ok_or_else(|| Error::Configuration(format!("snapshot selector must be key:value, got {selector}")))?;
    let snapshots = client.describe_snapshots_by_tag(key, value, owner_accounts).await?;
    newest_snapshot(snapshots)
        .map(|s| s.snapshot_id)
        .ok_or_else(|| Error::NotFound(format!("snapshot tagged {selector}")))
}

fn newest_snapshot(snapshots: Vec<SnapshotInfo>) -> Option<SnapshotInfo> {
    snapshots.into_iter().max_by_key(|s| s.start_time)
}

/// Resolves one `device_name -> DiskSpec` entry (§6 Disk spec) into a
/// [`ResolvedDisk`] ready to attach at `RunInstance` time. `clone`, when
/// set, takes priority over `size_gb`. `kms_key_id` is the already-resolved
/// form of the definition's `encryptKey` (§4.2, §6), applied uniformly to
/// every volume created for the instance.
pub async fn resolve_disk<C: CloudClient>(
    client: &C,
    device_name: &str,
    spec: &DiskSpec,
    owner_accounts: &[String],
    kms_key_id: Option<String>,
) -> Result<ResolvedDisk> {
    let (volume_type, iops, throughput) = spec.parse_type();
    let snapshot_id = match &spec.clone {
        Some(selector) => Some(resolve_snapshot(client, selector, owner_accounts).await?),
        None => None,
    };
    Ok(ResolvedDisk {
        device_name: device_name.to_string(),
        size_gb: spec.size_gb,
        volume_type,
        iops,
        throughput,
        snapshot_id,
        tags: spec.parse_label(),
        kms_key_id,
    })
}

pub async fn resolve_security_group<C: CloudClient>(
    client: &C,
    selector: &str,
    owner_accounts: &[String],
) -> Result<String> {
    if selector.starts_with("sg-") {
        return Ok(selector.to_string());
    }
    let groups = client
        .describe_security_groups_by_name(selector, owner_accounts)
        .await?;
    if groups.len() > 1 {
        tracing::warn!(selector, count = groups.len(), "multiple security groups matched by name");
    }
    groups
        .first()
        .map(|g| g.group_id.clone())
        .ok_or_else(|| Error::NotFound(format!("security group named {selector}")))
}

pub async fn resolve_kms_key<C: CloudClient>(client: &C, selector: &str) -> Result<String> {
    let Some(alias) = selector.strip_prefix("alias/") else {
        return Ok(selector.to_string());
    };
    let aliases = client.list_kms_aliases().await?;
    aliases
        .into_iter()
        .find(|a| a.alias_name == format!("alias/{alias}"))
        .map(|a| a.target_key_id)
        .ok_or_else(|| Error::NotFound(format!("KMS alias {selector}")))
}

/// True iff `instance_type` belongs to the `mac` family (§4.2, §4.5 step 2).
pub fn is_mac_instance_type(instance_type: &str) -> bool {
    type_matches(instance_type, &["mac"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use aquarium_aws_core::client::{SubnetInfo, VpcInfo};
    use std::collections::HashMap;

    fn subnet(id: &str, vpc: &str, ips: i64) -> SubnetInfo {
        SubnetInfo {
            subnet_id: id.into(),
            vpc_id: vpc.into(),
            availability_zone: "us-west-2a".into(),
            available_ip_address_count: ips,
            tags: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn subnet_resolution_picks_largest_and_sums_ips() {
        let client = FakeClient::new();
        client.set_vpcs(vec![VpcInfo { vpc_id: "vpc-1".into(), is_default: true, tags: HashMap::new() }]);
        client.set_subnets(vec![
            subnet("subnet-a", "vpc-1", 5),
            subnet("subnet-b", "vpc-1", 10),
            subnet("subnet-c", "vpc-1", 3),
        ]);

        let resolution = resolve_subnet(&client, "", &[]).await.unwrap();
        assert_eq!(resolution.subnet_id, "subnet-b");
        assert_eq!(resolution.available_ip_count, 18);
    }

    #[tokio::test]
    async fn subnet_by_id_returns_its_own_count() {
        let client = FakeClient::new();
        client.set_subnets(vec![subnet("subnet-z", "vpc-9", 42)]);
        let resolution = resolve_subnet(&client, "subnet-z", &[]).await.unwrap();
        assert_eq!(resolution.available_ip_count, 42);
    }

    #[tokio::test]
    async fn image_ami_id_is_returned_as_is() {
        let client = FakeClient::new();
        assert_eq!(
            resolve_image(&client, "ami-0123456789abcdef0", &[]).await.unwrap(),
            "ami-0123456789abcdef0"
        );
    }

    #[tokio::test]
    async fn snapshot_selector_must_contain_colon() {
        let client = FakeClient::new();
        assert!(resolve_snapshot(&client, "no-colon-here", &[]).await.is_err());
    }

    #[tokio::test]
    async fn kms_alias_passthrough_for_raw_ids() {
        let client = FakeClient::new();
        assert_eq!(resolve_kms_key(&client, "abcd-1234").await.unwrap(), "abcd-1234");
    }

    #[tokio::test]
    async fn kms_alias_resolves_to_target_key_id() {
        use aquarium_aws_core::client::KmsAliasInfo;
        let client = FakeClient::new();
        client.set_kms_aliases(vec![KmsAliasInfo {
            alias_name: "alias/aquarium".into(),
            target_key_id: "key-1234".into(),
        }]);
        assert_eq!(resolve_kms_key(&client, "alias/aquarium").await.unwrap(), "key-1234");
    }

    #[tokio::test]
    async fn unknown_kms_alias_is_not_found() {
        let client = FakeClient::new();
        assert!(resolve_kms_key(&client, "alias/missing").await.is_err());
    }

    #[tokio::test]
    async fn resolve_disk_applies_resolved_kms_key() {
        let client = FakeClient::new();
        let spec = DiskSpec { size_gb: 20, disk_type: String::new(), clone: None, label: String::new() };
        let disk = resolve_disk(&client, "/dev/sdb", &spec, &[], Some("key-1234".to_string()))
            .await
            .unwrap();
        assert_eq!(disk.kms_key_id.as_deref(), Some("key-1234"));
    }
}
