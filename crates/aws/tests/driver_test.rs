//! End-to-end driver tests against the fake cloud client.
//!
//! Run with: cargo test --test driver_test --features test-utils

use aquarium_aws::client::fake::FakeClient;
use aquarium_aws::{AwsDriver, Config};
use aquarium_aws_core::Definition;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn config() -> Config {
    Config {
        region: "us-west-2".into(),
        key_id: "k".into(),
        secret_key: "s".into(),
        account_ids: Vec::new(),
        instance_tags: HashMap::new(),
        dedicated_pool: HashMap::new(),
        image_create_wait: Duration::from_secs(600),
    }
}

fn definition(instance_type: &str) -> Definition {
    Definition {
        instance_type: instance_type.to_string(),
        cpu: 4,
        image: "ami-0123456789abcdef0".to_string(),
        security_group: String::new(),
        subnet: String::new(),
        disks: HashMap::new(),
        encrypt_key: String::new(),
        tags: HashMap::new(),
        userdata_format: None,
        userdata_prefix: String::new(),
        pool: String::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn allocate_status_deallocate_round_trip() {
    let client = Arc::new(FakeClient::new());
    let driver = AwsDriver::prepare_with_client(config(), client)
        .await
        .expect("prepare should succeed against a fake client");

    let resource = driver
        .allocate(&definition("c6a.4xlarge"), &HashMap::new())
        .await
        .expect("allocate should succeed");
    assert!(resource.identifier.starts_with("i-fake-"));

    assert_eq!(
        driver.status(&resource).await.unwrap(),
        aquarium_aws::ResourceStatus::Allocated
    );

    driver.deallocate(&resource).await.unwrap();
    assert_eq!(
        driver.status(&resource).await.unwrap(),
        aquarium_aws::ResourceStatus::None
    );
}

#[tokio::test(start_paused = true)]
async fn validate_definition_requires_instance_type() {
    let client = Arc::new(FakeClient::new());
    let driver = AwsDriver::prepare_with_client(config(), client).await.unwrap();

    let mut def = definition("c6a.4xlarge");
    def.instance_type = String::new();
    assert!(driver.validate_definition(&def).is_err());
}

#[tokio::test(start_paused = true)]
async fn available_capacity_is_minus_one_for_unknown_family() {
    let client = Arc::new(FakeClient::new());
    let driver = AwsDriver::prepare_with_client(config(), client).await.unwrap();

    let capacity = driver
        .available_capacity(&definition("zz.garbage"))
        .await
        .unwrap();
    assert_eq!(capacity, -1);
}
