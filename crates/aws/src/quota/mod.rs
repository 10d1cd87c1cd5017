//! Process-wide EC2 service-quota cache (§4.3).

use aquarium_aws_core::{CloudClient, QuotaBucket, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

struct Inner {
    values: HashMap<&'static str, i64>,
    next_update: Instant,
}

/// Mutex-guarded mapping from named EC2 service-quota to limit, refreshed
/// at most every 30 minutes unless a caller forces it.
pub struct QuotaCache<C: CloudClient> {
    client: Arc<C>,
    inner: Mutex<Inner>,
}

impl<C: CloudClient> QuotaCache<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                next_update: Instant::now(),
            }),
        }
    }

    /// Current cached limit for `bucket`, in vCPUs. `0` if never observed.
    pub async fn get(&self, bucket: QuotaBucket) -> i64 {
        let inner = self.inner.lock().await;
        *inner.values.get(bucket.quota_name()).unwrap_or(&0)
    }

    /// Refreshes the cache unless `!force` and the last refresh is still fresh.
    pub async fn refresh(&self, force: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !force && Instant::now() < inner.next_update {
            return Ok(());
        }

        let quotas = self.client.list_service_quotas().await?;
        let allow_list: HashMap<&'static str, QuotaBucket> = QuotaBucket::ALL
            .into_iter()
            .map(|bucket| (bucket.quota_name(), bucket))
            .collect();

        for quota in quotas {
            if let Some(bucket) = allow_list.get(quota.quota_name.as_str()) {
                inner.values.insert(bucket.quota_name(), quota.value.floor() as i64);
            }
        }
        inner.next_update = Instant::now() + REFRESH_INTERVAL;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;

    #[tokio::test(start_paused = true)]
    async fn refresh_is_rate_limited() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 256.0);
        let cache = QuotaCache::new(client.clone());

        cache.refresh(false).await.unwrap();
        assert_eq!(cache.get(QuotaBucket::Standard).await, 256);

        client.set_quota(QuotaBucket::Standard.quota_name(), 512.0);
        cache.refresh(false).await.unwrap();
        // still within the 30 minute window, so stale value sticks.
        assert_eq!(cache.get(QuotaBucket::Standard).await, 256);

        cache.refresh(true).await.unwrap();
        assert_eq!(cache.get(QuotaBucket::Standard).await, 512);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_after_interval_elapses() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 100.0);
        let cache = QuotaCache::new(client.clone());
        cache.refresh(false).await.unwrap();

        client.set_quota(QuotaBucket::Standard.quota_name(), 200.0);
        tokio::time::advance(REFRESH_INTERVAL + Duration::from_secs(1)).await;
        cache.refresh(false).await.unwrap();
        assert_eq!(cache.get(QuotaBucket::Standard).await, 200);
    }

    #[tokio::test]
    async fn floors_fractional_quota_values() {
        let client = Arc::new(FakeClient::new());
        client.set_quota(QuotaBucket::Standard.quota_name(), 255.9);
        let cache = QuotaCache::new(client);
        cache.refresh(true).await.unwrap();
        assert_eq!(cache.get(QuotaBucket::Standard).await, 255);
    }
}
