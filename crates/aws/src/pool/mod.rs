//! Dedicated-Pool Worker (§4.4): one long-lived agent per configured pool.
//!
//! Keeps an active-hosts view, computes available capacity, reserves and
//! allocates hosts on demand, and periodically releases or scrubs idle
//! hosts under policy.

use crate::placement::scrub_host;
use aquarium_aws_core::client::HostFilter;
use aquarium_aws_core::types::pool_tag_key;
use aquarium_aws_core::{CloudClient, DedicatedPoolRecord, Host, HostState};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;

const REFRESH_MIN_INTERVAL: chrono::Duration = chrono::Duration::seconds(30);
const BACKGROUND_TICK: Duration = Duration::from_secs(10);
const DEFAULT_UPDATE_DELAY: Duration = Duration::from_secs(5 * 60);
const SCRUBBING_FAST_THRESHOLD: Duration = Duration::from_secs(10 * 60);
const INSTANCES_PER_HOST_RETRY: Duration = Duration::from_secs(10);

struct ActiveHosts {
    hosts: HashMap<String, Host>,
    updated_at: DateTime<Utc>,
}

/// One instance per configured pool. Cheap to clone via `Arc`; cloning the
/// `Arc` is how the refresh loop, management loop, and ad-hoc
/// `reserve`/`allocate` callers share the same worker.
pub struct PoolWorker<C: CloudClient> {
    record: DedicatedPoolRecord,
    client: Arc<C>,
    base_tags: HashMap<String, String>,
    active: RwLock<ActiveHosts>,
    pending_available: Mutex<HashMap<String, DateTime<Utc>>>,
    manage_at: Mutex<HashMap<String, DateTime<Utc>>>,
    instances_per_host: i64,
}

impl<C: CloudClient + 'static> PoolWorker<C> {
    /// Blocks until the pool's `instancesPerHost` can be computed (§4.4):
    /// the driver is inoperative without this number, so bad configuration
    /// must not be silently downgraded to a guess.
    pub async fn new(
        record: DedicatedPoolRecord,
        client: Arc<C>,
        base_tags: HashMap<String, String>,
    ) -> Self {
        let instances_per_host = compute_instances_per_host(&record.instance_type, client.as_ref()).await;
        Self {
            record,
            client,
            base_tags,
            active: RwLock::new(ActiveHosts {
                hosts: HashMap::new(),
                updated_at: DateTime::<Utc>::MIN_UTC,
            }),
            pending_available: Mutex::new(HashMap::new()),
            manage_at: Mutex::new(HashMap::new()),
            instances_per_host,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn instance_type(&self) -> &str {
        &self.record.instance_type
    }

    /// Spawns the refresh loop and the management loop as background
    /// tasks, both ticking every 10s, both exiting when `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<()>) {
        let worker = Arc::clone(self);
        let mut rx = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BACKGROUND_TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => worker.refresh_tick().await,
                    _ = rx.changed() => break,
                }
            }
        });

        let worker = Arc::clone(self);
        let mut rx = shutdown;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BACKGROUND_TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => worker.management_tick().await,
                    _ = rx.changed() => break,
                }
            }
        });
    }

    /// §4.4 "Public operations": `AvailableCapacity`.
    pub async fn available_capacity(&self, instance_type: &str) -> i64 {
        if instance_type != self.record.instance_type {
            tracing::warn!(
                pool = %self.record.name,
                requested = instance_type,
                configured = %self.record.instance_type,
                "instance type mismatch for pool capacity query"
            );
            return -1;
        }

        if let Err(e) = self.update_dedicated_hosts().await {
            tracing::warn!(pool = %self.record.name, error = %e, "capacity refresh failed, using last known view");
        }

        let active = self.active.read().await;
        // Only hosts actually in the `available` state contribute capacity;
        // a host pinned to `pending` by the pending-available smoothing
        // overlay reports zero even if the provider's raw counter is nonzero.
        let used: i64 = active
            .hosts
            .values()
            .filter(|h| h.state == HostState::Available)
            .map(|h| h.available_capacity.max(0))
            .sum();
        let headroom = (self.record.max as i64 - active.hosts.len() as i64).max(0) * self.instances_per_host;
        used + headroom
    }

    /// `ReserveHost`: pick a host with spare capacity uniformly at random
    /// and pin it to the local `reserved` state.
    pub async fn reserve_host(&self, instance_type: &str) -> (String, String) {
        if instance_type != self.record.instance_type {
            return (String::new(), String::new());
        }
        let mut active = self.active.write().await;
        let candidates: Vec<String> = active
            .hosts
            .iter()
            .filter(|(_, h)| h.has_capacity())
            .map(|(id, _)| id.clone())
            .collect();
        if candidates.is_empty() {
            return (String::new(), String::new());
        }
        let picked = candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
        let zone = {
            let host = active.hosts.get_mut(&picked).expect("picked from active.hosts");
            host.state = HostState::Reserved;
            host.availability_zone.clone()
        };
        (picked, zone)
    }

    /// `AllocateHost`: try each configured zone in order until one succeeds.
    pub async fn allocate_host(&self, instance_type: &str) -> (String, String) {
        if instance_type != self.record.instance_type {
            return (String::new(), String::new());
        }
        {
            let active = self.active.read().await;
            if active.hosts.len() as u32 >= self.record.max {
                return (String::new(), String::new());
            }
        }

        let mut tags = self.base_tags.clone();
        tags.insert("AquariumDedicatedPoolName".to_string(), self.record.name.clone());
        tags.insert(pool_tag_key(&self.record.name), String::new());

        let mut errors = Vec::new();
        for zone in &self.record.zones {
            match self.client.allocate_hosts(zone, instance_type, 1, &tags).await {
                Ok(ids) => {
                    let Some(host_id) = ids.into_iter().next() else { continue };
                    let mut active = self.active.write().await;
                    active.hosts.insert(
                        host_id.clone(),
                        Host {
                            host_id: host_id.clone(),
                            availability_zone: zone.clone(),
                            allocation_time: Utc::now(),
                            instance_type: instance_type.to_string(),
                            instances: Default::default(),
                            available_capacity: 0,
                            state: HostState::Reserved,
                        },
                    );
                    return (host_id, zone.clone());
                }
                Err(e) => errors.push(format!("{zone}: {e}")),
            }
        }
        if !errors.is_empty() {
            tracing::warn!(pool = %self.record.name, errors = ?errors, "failed to allocate host in any configured zone");
        }
        (String::new(), String::new())
    }

    /// `ReserveAllocateHost`: reserve first, fall back to allocating new capacity.
    pub async fn reserve_allocate_host(&self, instance_type: &str) -> (String, String) {
        let (host_id, zone) = self.reserve_host(instance_type).await;
        if !host_id.is_empty() {
            return (host_id, zone);
        }
        self.allocate_host(instance_type).await
    }

    /// Rate-limited refresh of `active_hosts` from the provider (§4.4).
    pub(crate) async fn update_dedicated_hosts(&self) -> aquarium_aws_core::Result<()> {
        {
            let active = self.active.read().await;
            if Utc::now().signed_duration_since(active.updated_at) < REFRESH_MIN_INTERVAL {
                return Ok(());
            }
        }

        let filter = HostFilter {
            states: vec!["available", "under-assessment", "permanent-failure", "pending"],
            availability_zone: None,
            instance_type: Some(self.record.instance_type.clone()),
            tag_key: Some(pool_tag_key(&self.record.name)),
        };
        let hosts = self.client.describe_hosts(&filter).await?;
        let now = Utc::now();

        // Lock order: pendingAvailableMu -> activeHostsMu, never the reverse.
        let mut pending_available = self.pending_available.lock().await;
        let mut active = self.active.write().await;

        if now.signed_duration_since(active.updated_at) < REFRESH_MIN_INTERVAL {
            // another caller refreshed while we were fetching; accept theirs.
            return Ok(());
        }

        let old_states: HashMap<String, HostState> =
            active.hosts.iter().map(|(k, v)| (k.clone(), v.state)).collect();

        let mut new_map = HashMap::with_capacity(hosts.len());
        for mut host in hosts {
            let was_pending_smoothed = pending_available.contains_key(&host.host_id);
            if was_pending_smoothed {
                if host.state != HostState::Available {
                    pending_available.remove(&host.host_id);
                } else {
                    host.state = HostState::Pending;
                }
            } else if host.state == HostState::Available
                && self.record.pending_to_available_delay > Duration::ZERO
                && old_states.get(&host.host_id) == Some(&HostState::Pending)
            {
                let delay = chrono::Duration::from_std(self.record.pending_to_available_delay)
                    .unwrap_or(chrono::Duration::zero());
                pending_available.insert(host.host_id.clone(), now + delay);
                host.state = HostState::Pending;
            }
            new_map.insert(host.host_id.clone(), host);
        }

        active.hosts = new_map;
        active.updated_at = now;
        Ok(())
    }

    /// Promotes hosts whose pending-available timer has expired.
    async fn expire_pending_available(&self) {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut pending_available = self.pending_available.lock().await;
            let expired: Vec<String> = pending_available
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                pending_available.remove(id);
            }
            expired
        };
        if expired.is_empty() {
            return;
        }
        let mut active = self.active.write().await;
        for id in expired {
            if let Some(host) = active.hosts.get_mut(&id) {
                host.state = HostState::Available;
            }
        }
    }

    fn update_delay(&self) -> Duration {
        let scrubbing = self.record.scrubbing_delay;
        if scrubbing > Duration::ZERO && scrubbing < SCRUBBING_FAST_THRESHOLD {
            scrubbing / 2
        } else {
            DEFAULT_UPDATE_DELAY
        }
    }

    async fn refresh_tick(&self) {
        self.expire_pending_available().await;
        let due = {
            let active = self.active.read().await;
            Utc::now().signed_duration_since(active.updated_at)
                > chrono::Duration::from_std(self.update_delay()).unwrap_or(chrono::Duration::zero())
        };
        if due {
            if let Err(e) = self.update_dedicated_hosts().await {
                tracing::warn!(pool = %self.record.name, error = %e, "failed to refresh dedicated hosts view; using last known values");
            }
        }
    }

    /// `manageHosts()` (§4.4): builds the `toRelease` list under the read lock.
    async fn compute_to_release(&self) -> Vec<String> {
        let now = Utc::now();
        let release_delay = chrono::Duration::from_std(self.record.release_delay)
            .unwrap_or(chrono::Duration::zero());
        let is_mac = self.record.is_mac();

        let active = self.active.read().await;
        let mut manage_at = self.manage_at.lock().await;

        let mut to_release = Vec::new();

        // Drop manage_at entries for hosts that disappeared or became used again.
        let stale: Vec<String> = manage_at
            .keys()
            .filter(|id| match active.hosts.get(*id) {
                None => true,
                Some(h) => h.is_used(),
            })
            .cloned()
            .collect();
        for id in &stale {
            manage_at.remove(id);
        }
        for (id, at) in manage_at.iter() {
            if *at <= now {
                to_release.push(id.clone());
            }
        }

        for (host_id, host) in active.hosts.iter() {
            // Ambiguity #1 (§9): permanent-failure releases immediately and
            // skips the rest of this host's processing.
            if host.state == HostState::PermanentFailure {
                to_release.push(host_id.clone());
                continue;
            }
            if host.is_used() {
                continue;
            }
            let too_old = host.age(now) >= release_delay;
            if is_mac && host.state == HostState::Pending && !too_old {
                // scrubbing in progress, let it finish
                continue;
            }
            if manage_at.contains_key(host_id) {
                continue;
            }
            if is_mac && !too_old {
                manage_at.insert(host_id.clone(), now + self.record.scrubbing_delay_chrono());
            } else {
                manage_at.insert(host_id.clone(), now);
            }
        }

        to_release.sort();
        to_release.dedup();
        to_release
    }

    /// `releaseHosts(toRelease)` (§4.4).
    async fn do_release_hosts(&self, to_release: &[String]) {
        let now = Utc::now();
        let release_delay = chrono::Duration::from_std(self.record.release_delay)
            .unwrap_or(chrono::Duration::zero());
        let is_mac = self.record.is_mac();

        let (ready, macs_to_scrub) = {
            let active = self.active.read().await;
            let mut ready = Vec::new();
            let mut macs_to_scrub = Vec::new();
            // Ambiguity #2 (§9): skip to the next outer host_id when a host
            // has already disappeared, never fall through to the wrong branch.
            for host_id in to_release {
                let Some(host) = active.hosts.get(host_id) else {
                    continue;
                };
                if is_host_ready_for_release(host, now, release_delay) {
                    ready.push(host_id.clone());
                } else if is_mac && self.record.scrubbing_delay != Duration::ZERO {
                    macs_to_scrub.push(host_id.clone());
                }
            }
            (ready, macs_to_scrub)
        };

        if !ready.is_empty() {
            match self.client.release_hosts(&ready).await {
                Ok(outcome) => {
                    let mut active = self.active.write().await;
                    for id in &outcome.succeeded {
                        active.hosts.remove(id);
                    }
                    for failure in &outcome.unsuccessful {
                        tracing::warn!(
                            pool = %self.record.name,
                            host_id = %failure.host_id,
                            reason = %failure.reason,
                            "failed to release dedicated host, will retry next cycle"
                        );
                    }
                }
                Err(e) => tracing::warn!(pool = %self.record.name, error = %e, "release_hosts call failed"),
            }
        }

        for host_id in macs_to_scrub {
            let instance_type = {
                let mut active = self.active.write().await;
                match active.hosts.remove(&host_id) {
                    Some(mut host) => {
                        host.state = HostState::Reserved;
                        host.instance_type
                    }
                    None => continue,
                }
            };
            let client = Arc::clone(&self.client);
            let pool_name = self.record.name.clone();
            let host_id_for_task = host_id.clone();
            tokio::spawn(async move {
                if let Err(e) = scrub_host(client.as_ref(), &host_id_for_task, &instance_type).await {
                    tracing::error!(pool = %pool_name, host_id = %host_id_for_task, error = %e, "scrub failed");
                }
            });
        }
    }

    async fn management_tick(&self) {
        let to_release = self.compute_to_release().await;
        if !to_release.is_empty() {
            self.do_release_hosts(&to_release).await;
        }
    }
}

impl DedicatedPoolRecord {
    fn scrubbing_delay_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.scrubbing_delay).unwrap_or(chrono::Duration::zero())
    }
}

/// §4.4 release eligibility.
fn is_host_ready_for_release(host: &Host, now: DateTime<Utc>, release_delay: chrono::Duration) -> bool {
    let too_old = host.age(now) >= release_delay;
    if !host.is_used() {
        return too_old;
    }
    host.state == HostState::Pending && too_old
}

async fn compute_instances_per_host<C: CloudClient>(instance_type: &str, client: &C) -> i64 {
    if instance_type.ends_with(".metal") {
        return 1;
    }
    let family = instance_type.split('.').next().unwrap_or(instance_type);
    let metal_type = format!("{family}.metal");

    loop {
        match client
            .describe_instance_types(&[instance_type.to_string(), metal_type.clone()])
            .await
        {
            Ok(map) => {
                if let (Some(t), Some(m)) = (map.get(instance_type), map.get(&metal_type)) {
                    if t.vcpus > 0 {
                        return (m.vcpus / t.vcpus).max(1);
                    }
                }
                tracing::warn!(
                    instance_type,
                    metal_type,
                    "instance type metadata incomplete, retrying in 10s"
                );
            }
            Err(e) => {
                tracing::warn!(instance_type, error = %e, "failed to fetch instance type metadata, retrying in 10s");
            }
        }
        tokio::time::sleep(INSTANCES_PER_HOST_RETRY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use std::collections::HashSet;

    fn pool_record(max: u32, scrubbing: Duration, release: Duration) -> DedicatedPoolRecord {
        DedicatedPoolRecord {
            name: "macbuilders".into(),
            instance_type: "mac2.metal".into(),
            zones: vec!["us-west-2a".into(), "us-west-2b".into()],
            max,
            scrubbing_delay: scrubbing,
            release_delay: release,
            pending_to_available_delay: Duration::ZERO,
        }
    }

    async fn worker(max: u32, scrubbing: Duration, release: Duration) -> (Arc<PoolWorker<FakeClient>>, Arc<FakeClient>) {
        let client = Arc::new(FakeClient::new());
        // mac2.metal is already ".metal" so no instance-type lookup is needed.
        let w = PoolWorker::new(pool_record(max, scrubbing, release), client.clone(), HashMap::new()).await;
        (Arc::new(w), client)
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_mac_pool_sizing() {
        let (w, client) = worker(3, Duration::from_secs(25 * 3600), Duration::from_secs(24 * 3600)).await;

        assert_eq!(w.available_capacity("mac2.metal").await, 3);

        let (host_id, zone) = w.reserve_allocate_host("mac2.metal").await;
        assert!(!host_id.is_empty());
        assert_eq!(zone, "us-west-2a");
        assert_eq!(client.hosts.lock().unwrap().len(), 1);

        // The newly allocated host is locally reserved until the next
        // refresh; a second immediate request must allocate again rather
        // than double-booking it.
        tokio::time::advance(Duration::from_secs(31)).await;
        // Simulate the provider now reporting the host as available with capacity.
        {
            let mut hosts = client.hosts.lock().unwrap();
            for h in hosts.iter_mut() {
                h.state = HostState::Available;
                h.available_capacity = 1;
            }
        }
        assert_eq!(w.available_capacity("mac2.metal").await, 3, "1 slot on the real host plus 2 headroom slots under max=3");
        let (host_id_2, _) = w.reserve_allocate_host("mac2.metal").await;
        assert_eq!(host_id_2, host_id);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_24h_floor_blocks_early_release() {
        let (w, client) = worker(3, Duration::from_secs(3600), Duration::from_secs(24 * 3600)).await;
        client.push_host(Host {
            host_id: "h-young".into(),
            availability_zone: "us-west-2a".into(),
            allocation_time: Utc::now() - chrono::Duration::hours(2),
            instance_type: "mac2.metal".into(),
            instances: HashSet::new(),
            available_capacity: 1,
            state: HostState::Available,
        });
        w.update_dedicated_hosts().await.unwrap();

        let to_release = w.compute_to_release().await;
        assert!(to_release.is_empty(), "must not schedule release before 24h elapse");

        w.do_release_hosts(&["h-young".to_string()]).await;
        assert!(client.hosts.lock().unwrap().iter().any(|h| h.host_id == "h-young"));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_scrubbing_recycle() {
        let (w, client) = worker(3, Duration::from_secs(3600), Duration::from_secs(24 * 3600)).await;
        client.push_host(Host {
            host_id: "h-old".into(),
            availability_zone: "us-west-2a".into(),
            allocation_time: Utc::now() - chrono::Duration::hours(26),
            instance_type: "mac2.metal".into(),
            instances: HashSet::new(),
            available_capacity: 1,
            state: HostState::Available,
        });
        w.update_dedicated_hosts().await.unwrap();

        let first = w.compute_to_release().await;
        assert!(first.is_empty(), "first cycle only schedules manage_at, doesn't release yet");

        tokio::time::advance(Duration::from_secs(3600) + Duration::from_secs(1)).await;
        let second = w.compute_to_release().await;
        assert_eq!(second, vec!["h-old".to_string()]);

        w.do_release_hosts(&second).await;
        assert!(!client.hosts.lock().unwrap().iter().any(|h| h.host_id == "h-old"));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_pending_to_available_smoothing() {
        let client = Arc::new(FakeClient::new());
        let mut record = pool_record(3, Duration::ZERO, Duration::from_secs(24 * 3600));
        record.pending_to_available_delay = Duration::from_secs(5 * 60);
        let w = Arc::new(PoolWorker::new(record, client.clone(), HashMap::new()).await);

        client.push_host(Host {
            host_id: "h-flap".into(),
            availability_zone: "us-west-2a".into(),
            allocation_time: Utc::now() - chrono::Duration::hours(30),
            instance_type: "mac2.metal".into(),
            instances: HashSet::new(),
            available_capacity: 0,
            state: HostState::Pending,
        });
        w.update_dedicated_hosts().await.unwrap();

        // Provider now reports it available.
        {
            let mut hosts = client.hosts.lock().unwrap();
            hosts[0].state = HostState::Available;
            hosts[0].available_capacity = 1;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        w.update_dedicated_hosts().await.unwrap();
        assert_eq!(w.available_capacity("mac2.metal").await, 0, "still smoothing, no capacity yet");

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        w.refresh_tick().await;
        assert!(w.available_capacity("mac2.metal").await >= 1);
    }
}
