// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared fakes and harness for integration tests.

use activity_sync::config::Config;
use activity_sync::db::{BlobStore, MemoryBlobStore};
use activity_sync::error::{Result, SyncError};
use activity_sync::models::{
    ActivityRecord, ActivityType, ApiVersion, ProviderType, SensorSample, SensorStreams,
    StatsSummary, StreamType, UploadResult,
};
use activity_sync::providers::{
    ChangeNotifier, Collaborators, PlatformSensorSource, PlatformTaskScheduler,
    RemoteSyncService, SubscriptionHandle,
};
use activity_sync::services::{BlobPreferenceStore, SyncOrchestrator};
use activity_sync::time_utils::ManualClock;
use activity_sync::SyncEngine;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Fixed start time for every test clock.
#[allow(dead_code)]
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn test_clock() -> ManualClock {
    ManualClock::new(test_now())
}

/// Build an activity that started `minutes_ago` before `test_now()`.
#[allow(dead_code)]
pub fn activity(id: &str, provider: ProviderType, minutes_ago: i64) -> ActivityRecord {
    let start = test_now() - Duration::minutes(minutes_ago);
    ActivityRecord {
        id: id.to_string(),
        start,
        end: start + Duration::minutes(30),
        activity_type: ActivityType::Run,
        distance_meters: Some(5000.0),
        duration_seconds: 1800.0,
        provider_origin: provider,
        raw_payload_version: 1,
    }
}

#[allow(dead_code)]
pub fn activities(prefix: &str, provider: ProviderType, count: usize) -> Vec<ActivityRecord> {
    (0..count)
        .map(|i| activity(&format!("{}-{}", prefix, i), provider, 60 * (i as i64 + 1)))
        .collect()
}

#[allow(dead_code)]
pub fn heart_rate_samples(record: &ActivityRecord) -> Vec<SensorSample> {
    (0..3)
        .map(|i| SensorSample {
            timestamp: record.start + Duration::minutes(i),
            value: 120.0 + i as f64,
        })
        .collect()
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}

// ─── Blob store ──────────────────────────────────────────────────────────────

/// Memory-backed blob store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_puts: AtomicBool,
}

#[allow(dead_code)]
impl FlakyBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".to_string()));
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

// ─── Remote service ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCall {
    pub activity_id: String,
    pub has_heart_rate: bool,
    pub api_version: ApiVersion,
}

/// In-memory remote service with per-provider data and fault switches.
#[derive(Default)]
pub struct FakeRemote {
    activities: Mutex<HashMap<ProviderType, Vec<ActivityRecord>>>,
    stats: Mutex<Option<StatsSummary>>,
    pub fetch_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub fail_fetches: AtomicBool,
    pub fail_stats: AtomicBool,
    pub fail_uploads: AtomicBool,
    /// Report every successful upload as missing sensor data
    pub report_incomplete: AtomicBool,
    fetch_delay: Mutex<Option<std::time::Duration>>,
    blocked: Mutex<HashSet<ProviderType>>,
    rejected: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<UploadCall>>,
    /// Signalled every time a fetch starts
    pub fetch_started: Notify,
    release: Notify,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_activities(&self, provider: ProviderType, records: Vec<ActivityRecord>) {
        self.activities.lock().unwrap().insert(provider, records);
    }

    pub fn add_activities(&self, provider: ProviderType, records: Vec<ActivityRecord>) {
        self.activities
            .lock()
            .unwrap()
            .entry(provider)
            .or_default()
            .extend(records);
    }

    pub fn set_stats(&self, stats: StatsSummary) {
        *self.stats.lock().unwrap() = Some(stats);
    }

    pub fn set_fetch_delay(&self, delay: std::time::Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Fetches for `provider` hang until `release_fetches`.
    pub fn block_fetches(&self, provider: ProviderType) {
        self.blocked.lock().unwrap().insert(provider);
    }

    pub fn release_fetches(&self) {
        self.blocked.lock().unwrap().clear();
        self.release.notify_waiters();
    }

    pub fn reject_upload(&self, activity_id: &str) {
        self.rejected.lock().unwrap().insert(activity_id.to_string());
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploads_of(&self, activity_id: &str) -> Vec<UploadCall> {
        self.uploads()
            .into_iter()
            .filter(|u| u.activity_id == activity_id)
            .collect()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn is_blocked(&self, provider: ProviderType) -> bool {
        self.blocked.lock().unwrap().contains(&provider)
    }
}

#[async_trait]
impl RemoteSyncService for FakeRemote {
    async fn fetch_recent_activities(
        &self,
        provider: ProviderType,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.notify_one();

        if self.is_blocked(provider) {
            self.release.notified().await;
        }
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork("connection refused".to_string()));
        }

        let mut records = self
            .activities
            .lock()
            .unwrap()
            .get(&provider)
            .cloned()
            .unwrap_or_default();
        records.truncate(limit);
        Ok(records)
    }

    async fn upload_activity(
        &self,
        record: &ActivityRecord,
        streams: &SensorStreams,
        api_version: ApiVersion,
    ) -> Result<UploadResult> {
        let has_heart_rate = streams
            .get(&StreamType::HeartRate)
            .is_some_and(|s| !s.is_empty());
        self.uploads.lock().unwrap().push(UploadCall {
            activity_id: record.id.clone(),
            has_heart_rate,
            api_version,
        });

        if self.rejected.lock().unwrap().contains(&record.id) {
            return Err(SyncError::UploadRejected {
                activity_id: record.id.clone(),
                reason: "HTTP 422: invalid payload".to_string(),
            });
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork("timeout".to_string()));
        }

        Ok(UploadResult {
            success: true,
            has_complete_sensor_data: has_heart_rate
                && !self.report_incomplete.load(Ordering::SeqCst),
        })
    }

    async fn fetch_stats(&self, _provider: ProviderType, days: u32) -> Result<StatsSummary> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork("connection refused".to_string()));
        }
        Ok(self
            .stats
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| StatsSummary::empty(days)))
    }
}

// ─── Platform sensor source ──────────────────────────────────────────────────

struct FakeSubscription {
    data_type: String,
    notifier: ChangeNotifier,
    active: Arc<AtomicBool>,
}

struct FakeHandle {
    active: Arc<AtomicBool>,
    executed: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl SubscriptionHandle for FakeHandle {
    fn execute(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.executed.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory platform sensor store.
#[derive(Default)]
pub struct FakeSensorSource {
    records: Mutex<Vec<ActivityRecord>>,
    streams: Mutex<HashMap<(String, StreamType), Vec<SensorSample>>>,
    subscriptions: Mutex<Vec<FakeSubscription>>,
    background: Mutex<HashSet<String>>,
    pub deny_authorization: AtomicBool,
    pub reject_background_delivery: AtomicBool,
    pub subscriptions_created: AtomicUsize,
    pub executed: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeSensorSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_record(&self, record: ActivityRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn set_stream(&self, record_id: &str, stream: StreamType, samples: Vec<SensorSample>) {
        self.streams
            .lock()
            .unwrap()
            .insert((record_id.to_string(), stream), samples);
    }

    /// Report a change on every active subscription for `data_type`.
    pub fn fire(&self, data_type: &str) -> usize {
        let subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .iter()
            .filter(|s| s.data_type == data_type && s.active.load(Ordering::SeqCst))
            .filter(|s| s.notifier.send(data_type.to_string()).is_ok())
            .count()
    }

    pub fn active_subscriptions(&self, data_type: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.data_type == data_type && s.active.load(Ordering::SeqCst))
            .count()
    }

    pub fn background_enabled(&self, data_type: &str) -> bool {
        self.background.lock().unwrap().contains(data_type)
    }
}

#[async_trait]
impl PlatformSensorSource for FakeSensorSource {
    async fn request_authorization(&self) -> Result<()> {
        if self.deny_authorization.load(Ordering::SeqCst) {
            return Err(SyncError::AuthorizationDenied("user declined".to_string()));
        }
        Ok(())
    }

    fn subscribe_to_changes(
        &self,
        data_type: &str,
        notifier: ChangeNotifier,
    ) -> Box<dyn SubscriptionHandle> {
        self.subscriptions_created.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(false));
        self.subscriptions.lock().unwrap().push(FakeSubscription {
            data_type: data_type.to_string(),
            notifier,
            active: active.clone(),
        });
        Box::new(FakeHandle {
            active,
            executed: self.executed.clone(),
            stopped: self.stopped.clone(),
        })
    }

    async fn enable_background_delivery(&self, data_type: &str) -> Result<()> {
        if self.reject_background_delivery.load(Ordering::SeqCst) {
            return Err(SyncError::AuthorizationDenied(
                "background delivery not permitted".to_string(),
            ));
        }
        self.background.lock().unwrap().insert(data_type.to_string());
        Ok(())
    }

    async fn disable_background_delivery(&self, data_type: &str) -> Result<()> {
        self.background.lock().unwrap().remove(data_type);
        Ok(())
    }

    async fn fetch_records_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.started_within(start, end))
            .cloned()
            .collect())
    }

    async fn fetch_sensor_stream(
        &self,
        record_id: &str,
        stream: StreamType,
    ) -> Result<Vec<SensorSample>> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(&(record_id.to_string(), stream))
            .cloned()
            .unwrap_or_default())
    }
}

// ─── Platform task scheduler ─────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeTaskScheduler {
    submissions: Mutex<Vec<(String, DateTime<Utc>)>>,
    cancellations: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeTaskScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submissions(&self) -> Vec<(String, DateTime<Utc>)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformTaskScheduler for FakeTaskScheduler {
    async fn submit(&self, task_id: &str, earliest_run: DateTime<Utc>) -> Result<()> {
        self.submissions
            .lock()
            .unwrap()
            .push((task_id.to_string(), earliest_run));
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<()> {
        self.cancellations.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

/// A fully wired engine over fakes.
#[allow(dead_code)]
pub struct Harness {
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
    pub platform: Arc<FakeSensorSource>,
    pub tasks: Arc<FakeTaskScheduler>,
    pub preferences: Arc<BlobPreferenceStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: ManualClock,
}

#[allow(dead_code)]
impl Harness {
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.engine.orchestrator
    }
}

/// Config for integration tests: the in-process loop never fires on its own.
#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        background_interval: std::time::Duration::from_secs(24 * 60 * 60),
        ..Config::test_default()
    }
}

#[allow(dead_code)]
pub async fn harness(provider: ProviderType) -> Harness {
    build_harness(provider, test_config(), true).await
}

/// Harness whose host has no platform sensor store.
#[allow(dead_code)]
pub async fn harness_without_platform(provider: ProviderType) -> Harness {
    build_harness(provider, test_config(), false).await
}

#[allow(dead_code)]
pub async fn build_harness(provider: ProviderType, config: Config, with_platform: bool) -> Harness {
    let blobs = Arc::new(MemoryBlobStore::new());
    let remote = FakeRemote::new();
    let platform = FakeSensorSource::new();
    let tasks = FakeTaskScheduler::new();
    let clock = test_clock();
    let preferences = Arc::new(
        BlobPreferenceStore::open(blobs.clone(), provider)
            .await
            .expect("Failed to open preferences"),
    );

    let collaborators = Collaborators {
        remote: remote.clone(),
        platform: if with_platform {
            Some(platform.clone() as Arc<dyn PlatformSensorSource>)
        } else {
            None
        },
        preferences: preferences.clone(),
        task_scheduler: Some(tasks.clone() as Arc<dyn PlatformTaskScheduler>),
    };

    let engine = SyncEngine::build(
        config,
        collaborators,
        blobs.clone(),
        Arc::new(clock.clone()),
    )
    .await
    .expect("Failed to build engine");

    Harness {
        engine,
        remote,
        platform,
        tasks,
        preferences,
        blobs,
        clock,
    }
}
