// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Top-level sync coordinator.
//!
//! Owns the provider workflow state machine and drives every other
//! component:
//! 1. `initialize` authorizes and observes (platform provider) or just
//!    schedules pulls (cloud providers)
//! 2. `load_activities` publishes the cache first and refreshes it in the
//!    background, or fetches blocking when the cache is empty
//! 3. `refresh` / `force_refresh` overwrite the cache from the remote service
//! 4. `handle_new_record_event` uploads fresh platform records, then reloads
//! 5. `switch_provider` stops everything, wipes local data and starts over
//!
//! A stopped workflow (before `initialize`, after a denied authorization,
//! a wipe or shutdown) serves cached data but never talks to the remote
//! service; only a successful `initialize` leaves Stopped.
//!
//! Every cache write is fenced by the provider session generation. A
//! provider switch bumps the generation under the session write lock, so a
//! task that started under the old provider can never write into the new
//! provider's cache, even if it slipped past cancellation.

use crate::config::{Config, BACKGROUND_TASK_ID, WORKOUT_OBSERVER_TYPE};
use crate::db::{keys, SharedBlobStore};
use crate::error::{Result, SyncError};
use crate::events::{ChangeReason, EventBus, SyncEvent};
use crate::models::{ActivityRecord, ProviderType, StatsSummary};
use crate::providers::{
    Collaborators, PlatformSensorSource, PreferenceStore, RemoteSyncService,
};
use crate::services::coordinator::{RunOptions, RunOutcome, TaskCoordinator, TaskStatus};
use crate::services::scheduler::{AppLifecycle, BackgroundSyncScheduler, SyncHandler};
use crate::services::upload::{UploadPipeline, UploadSummary};
use crate::services::{SensorObserverRegistry, TtlCacheStore, UploadLedger};
use crate::time_utils::{to_chrono, SharedClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Operation ids registered with the task coordinator.
pub mod task_ids {
    pub const LOAD: &str = "load";
    pub const BACKGROUND_REFRESH: &str = "background_refresh";
    pub const USER_REFRESH: &str = "user_refresh";
    pub const FORCE_REFRESH: &str = "force_refresh";
    pub const NEW_RECORD_EVENT: &str = "new_record_event";
    pub const UPLOAD_SWEEP: &str = "upload_sweep";
    pub const STATS: &str = "stats";
}

/// Provider workflow state. Exactly one is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderWorkflowState {
    Stopped,
    Authorizing,
    Observing,
    Syncing,
    Idle,
}

impl ProviderWorkflowState {
    /// Stopped → Authorizing → Observing → Syncing ⇄ Idle, with cloud
    /// providers going straight from Stopped to Idle. Any state may stop.
    pub fn can_transition_to(self, next: ProviderWorkflowState) -> bool {
        use ProviderWorkflowState::*;
        matches!(
            (self, next),
            (_, Stopped)
                | (Stopped, Authorizing)
                | (Stopped, Idle)
                | (Authorizing, Observing)
                | (Observing, Syncing)
                | (Observing, Idle)
                | (Syncing, Idle)
                | (Idle, Syncing)
        )
    }
}

/// Observable state published to the UI layer.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub provider: ProviderType,
    pub state: ProviderWorkflowState,
    pub workouts: Arc<Vec<ActivityRecord>>,
    pub is_loading: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Non-blocking, user-facing error from the last failed sync
    pub sync_error: Option<String>,
}

struct Session {
    generation: u64,
    provider: ProviderType,
}

enum CacheWrite {
    Save(Vec<ActivityRecord>),
    Replace(Vec<ActivityRecord>),
    Merge(Vec<ActivityRecord>),
}

/// Top-level coordinator of the sync engine.
pub struct SyncOrchestrator {
    weak_self: Weak<SyncOrchestrator>,
    config: Config,
    clock: SharedClock,
    remote: Arc<dyn RemoteSyncService>,
    platform: Option<Arc<dyn PlatformSensorSource>>,
    preferences: Arc<dyn PreferenceStore>,
    events: EventBus,
    coordinator: TaskCoordinator,
    registry: Option<SensorObserverRegistry>,
    ledger: Arc<UploadLedger>,
    uploads: Option<UploadPipeline>,
    activities: TtlCacheStore<Vec<ActivityRecord>>,
    stats: TtlCacheStore<StatsSummary>,
    scheduler: BackgroundSyncScheduler,
    session: RwLock<Session>,
    snapshot: watch::Sender<SyncSnapshot>,
    active_syncs: AtomicUsize,
    /// Set by every record event; the running handler re-reads the
    /// platform window until it is clear.
    record_event_pending: AtomicBool,
    lifetime: CancellationToken,
}

impl SyncOrchestrator {
    /// Build the orchestrator and every component it owns.
    pub async fn new(
        config: Config,
        collaborators: Collaborators,
        blobs: SharedBlobStore,
        events: EventBus,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        let activities = TtlCacheStore::open(
            blobs.clone(),
            keys::ACTIVITIES,
            config.activity_cache_ttl,
            clock.clone(),
        )
        .await?;
        let stats = TtlCacheStore::open(
            blobs.clone(),
            keys::STATS,
            config.stats_cache_ttl,
            clock.clone(),
        )
        .await?;
        let ledger =
            Arc::new(UploadLedger::open(blobs, config.retry_deadline, clock.clone()).await?);

        let registry = collaborators
            .platform
            .clone()
            .map(SensorObserverRegistry::new);
        let uploads = collaborators.platform.clone().map(|platform| {
            UploadPipeline::new(
                collaborators.remote.clone(),
                platform,
                ledger.clone(),
                clock.clone(),
                config.api_version,
                config.retry_min_delay,
            )
        });
        let scheduler = BackgroundSyncScheduler::new(
            collaborators.task_scheduler.clone(),
            clock.clone(),
            BACKGROUND_TASK_ID,
            config.background_interval,
            config.background_budget,
        );

        let provider = collaborators.preferences.current_provider().await?;
        let (snapshot, _) = watch::channel(SyncSnapshot {
            provider,
            state: ProviderWorkflowState::Stopped,
            workouts: Arc::new(Vec::new()),
            is_loading: false,
            last_sync_time: activities.saved_at().await,
            sync_error: None,
        });

        Ok(Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            clock,
            remote: collaborators.remote,
            platform: collaborators.platform,
            preferences: collaborators.preferences,
            events,
            coordinator: TaskCoordinator::new(),
            registry,
            ledger,
            uploads,
            activities,
            stats,
            scheduler,
            session: RwLock::new(Session {
                generation: 0,
                provider,
            }),
            snapshot,
            active_syncs: AtomicUsize::new(0),
            record_event_pending: AtomicBool::new(false),
            lifetime: CancellationToken::new(),
        }))
    }

    // ─── Observable state ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn workouts(&self) -> Arc<Vec<ActivityRecord>> {
        self.snapshot.borrow().workouts.clone()
    }

    pub fn state(&self) -> ProviderWorkflowState {
        self.snapshot.borrow().state
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot.borrow().is_loading
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot.borrow().last_sync_time
    }

    pub fn sync_error(&self) -> Option<String> {
        self.snapshot.borrow().sync_error.clone()
    }

    pub fn ledger(&self) -> &UploadLedger {
        &self.ledger
    }

    pub fn activity_cache(&self) -> &TtlCacheStore<Vec<ActivityRecord>> {
        &self.activities
    }

    pub fn observers(&self) -> Option<&SensorObserverRegistry> {
        self.registry.as_ref()
    }

    pub fn scheduler(&self) -> &BackgroundSyncScheduler {
        &self.scheduler
    }

    // ─── Workflow ────────────────────────────────────────────────────────────

    /// Start the workflow for the configured provider.
    pub async fn initialize(&self) -> Result<()> {
        let provider = self.preferences.current_provider().await?;
        {
            let mut session = self.session.write().await;
            session.provider = provider;
        }
        self.snapshot.send_modify(|s| s.provider = provider);

        tracing::info!(provider = %provider, "Initializing sync workflow");

        if provider == ProviderType::PlatformSensor {
            self.start_platform_workflow().await?;
        } else {
            // Cloud providers sync to the remote service on their own.
            self.set_state(ProviderWorkflowState::Idle);
        }

        if let Some(this) = self.weak_self.upgrade() {
            self.scheduler.start(this).await;
        }
        Ok(())
    }

    async fn start_platform_workflow(&self) -> Result<()> {
        let (Some(platform), Some(registry)) = (&self.platform, &self.registry) else {
            let err = SyncError::ProviderUnavailable(ProviderType::PlatformSensor.to_string());
            self.set_state(ProviderWorkflowState::Stopped);
            self.publish_error(&err, false);
            return Err(err);
        };

        self.set_state(ProviderWorkflowState::Authorizing);
        if let Err(e) = platform.request_authorization().await {
            tracing::warn!(error = %e, "Platform authorization failed");
            self.set_state(ProviderWorkflowState::Stopped);
            self.publish_error(&e, false);
            return Err(e);
        }

        let (notifier, changes) = mpsc::unbounded_channel();
        for data_type in &self.config.observed_types {
            let platform = Arc::clone(platform);
            let notifier = notifier.clone();
            let subscribed_type = data_type.clone();
            registry
                .register_observer(
                    data_type,
                    move || platform.subscribe_to_changes(&subscribed_type, notifier),
                    data_type == WORKOUT_OBSERVER_TYPE,
                )
                .await;
        }
        drop(notifier);

        self.set_state(ProviderWorkflowState::Observing);
        self.spawn_change_listener(changes);
        self.spawn_upload_sweep();
        Ok(())
    }

    /// Load the activity list, cache first.
    ///
    /// Concurrent callers share one in-flight load.
    pub async fn load_activities(&self) -> Result<()> {
        self.load_with_reason(ChangeReason::InitialCache).await
    }

    async fn load_with_reason(&self, reason: ChangeReason) -> Result<()> {
        let (generation, provider) = self.session_info().await;

        let result = self
            .coordinator
            .run(task_ids::LOAD, RunOptions::wait(), async {
                self.set_loading(true);
                self.load_inner(generation, provider, reason).await
            })
            .await;
        self.set_loading(false);

        match result {
            Ok(RunOutcome::Joined(TaskStatus::Failed(msg))) => {
                tracing::debug!(error = %msg, "Joined load failed");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_cancellation() => {
                tracing::debug!("Load cancelled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_inner(
        &self,
        generation: u64,
        provider: ProviderType,
        reason: ChangeReason,
    ) -> Result<()> {
        // Track A: whatever is cached, fresh or not.
        if let Some(cached) = self.activities.load().await.filter(|c| !c.is_empty()) {
            let saved_at = self.activities.saved_at().await;
            self.publish_cached(generation, cached, reason, saved_at)
                .await?;

            // Track B: refresh in the background unless one is pending.
            if self.is_running() && !self.coordinator.is_in_flight(task_ids::BACKGROUND_REFRESH) {
                self.spawn_background_refresh(generation, provider);
            }
            return Ok(());
        }

        // Nothing cached: fetch blocking.
        self.ensure_running(provider)?;
        self.begin_sync();
        let fetched = self
            .remote
            .fetch_recent_activities(provider, self.config.fetch_limit)
            .await;
        self.end_sync();

        match fetched {
            Ok(records) => {
                self.commit(generation, CacheWrite::Save(records), reason)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.publish_error(&e, false);
                Err(e)
            }
        }
    }

    fn spawn_background_refresh(&self, generation: u64, provider: ProviderType) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        self.coordinator
            .spawn(task_ids::BACKGROUND_REFRESH, async move {
                this.background_refresh(generation, provider).await
            });
    }

    /// Pull from the remote service and merge. Failures never touch the
    /// published workouts.
    async fn background_refresh(&self, generation: u64, provider: ProviderType) -> Result<()> {
        if !self.is_running() {
            tracing::debug!(provider = %provider, "Workflow stopped, skipping background refresh");
            return Ok(());
        }
        self.begin_sync();
        let fetched = self
            .remote
            .fetch_recent_activities(provider, self.config.fetch_limit)
            .await;
        self.end_sync();

        match fetched {
            Ok(records) => {
                let merged = self
                    .commit(generation, CacheWrite::Merge(records), ChangeReason::BackgroundUpdate)
                    .await?;
                tracing::debug!(merged, provider = %provider, "Background refresh finished");
                Ok(())
            }
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, provider = %provider, "Background refresh failed, keeping cache");
                self.publish_error(&e, true);
                Ok(())
            }
        }
    }

    /// User-initiated refresh. Returns `false` if the call was absorbed by
    /// the cooldown or by a refresh already in flight.
    pub async fn refresh(&self) -> Result<bool> {
        let (generation, provider) = self.session_info().await;
        self.ensure_running(provider)?;
        let options = RunOptions::drop_duplicate().with_cooldown(self.config.refresh_cooldown);

        let result = self
            .coordinator
            .run(
                task_ids::USER_REFRESH,
                options,
                self.fetch_and_replace(generation, provider, ChangeReason::UserRefresh),
            )
            .await;

        match result {
            Ok(RunOutcome::Completed(())) => Ok(true),
            Ok(RunOutcome::Throttled { retry_after }) => {
                tracing::debug!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Refresh ignored during cooldown"
                );
                Ok(false)
            }
            Ok(_) => Ok(false),
            Err(e) if e.is_cancellation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// System-triggered refresh that bypasses the cooldown.
    pub async fn force_refresh(&self) -> Result<()> {
        let (generation, provider) = self.session_info().await;
        self.ensure_running(provider)?;

        let result = self
            .coordinator
            .run(
                task_ids::FORCE_REFRESH,
                RunOptions::wait(),
                self.fetch_and_replace(generation, provider, ChangeReason::ForceRefresh),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_and_replace(
        &self,
        generation: u64,
        provider: ProviderType,
        reason: ChangeReason,
    ) -> Result<()> {
        self.set_loading(true);
        self.begin_sync();
        let fetched = self
            .remote
            .fetch_recent_activities(provider, self.config.fetch_limit)
            .await;
        self.end_sync();
        self.set_loading(false);

        match fetched {
            Ok(records) => {
                self.commit(generation, CacheWrite::Replace(records), reason)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.publish_error(&e, false);
                Err(e)
            }
        }
    }

    /// Switch the active provider.
    ///
    /// Strictly ordered: stop the old workflow, wipe cache and ledger,
    /// persist the preference, then initialize the new provider. The new
    /// provider's cache is empty when this returns.
    pub async fn switch_provider(&self, new_provider: ProviderType) -> Result<()> {
        let mut session = self.session.write().await;
        let old_provider = session.provider;
        if old_provider == new_provider {
            tracing::debug!(provider = %new_provider, "Provider unchanged, nothing to switch");
            return Ok(());
        }

        tracing::info!(from = %old_provider, to = %new_provider, "Switching provider");

        session.generation += 1;
        self.stop_workflow().await;
        self.wipe_stores().await?;
        self.preferences.set_current_provider(new_provider).await?;
        session.provider = new_provider;
        self.snapshot.send_modify(|s| {
            s.provider = new_provider;
            s.workouts = Arc::new(Vec::new());
            s.is_loading = false;
            s.last_sync_time = None;
            s.sync_error = None;
        });
        drop(session);

        self.events.publish(SyncEvent::ProviderChanged {
            from: old_provider,
            to: new_provider,
        });

        self.initialize().await
    }

    /// Observer callback: a platform record of `data_type` changed.
    pub async fn handle_new_record_event(&self, data_type: &str) -> Result<()> {
        let (generation, provider) = self.session_info().await;
        if provider != ProviderType::PlatformSensor {
            tracing::debug!(data_type, "Ignoring sensor event for inactive platform provider");
            return Ok(());
        }
        let (Some(platform), Some(uploads)) = (&self.platform, &self.uploads) else {
            return Ok(());
        };
        if !self.is_running() {
            tracing::debug!(data_type, "Workflow stopped, ignoring sensor event");
            return Ok(());
        }

        tracing::info!(data_type, "New record event");

        // Events that arrive while a handler runs are coalesced into it.
        self.record_event_pending.store(true, Ordering::SeqCst);
        loop {
            let result = self
                .coordinator
                .run(
                    task_ids::NEW_RECORD_EVENT,
                    RunOptions::drop_duplicate(),
                    async {
                        while self.record_event_pending.swap(false, Ordering::SeqCst) {
                            let now = self.clock.now();
                            let records = platform
                                .fetch_records_in_range(
                                    now - to_chrono(self.config.recent_window),
                                    now,
                                )
                                .await?;
                            let summary = uploads.upload_pending(&records).await?;
                            tracing::debug!(?summary, "New record upload pass finished");
                        }
                        self.ensure_session(generation).await?;
                        self.load_with_reason(ChangeReason::NewRecordSynced).await
                    },
                )
                .await;

            match result {
                Ok(RunOutcome::Completed(())) => {}
                Ok(_) => return Ok(()),
                Err(e) if e.is_cancellation() => {
                    tracing::debug!("New record event cancelled");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            // An event that raced the end of the run is handled here.
            if !self.record_event_pending.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Cache-first stats aggregate.
    ///
    /// Falls back to the stale aggregate, then to one computed from cached
    /// activities, when the remote service is unreachable.
    pub async fn load_stats(&self) -> Result<StatsSummary> {
        if let Some(fresh) = self.stats.load_if_fresh().await {
            return Ok(fresh);
        }

        let (generation, provider) = self.session_info().await;
        let days = self.config.stats_days;
        if !self.is_running() {
            return Ok(self.local_stats(days).await);
        }

        let result = self
            .coordinator
            .run(task_ids::STATS, RunOptions::wait(), async {
                match self.remote.fetch_stats(provider, days).await {
                    Ok(stats) => {
                        let session = self.session.read().await;
                        if session.generation != generation {
                            return Err(SyncError::Cancelled);
                        }
                        self.stats.save(stats.clone()).await?;
                        Ok(stats)
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Stats fetch failed, using local data");
                        Ok(self.local_stats(days).await)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        match result {
            RunOutcome::Completed(stats) => Ok(stats),
            _ => Ok(self
                .stats
                .load()
                .await
                .unwrap_or_else(|| StatsSummary::empty(days))),
        }
    }

    /// Stale aggregate if one is cached, otherwise one computed from the
    /// cached activities.
    async fn local_stats(&self, days: u32) -> StatsSummary {
        match self.stats.load().await {
            Some(stale) => stale,
            None => {
                let cached = self.activities.load().await.unwrap_or_default();
                StatsSummary::from_records(days, &cached)
            }
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    pub async fn enter_foreground(&self) -> Result<()> {
        self.scheduler.enter_foreground().await
    }

    pub async fn enter_background(&self) -> Result<()> {
        self.scheduler.enter_background().await
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        self.scheduler.lifecycle()
    }

    /// Platform background task fired.
    pub async fn handle_platform_task(&self) -> Result<()> {
        self.scheduler.handle_platform_task().await
    }

    /// Follow provider changes made through the preference store elsewhere
    /// in the app. Stops on `shutdown` or when the orchestrator is dropped.
    pub fn watch_preferences(&self) {
        let mut changes = self.preferences.subscribe();
        let weak = self.weak_self.clone();
        let lifetime = self.lifetime.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = lifetime.cancelled() => return,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                let provider = *changes.borrow_and_update();
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = this.switch_provider(provider).await {
                    tracing::error!(error = %e, provider = %provider, "Provider switch from preference change failed");
                }
            }
        });
    }

    /// Stop all work without wiping local data.
    pub async fn shutdown(&self) {
        let mut session = self.session.write().await;
        session.generation += 1;
        self.lifetime.cancel();
        self.stop_workflow().await;
        tracing::info!("Sync engine shut down");
    }

    /// Stop all work and wipe cache and ledger (logout).
    pub async fn wipe_local_data(&self) -> Result<()> {
        let mut session = self.session.write().await;
        session.generation += 1;
        self.stop_workflow().await;
        self.wipe_stores().await?;
        self.snapshot.send_modify(|s| {
            s.workouts = Arc::new(Vec::new());
            s.last_sync_time = None;
            s.sync_error = None;
            s.is_loading = false;
        });
        tracing::info!("Local sync data wiped");
        Ok(())
    }

    async fn stop_workflow(&self) {
        if let Some(registry) = &self.registry {
            registry.remove_all_observers().await;
        }
        self.coordinator.cancel_all();
        self.scheduler.stop().await;
        self.active_syncs.store(0, Ordering::SeqCst);
        self.record_event_pending.store(false, Ordering::SeqCst);
        self.set_state(ProviderWorkflowState::Stopped);
    }

    async fn wipe_stores(&self) -> Result<()> {
        self.activities.clear().await?;
        self.stats.clear().await?;
        self.ledger.clear().await
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn spawn_change_listener(&self, mut changes: mpsc::UnboundedReceiver<String>) {
        let weak = self.weak_self.clone();
        let cancel = self.coordinator.child_token();

        tokio::spawn(async move {
            loop {
                let data_type = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = changes.recv() => match next {
                        Some(data_type) => data_type,
                        None => return,
                    },
                };
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = this.handle_new_record_event(&data_type).await {
                    tracing::warn!(data_type = %data_type, error = %e, "Failed to handle record event");
                }
            }
        });
    }

    fn spawn_upload_sweep(&self) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        self.coordinator
            .spawn(task_ids::UPLOAD_SWEEP, async move {
                this.upload_sweep().await.map(|_| ())
            });
    }

    async fn upload_sweep(&self) -> Result<UploadSummary> {
        match &self.uploads {
            Some(uploads) => uploads.sweep(self.config.sweep_lookback).await,
            None => Ok(UploadSummary::default()),
        }
    }

    /// A stopped workflow only serves local data until `initialize`
    /// succeeds again.
    fn is_running(&self) -> bool {
        self.state() != ProviderWorkflowState::Stopped
    }

    fn ensure_running(&self, provider: ProviderType) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SyncError::ProviderUnavailable(format!(
                "{} workflow is stopped",
                provider
            )))
        }
    }

    async fn session_info(&self) -> (u64, ProviderType) {
        let session = self.session.read().await;
        (session.generation, session.provider)
    }

    async fn ensure_session(&self, generation: u64) -> Result<()> {
        if self.session.read().await.generation == generation {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    /// Write to the activity cache and publish, if `generation` is still
    /// the current session. Returns the merge count (or record count for
    /// whole-list writes).
    async fn commit(
        &self,
        generation: u64,
        write: CacheWrite,
        reason: ChangeReason,
    ) -> Result<usize> {
        let session = self.session.read().await;
        if session.generation != generation {
            tracing::debug!(
                generation,
                current = session.generation,
                "Discarding result from a previous provider session"
            );
            return Err(SyncError::Cancelled);
        }

        let before = self.activities.load().await.unwrap_or_default();
        let count = match write {
            CacheWrite::Save(records) => {
                let count = records.len();
                self.activities.save(records).await?;
                count
            }
            CacheWrite::Replace(records) => {
                let count = records.len();
                self.activities.force_refresh(records).await?;
                count
            }
            CacheWrite::Merge(records) => self.activities.merge(records).await?,
        };
        let after = self.activities.load().await.unwrap_or_default();

        let changed = before != after;
        let emit = changed || reason != ChangeReason::BackgroundUpdate;
        self.publish_workouts(after, reason, emit, Some(self.clock.now()));
        Ok(count)
    }

    async fn publish_cached(
        &self,
        generation: u64,
        records: Vec<ActivityRecord>,
        reason: ChangeReason,
        saved_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let session = self.session.read().await;
        if session.generation != generation {
            return Err(SyncError::Cancelled);
        }
        self.snapshot.send_modify(|s| {
            if s.last_sync_time.is_none() {
                s.last_sync_time = saved_at;
            }
        });
        self.publish_workouts(records, reason, true, None);
        Ok(())
    }

    fn publish_workouts(
        &self,
        records: Vec<ActivityRecord>,
        reason: ChangeReason,
        emit: bool,
        synced_at: Option<DateTime<Utc>>,
    ) {
        let count = records.len();
        let provider = self.snapshot.borrow().provider;
        self.snapshot.send_modify(|s| {
            s.workouts = Arc::new(records);
            if let Some(at) = synced_at {
                s.last_sync_time = Some(at);
                s.sync_error = None;
            }
        });

        if emit {
            self.events.publish(SyncEvent::WorkoutsChanged {
                reason,
                count,
                provider,
            });
        }
    }

    fn publish_error(&self, err: &SyncError, background: bool) {
        if err.is_cancellation() {
            return;
        }
        let message = err.user_message();
        self.snapshot
            .send_modify(|s| s.sync_error = Some(message.clone()));
        self.events.publish(SyncEvent::SyncFailed {
            message,
            background,
        });
    }

    fn set_loading(&self, loading: bool) {
        self.snapshot.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }

    fn set_state(&self, next: ProviderWorkflowState) -> bool {
        self.set_state_from(next, |_| true)
    }

    /// Move to `next` only if the current state satisfies `from`.
    fn set_state_from(
        &self,
        next: ProviderWorkflowState,
        from: impl Fn(ProviderWorkflowState) -> bool,
    ) -> bool {
        let mut moved = false;
        self.snapshot.send_if_modified(|s| {
            if s.state == next || !from(s.state) || !s.state.can_transition_to(next) {
                return false;
            }
            tracing::debug!(from = ?s.state, to = ?next, "Workflow state transition");
            s.state = next;
            moved = true;
            true
        });
        if moved {
            self.events.publish(SyncEvent::StateChanged(next));
        }
        moved
    }

    fn begin_sync(&self) {
        if self.active_syncs.fetch_add(1, Ordering::SeqCst) == 0 {
            self.set_state(ProviderWorkflowState::Syncing);
        }
    }

    fn end_sync(&self) {
        let previous = self
            .active_syncs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        // Only a running sync settles to Idle; a stopped workflow stays put.
        if previous <= 1 {
            self.set_state_from(ProviderWorkflowState::Idle, |state| {
                state == ProviderWorkflowState::Syncing
            });
        }
    }
}

#[async_trait]
impl SyncHandler for SyncOrchestrator {
    async fn periodic_sync(&self) -> Result<()> {
        let (generation, provider) = self.session_info().await;
        if !self.is_running() {
            return Ok(());
        }

        if provider == ProviderType::PlatformSensor {
            self.coordinator
                .run(
                    task_ids::UPLOAD_SWEEP,
                    RunOptions::drop_duplicate(),
                    self.upload_sweep(),
                )
                .await?;
        }

        self.coordinator
            .run(
                task_ids::BACKGROUND_REFRESH,
                RunOptions::drop_duplicate(),
                self.background_refresh(generation, provider),
            )
            .await?;
        Ok(())
    }

    async fn catch_up(&self) -> Result<()> {
        self.force_refresh().await
    }

    async fn flush_uploads(&self) -> Result<()> {
        let (_, provider) = self.session_info().await;
        if provider != ProviderType::PlatformSensor || !self.is_running() {
            return Ok(());
        }

        match self
            .coordinator
            .run(
                task_ids::UPLOAD_SWEEP,
                RunOptions::wait(),
                self.upload_sweep(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProviderWorkflowState::*;

    #[test]
    fn platform_path_transitions_are_allowed() {
        assert!(Stopped.can_transition_to(Authorizing));
        assert!(Authorizing.can_transition_to(Observing));
        assert!(Observing.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Syncing));
    }

    #[test]
    fn cloud_path_skips_authorization() {
        assert!(Stopped.can_transition_to(Idle));
    }

    #[test]
    fn every_state_can_stop() {
        for state in [Stopped, Authorizing, Observing, Syncing, Idle] {
            assert!(state.can_transition_to(Stopped));
        }
    }

    #[test]
    fn stopped_cannot_sync_directly() {
        assert!(!Stopped.can_transition_to(Syncing));
        assert!(!Stopped.can_transition_to(Observing));
        assert!(!Authorizing.can_transition_to(Syncing));
        assert!(!Idle.can_transition_to(Observing));
    }
}
