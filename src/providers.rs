// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Contracts of the collaborators the engine consumes.
//!
//! The engine never talks to a platform API or HTTP transport directly;
//! everything goes through these traits so the composition root decides
//! what backs them.

use crate::error::Result;
use crate::models::{
    ActivityRecord, ApiVersion, ProviderType, SensorSample, SensorStreams, StatsSummary,
    StreamType, UploadResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Remote synchronization service.
#[async_trait]
pub trait RemoteSyncService: Send + Sync {
    /// Most recent activities for a provider, newest first.
    async fn fetch_recent_activities(
        &self,
        provider: ProviderType,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>>;

    /// Push a locally observed record with whatever streams are available.
    async fn upload_activity(
        &self,
        record: &ActivityRecord,
        streams: &SensorStreams,
        api_version: ApiVersion,
    ) -> Result<UploadResult>;

    async fn fetch_stats(&self, provider: ProviderType, days: u32) -> Result<StatsSummary>;
}

/// Live change subscription on the platform sensor store.
///
/// Creating a handle does not start delivery; `execute` does.
pub trait SubscriptionHandle: Send + Sync {
    fn execute(&self);

    fn stop(&self);
}

/// Channel a subscription uses to report that records of a logical type
/// changed. The payload is the logical type.
pub type ChangeNotifier = mpsc::UnboundedSender<String>;

/// Platform sensor store (the on-device provider).
#[async_trait]
pub trait PlatformSensorSource: Send + Sync {
    /// Ask the user for read access. Errors with `AuthorizationDenied`.
    async fn request_authorization(&self) -> Result<()>;

    fn subscribe_to_changes(
        &self,
        data_type: &str,
        notifier: ChangeNotifier,
    ) -> Box<dyn SubscriptionHandle>;

    async fn enable_background_delivery(&self, data_type: &str) -> Result<()>;

    async fn disable_background_delivery(&self, data_type: &str) -> Result<()>;

    async fn fetch_records_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>>;

    async fn fetch_sensor_stream(
        &self,
        record_id: &str,
        stream: StreamType,
    ) -> Result<Vec<SensorSample>>;
}

/// Persisted user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn current_provider(&self) -> Result<ProviderType>;

    /// Persist a new provider. Subscribers see the change.
    async fn set_current_provider(&self, provider: ProviderType) -> Result<()>;

    fn subscribe(&self) -> watch::Receiver<ProviderType>;
}

/// Platform background execution scheduler. A submission fires at most
/// once; the engine resubmits after each run.
#[async_trait]
pub trait PlatformTaskScheduler: Send + Sync {
    async fn submit(&self, task_id: &str, earliest_run: DateTime<Utc>) -> Result<()>;

    async fn cancel(&self, task_id: &str) -> Result<()>;
}

/// Bundle of collaborators handed to the composition root.
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn RemoteSyncService>,
    /// Absent on hosts without a platform sensor store
    pub platform: Option<Arc<dyn PlatformSensorSource>>,
    pub preferences: Arc<dyn PreferenceStore>,
    /// Absent when only the in-process loop drives background sync
    pub task_scheduler: Option<Arc<dyn PlatformTaskScheduler>>,
}
