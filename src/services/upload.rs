// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Upload pipeline for locally observed records.
//!
//! Handles:
//! 1. Gathering sensor streams for a record
//! 2. Uploading it (with or without heart rate)
//! 3. Recording the outcome in the upload ledger
//! 4. Revisiting incomplete uploads once their heart rate has landed
//!
//! Passes are serialized: the ledger check and the upload it guards are
//! not atomic, so two overlapping passes could push the same record twice.

use crate::error::{Result, SyncError};
use crate::models::sensor::has_required_streams;
use crate::models::{
    ActivityRecord, ApiVersion, SensorSample, SensorStreams, StreamType, UploadOutcome,
};
use crate::providers::{PlatformSensorSource, RemoteSyncService};
use crate::services::UploadLedger;
use crate::time_utils::{to_chrono, SharedClock};
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Counts from one pass of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Uploaded with complete sensor data
    pub uploaded: u32,
    /// Uploaded without heart rate
    pub partial: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Incomplete uploads completed by the retry sweep
    pub revisited: u32,
}

impl UploadSummary {
    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Complete => self.uploaded += 1,
            UploadOutcome::PartialSensorData => self.partial += 1,
            UploadOutcome::Failed => self.failed += 1,
            UploadOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Returns true if anything reached the remote service.
    pub fn changed_remote(&self) -> bool {
        self.uploaded + self.partial + self.revisited > 0
    }
}

/// Pushes platform records to the remote service.
pub struct UploadPipeline {
    remote: Arc<dyn RemoteSyncService>,
    platform: Arc<dyn PlatformSensorSource>,
    ledger: Arc<UploadLedger>,
    clock: SharedClock,
    api_version: ApiVersion,
    retry_min_delay: Duration,
    pass: Mutex<()>,
}

impl UploadPipeline {
    pub fn new(
        remote: Arc<dyn RemoteSyncService>,
        platform: Arc<dyn PlatformSensorSource>,
        ledger: Arc<UploadLedger>,
        clock: SharedClock,
        api_version: ApiVersion,
        retry_min_delay: Duration,
    ) -> Self {
        Self {
            remote,
            platform,
            ledger,
            clock,
            api_version,
            retry_min_delay,
            pass: Mutex::new(()),
        }
    }

    /// Upload every record the ledger says still needs a first upload.
    ///
    /// Only cancellation aborts the pass; individual failures are counted.
    pub async fn upload_pending(&self, records: &[ActivityRecord]) -> Result<UploadSummary> {
        let _pass = self.pass.lock().await;
        self.upload_batch(records).await
    }

    async fn upload_batch(&self, records: &[ActivityRecord]) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();
        for record in records {
            summary.record(self.upload_one(record).await?);
        }

        if summary.changed_remote() || summary.failed > 0 {
            tracing::info!(
                uploaded = summary.uploaded,
                partial = summary.partial,
                failed = summary.failed,
                skipped = summary.skipped,
                "Upload pass finished"
            );
        }
        Ok(summary)
    }

    /// Upload one record if the ledger allows it.
    async fn upload_one(&self, record: &ActivityRecord) -> Result<UploadOutcome> {
        if !self.ledger.should_attempt(&record.id, self.api_version).await {
            return Ok(UploadOutcome::Skipped);
        }

        let streams = self.collect_streams(&record.id).await?;
        let has_heart_rate = has_required_streams(&streams);

        match self
            .remote
            .upload_activity(record, &streams, self.api_version)
            .await
        {
            Ok(result) if result.success => {
                let complete = has_heart_rate && result.has_complete_sensor_data;
                self.ledger
                    .mark_uploaded(&record.id, complete, self.api_version)
                    .await?;

                if complete {
                    tracing::info!(activity_id = %record.id, "Activity uploaded");
                    Ok(UploadOutcome::Complete)
                } else {
                    tracing::info!(
                        activity_id = %record.id,
                        "Activity uploaded without heart rate, will revisit"
                    );
                    Ok(UploadOutcome::PartialSensorData)
                }
            }
            Ok(_) => {
                let err = SyncError::UploadRejected {
                    activity_id: record.id.clone(),
                    reason: "remote reported failure".to_string(),
                };
                self.log_failure(record, &err);
                self.ledger
                    .record_attempt(&record.id, self.api_version)
                    .await?;
                Ok(UploadOutcome::Failed)
            }
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                self.log_failure(record, &e);
                self.ledger
                    .record_attempt(&record.id, self.api_version)
                    .await?;
                Ok(UploadOutcome::Failed)
            }
        }
    }

    /// Revisit incomplete uploads that are inside the retry window.
    ///
    /// `lookback` bounds the platform query used to find the records; it
    /// must cover the retry deadline.
    pub async fn retry_incomplete(&self, lookback: Duration) -> Result<UploadSummary> {
        let _pass = self.pass.lock().await;
        self.retry_batch(lookback).await
    }

    async fn retry_batch(&self, lookback: Duration) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();

        let ids = self.ledger.records_needing_retry(self.retry_min_delay).await;
        if ids.is_empty() {
            return Ok(summary);
        }

        let now = self.clock.now();
        let records: HashMap<String, ActivityRecord> = self
            .platform
            .fetch_records_in_range(now - to_chrono(lookback), now)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        for id in ids {
            let Some(record) = records.get(&id) else {
                tracing::debug!(activity_id = %id, "Record no longer on device, skipping retry");
                summary.skipped += 1;
                continue;
            };

            let streams = self.collect_streams(&id).await?;
            if !has_required_streams(&streams) {
                tracing::debug!(activity_id = %id, "Heart rate still missing");
                summary.skipped += 1;
                continue;
            }

            match self
                .remote
                .upload_activity(record, &streams, self.api_version)
                .await
            {
                Ok(result) if result.success => {
                    self.ledger
                        .mark_uploaded(&id, result.has_complete_sensor_data, self.api_version)
                        .await?;
                    tracing::info!(activity_id = %id, "Heart rate added to earlier upload");
                    summary.revisited += 1;
                }
                Ok(_) => {
                    self.log_failure(
                        record,
                        &SyncError::UploadRejected {
                            activity_id: id.clone(),
                            reason: "remote reported failure".to_string(),
                        },
                    );
                    summary.failed += 1;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    self.log_failure(record, &e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Fetch the platform records in `[now - lookback, now]`, upload what is
    /// pending, then revisit incomplete uploads.
    pub async fn sweep(&self, lookback: Duration) -> Result<UploadSummary> {
        let _pass = self.pass.lock().await;
        let now = self.clock.now();
        let records = self
            .platform
            .fetch_records_in_range(now - to_chrono(lookback), now)
            .await?;

        let mut summary = self.upload_batch(&records).await?;
        let retried = self.retry_batch(lookback).await?;
        summary.revisited += retried.revisited;
        summary.failed += retried.failed;
        Ok(summary)
    }

    /// Gather every uploaded stream that has samples. A stream that fails to
    /// load is treated as absent.
    async fn collect_streams(&self, record_id: &str) -> Result<SensorStreams> {
        let fetched: Vec<(StreamType, Result<Vec<SensorSample>>)> =
            stream::iter(StreamType::UPLOADED)
                .map(|kind| async move {
                    (kind, self.platform.fetch_sensor_stream(record_id, kind).await)
                })
                .buffer_unordered(StreamType::UPLOADED.len())
                .collect()
                .await;

        let mut streams = SensorStreams::new();
        for (kind, result) in fetched {
            match result {
                Ok(samples) if !samples.is_empty() => {
                    streams.insert(kind, samples);
                }
                Ok(_) => {}
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        activity_id = record_id,
                        stream = ?kind,
                        error = %e,
                        "Failed to read sensor stream"
                    );
                }
            }
        }
        Ok(streams)
    }

    fn log_failure(&self, record: &ActivityRecord, err: &SyncError) {
        match err {
            SyncError::UploadRejected { reason, .. } => {
                tracing::error!(
                    activity_id = %record.id,
                    provider = %record.provider_origin,
                    api_version = self.api_version.as_str(),
                    activity_type = ?record.activity_type,
                    start = %record.start,
                    payload_version = record.raw_payload_version,
                    reason = %reason,
                    "Upload rejected by remote service"
                );
            }
            other => {
                tracing::warn!(
                    activity_id = %record.id,
                    error = %other,
                    "Upload failed, will retry on next sweep"
                );
            }
        }
    }
}
