// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-record upload bookkeeping.
//!
//! Some providers populate heart rate only after an activity ends, so a
//! record can be uploaded legitimately without it. The ledger remembers
//! those uploads and tells the retry sweep which ones to revisit, until the
//! retry deadline passes and the attempt is abandoned.
//!
//! The ledger is written through to the blob store after every mutation;
//! a background flush that runs out of time resumes from what was persisted.

use crate::db::{keys, SharedBlobStore};
use crate::error::Result;
use crate::models::{ApiVersion, UploadRecord};
use crate::time_utils::{to_chrono, SharedClock};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Serialized upload bookkeeping, keyed by activity id.
pub struct UploadLedger {
    store: SharedBlobStore,
    clock: SharedClock,
    retry_deadline: std::time::Duration,
    records: Mutex<HashMap<String, UploadRecord>>,
}

impl UploadLedger {
    /// Open the ledger, loading persisted state.
    ///
    /// An unreadable blob is logged and the ledger starts empty; the next
    /// sweep re-derives what still needs uploading.
    pub async fn open(
        store: SharedBlobStore,
        retry_deadline: std::time::Duration,
        clock: SharedClock,
    ) -> Result<Self> {
        let records = match store.get(keys::UPLOAD_LEDGER).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable upload ledger");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        Ok(Self {
            store,
            clock,
            retry_deadline,
            records: Mutex::new(records),
        })
    }

    /// Returns true if `activity_id` was uploaded against `api_version`,
    /// with or without complete sensor data.
    pub async fn is_uploaded(&self, activity_id: &str, api_version: ApiVersion) -> bool {
        self.records
            .lock()
            .await
            .get(activity_id)
            .is_some_and(|r| r.uploaded_at.is_some() && r.api_version == api_version)
    }

    /// Returns true if a first upload of `activity_id` should be attempted:
    /// it has not been uploaded against `api_version` and, if earlier
    /// attempts failed, the first one is still within the retry deadline.
    pub async fn should_attempt(&self, activity_id: &str, api_version: ApiVersion) -> bool {
        let now = self.clock.now();
        let deadline = to_chrono(self.retry_deadline);
        match self.records.lock().await.get(activity_id) {
            None => true,
            Some(r) if r.api_version != api_version => true,
            Some(r) if r.uploaded_at.is_some() => false,
            Some(r) => now - r.first_attempt_at < deadline,
        }
    }

    /// Record a successful upload.
    ///
    /// `uploaded_at` keeps the first upload against `api_version`; revisits
    /// only update completeness, so the retry deadline never moves.
    pub async fn mark_uploaded(
        &self,
        activity_id: &str,
        has_complete_sensor_data: bool,
        api_version: ApiVersion,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        let mut record = records
            .get(activity_id)
            .cloned()
            .unwrap_or_else(|| new_record(activity_id, api_version, now));
        if record.uploaded_at.is_none() || record.api_version != api_version {
            record.uploaded_at = Some(now);
        }
        record.has_complete_sensor_data = has_complete_sensor_data;
        record.api_version = api_version;
        record.last_attempt_at = now;
        record.attempts += 1;

        self.commit(&mut records, record).await
    }

    /// Record a failed attempt. The record stays unmarked.
    pub async fn record_attempt(&self, activity_id: &str, api_version: ApiVersion) -> Result<()> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        let mut record = records
            .get(activity_id)
            .cloned()
            .unwrap_or_else(|| new_record(activity_id, api_version, now));
        record.last_attempt_at = now;
        record.attempts += 1;

        self.commit(&mut records, record).await
    }

    /// Ids uploaded without complete sensor data whose first upload is at
    /// least `older_than` old and still younger than the retry deadline.
    pub async fn records_needing_retry(&self, older_than: std::time::Duration) -> Vec<String> {
        let now = self.clock.now();
        let lower = to_chrono(older_than);
        let upper = to_chrono(self.retry_deadline);

        let mut ids: Vec<String> = self
            .records
            .lock()
            .await
            .values()
            .filter(|r| !r.has_complete_sensor_data)
            .filter_map(|r| {
                let elapsed = now - r.uploaded_at?;
                (elapsed >= lower && elapsed < upper).then(|| r.activity_id.clone())
            })
            .collect();
        ids.sort();
        ids
    }

    /// Returns true if `activity_id` will never be retried again: either an
    /// incomplete upload past the deadline, or a never-uploaded record whose
    /// first attempt is past the deadline.
    pub async fn is_terminal(&self, activity_id: &str) -> bool {
        let now = self.clock.now();
        let deadline = to_chrono(self.retry_deadline);
        self.records
            .lock()
            .await
            .get(activity_id)
            .is_some_and(|r| match r.uploaded_at {
                Some(_) if r.has_complete_sensor_data => false,
                Some(uploaded_at) => now - uploaded_at >= deadline,
                None => now - r.first_attempt_at >= deadline,
            })
    }

    pub async fn get(&self, activity_id: &str) -> Option<UploadRecord> {
        self.records.lock().await.get(activity_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Wipe all ledger state (logout or provider switch).
    pub async fn clear(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        self.store.delete(keys::UPLOAD_LEDGER).await?;
        let cleared = records.len();
        records.clear();
        tracing::info!(cleared, "Upload ledger cleared");
        Ok(())
    }

    /// Swap `record` in and persist. A failed write restores the previous
    /// entry so memory never runs ahead of the blob store.
    async fn commit(
        &self,
        records: &mut HashMap<String, UploadRecord>,
        record: UploadRecord,
    ) -> Result<()> {
        let id = record.activity_id.clone();
        let previous = records.insert(id.clone(), record);
        if let Err(e) = self.persist(records).await {
            match previous {
                Some(previous) => records.insert(id, previous),
                None => records.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self, records: &HashMap<String, UploadRecord>) -> Result<()> {
        let bytes = serde_json::to_vec(records)?;
        self.store.put(keys::UPLOAD_LEDGER, bytes).await
    }
}

fn new_record(
    activity_id: &str,
    api_version: ApiVersion,
    now: chrono::DateTime<chrono::Utc>,
) -> UploadRecord {
    UploadRecord {
        activity_id: activity_id.to_string(),
        uploaded_at: None,
        has_complete_sensor_data: false,
        api_version,
        first_attempt_at: now,
        last_attempt_at: now,
        attempts: 0,
    }
}
