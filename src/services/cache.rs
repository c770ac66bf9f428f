// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Keyed TTL cache persisted through the blob store.
//!
//! Each store owns one key. The entry lives in memory behind an `RwLock`
//! and is written through to the blob store on every change. Writers build
//! the new entry completely before swapping it in, so readers see either
//! the old value or the new one, never a partial merge.

use crate::db::SharedBlobStore;
use crate::error::Result;
use crate::models::ActivityRecord;
use crate::time_utils::{to_chrono, SharedClock};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A cached payload with its save time and TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub saved_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    /// `now - saved_at > ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.saved_at > Duration::seconds(self.ttl_seconds as i64)
    }
}

/// Cache for one value of type `T` under one blob key.
pub struct TtlCacheStore<T> {
    store: SharedBlobStore,
    key: String,
    ttl: std::time::Duration,
    clock: SharedClock,
    entry: RwLock<Option<CacheEntry<T>>>,
}

impl<T> TtlCacheStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Open the cache, hydrating from the blob store.
    ///
    /// An unreadable blob is logged and treated as an empty cache.
    pub async fn open(
        store: SharedBlobStore,
        key: &str,
        ttl: std::time::Duration,
        clock: SharedClock,
    ) -> Result<Self> {
        let entry = match store.get(key).await? {
            Some(bytes) => match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Discarding unreadable cache entry");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            store,
            key: key.to_string(),
            ttl,
            clock,
            entry: RwLock::new(entry),
        })
    }

    pub fn ttl(&self) -> std::time::Duration {
        self.ttl
    }

    /// Stored payload if it has not expired.
    pub async fn load_if_fresh(&self) -> Option<T> {
        let now = self.clock.now();
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.payload.clone())
    }

    /// Stored payload regardless of freshness (offline fallback).
    pub async fn load(&self) -> Option<T> {
        self.entry.read().await.as_ref().map(|e| e.payload.clone())
    }

    /// Returns true if nothing is cached or the entry is older than its TTL.
    pub async fn is_expired(&self) -> bool {
        let now = self.clock.now();
        self.entry
            .read()
            .await
            .as_ref()
            .is_none_or(|e| e.is_expired_at(now))
    }

    pub async fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.entry.read().await.as_ref().map(|e| e.saved_at)
    }

    /// Store `payload` with a fresh timestamp.
    pub async fn save(&self, payload: T) -> Result<()> {
        let mut entry = self.entry.write().await;
        let new_entry = self.new_entry(payload);
        self.persist(&new_entry).await?;
        *entry = Some(new_entry);
        Ok(())
    }

    /// Replace the entry wholesale, resetting `saved_at` whatever its prior
    /// value or freshness.
    pub async fn force_refresh(&self, payload: T) -> Result<()> {
        tracing::debug!(key = %self.key, "Force-refreshing cache entry");
        self.save(payload).await
    }

    /// Delete the entry from memory and the blob store.
    pub async fn clear(&self) -> Result<()> {
        let mut entry = self.entry.write().await;
        self.store.delete(&self.key).await?;
        *entry = None;
        Ok(())
    }

    fn new_entry(&self, payload: T) -> CacheEntry<T> {
        CacheEntry {
            payload,
            saved_at: self.clock.now(),
            ttl_seconds: to_chrono(self.ttl).num_seconds().max(0) as u64,
        }
    }

    async fn persist(&self, entry: &CacheEntry<T>) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.store.put(&self.key, bytes).await
    }
}

impl TtlCacheStore<Vec<ActivityRecord>> {
    /// Merge `incoming` into the cached list by activity id.
    ///
    /// Ids already cached are superseded in place; genuinely new ids are
    /// inserted. The timestamp is refreshed. Returns the number of new ids.
    pub async fn merge(&self, incoming: Vec<ActivityRecord>) -> Result<usize> {
        let mut entry = self.entry.write().await;
        let existing = entry
            .as_ref()
            .map(|e| e.payload.clone())
            .unwrap_or_default();

        let (merged, merged_count) = merge_by_id(existing, incoming);
        let new_entry = self.new_entry(merged);
        self.persist(&new_entry).await?;

        tracing::debug!(
            key = %self.key,
            merged_count,
            total = new_entry.payload.len(),
            "Merged activities into cache"
        );

        *entry = Some(new_entry);
        Ok(merged_count)
    }
}

/// Merge two activity lists by id, newest version winning.
///
/// Returns the merged list (sorted newest start first) and the number of
/// ids in `incoming` that were not in `existing`.
pub fn merge_by_id(
    existing: Vec<ActivityRecord>,
    incoming: Vec<ActivityRecord>,
) -> (Vec<ActivityRecord>, usize) {
    let mut merged = existing;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    let mut added = 0;
    for record in incoming {
        match index.get(&record.id).copied() {
            Some(i) => merged[i] = record,
            None => {
                index.insert(record.id.clone(), merged.len());
                merged.push(record);
                added += 1;
            }
        }
    }

    merged.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.id.cmp(&b.id)));
    (merged, added)
}
