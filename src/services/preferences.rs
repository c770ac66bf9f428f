// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider preference persisted in the blob store.

use crate::db::{keys, SharedBlobStore};
use crate::error::Result;
use crate::models::ProviderType;
use crate::providers::PreferenceStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Serialize, Deserialize)]
struct StoredPreference {
    provider: ProviderType,
}

/// `PreferenceStore` backed by a blob key. Changes are broadcast through a
/// `watch` channel so the orchestrator can react to provider changes made
/// elsewhere in the app.
pub struct BlobPreferenceStore {
    store: SharedBlobStore,
    tx: watch::Sender<ProviderType>,
}

impl BlobPreferenceStore {
    /// Load the stored preference, falling back to `default_provider`.
    pub async fn open(store: SharedBlobStore, default_provider: ProviderType) -> Result<Self> {
        let provider = match store.get(keys::PROVIDER_PREFERENCE).await? {
            Some(bytes) => serde_json::from_slice::<StoredPreference>(&bytes)?.provider,
            None => default_provider,
        };
        let (tx, _) = watch::channel(provider);
        Ok(Self { store, tx })
    }
}

#[async_trait]
impl PreferenceStore for BlobPreferenceStore {
    async fn current_provider(&self) -> Result<ProviderType> {
        Ok(*self.tx.borrow())
    }

    async fn set_current_provider(&self, provider: ProviderType) -> Result<()> {
        let bytes = serde_json::to_vec(&StoredPreference { provider })?;
        self.store.put(keys::PROVIDER_PREFERENCE, bytes).await?;
        self.tx.send_if_modified(|current| {
            if *current == provider {
                false
            } else {
                *current = provider;
                true
            }
        });
        tracing::info!(provider = %provider, "Provider preference updated");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<ProviderType> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBlobStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn defaults_until_set_then_persists() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let prefs = BlobPreferenceStore::open(blobs.clone(), ProviderType::ProviderA)
            .await
            .unwrap();
        assert_eq!(
            prefs.current_provider().await.unwrap(),
            ProviderType::ProviderA
        );

        prefs
            .set_current_provider(ProviderType::PlatformSensor)
            .await
            .unwrap();

        let reopened = BlobPreferenceStore::open(blobs, ProviderType::ProviderA)
            .await
            .unwrap();
        assert_eq!(
            reopened.current_provider().await.unwrap(),
            ProviderType::PlatformSensor
        );
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let prefs = BlobPreferenceStore::open(
            Arc::new(MemoryBlobStore::new()),
            ProviderType::ProviderA,
        )
        .await
        .unwrap();
        let mut rx = prefs.subscribe();

        prefs
            .set_current_provider(ProviderType::ProviderB)
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ProviderType::ProviderB);
    }
}
