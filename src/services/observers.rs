// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Registry of live change subscriptions on the platform sensor store.
//!
//! The registry is the only place that creates platform subscriptions.
//! Every operation runs under one async mutex, so "is `type` already
//! registered?" and "register `type`" happen as a single step: two callers
//! racing to observe the same type end up with exactly one subscription.

use crate::providers::{PlatformSensorSource, SubscriptionHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One active subscription.
struct ObserverRegistration {
    handle: Box<dyn SubscriptionHandle>,
    background_delivery: bool,
}

/// Process-wide source of truth for active change subscriptions.
pub struct SensorObserverRegistry {
    platform: Arc<dyn PlatformSensorSource>,
    registrations: Mutex<HashMap<String, ObserverRegistration>>,
}

impl SensorObserverRegistry {
    pub fn new(platform: Arc<dyn PlatformSensorSource>) -> Self {
        Self {
            platform,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Register an observer for `data_type`.
    ///
    /// Returns `false` without touching the platform if `data_type` is
    /// already observed. That is the "already active" signal, not an error.
    /// A rejected background-delivery request is logged and otherwise
    /// ignored; the foreground subscription stays active.
    pub async fn register_observer<F>(
        &self,
        data_type: &str,
        subscription_factory: F,
        enable_background: bool,
    ) -> bool
    where
        F: FnOnce() -> Box<dyn SubscriptionHandle> + Send,
    {
        let mut registrations = self.registrations.lock().await;

        if registrations.contains_key(data_type) {
            tracing::debug!(data_type, "Observer already registered, skipping");
            return false;
        }

        let handle = subscription_factory();
        handle.execute();

        let mut background_delivery = false;
        if enable_background {
            match self.platform.enable_background_delivery(data_type).await {
                Ok(()) => background_delivery = true,
                Err(e) => {
                    tracing::warn!(
                        data_type,
                        error = %e,
                        "Platform rejected background delivery, continuing in foreground only"
                    );
                }
            }
        }

        registrations.insert(
            data_type.to_string(),
            ObserverRegistration {
                handle,
                background_delivery,
            },
        );

        tracing::info!(data_type, background_delivery, "Observer registered");
        true
    }

    /// Stop and unregister the observer for `data_type`.
    ///
    /// Returns `false` if nothing was registered.
    pub async fn remove_observer(&self, data_type: &str) -> bool {
        let mut registrations = self.registrations.lock().await;
        match registrations.remove(data_type) {
            Some(registration) => {
                self.teardown(data_type, registration).await;
                true
            }
            None => false,
        }
    }

    /// Stop and unregister every observer.
    pub async fn remove_all_observers(&self) {
        let mut registrations = self.registrations.lock().await;
        let count = registrations.len();
        for (data_type, registration) in registrations.drain() {
            self.teardown(&data_type, registration).await;
        }
        if count > 0 {
            tracing::info!(count, "All observers removed");
        }
    }

    pub async fn is_registered(&self, data_type: &str) -> bool {
        self.registrations.lock().await.contains_key(data_type)
    }

    pub async fn active_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.registrations.lock().await.keys().cloned().collect();
        types.sort();
        types
    }

    async fn teardown(&self, data_type: &str, registration: ObserverRegistration) {
        registration.handle.stop();

        if registration.background_delivery {
            if let Err(e) = self.platform.disable_background_delivery(data_type).await {
                tracing::warn!(
                    data_type,
                    error = %e,
                    "Failed to disable background delivery"
                );
            }
        }

        tracing::info!(data_type, "Observer removed");
    }
}
