// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Typed event bus owned by the composition root.
//!
//! Subscribers hold a `broadcast::Receiver` for as long as they want events;
//! dropping the receiver ends the subscription.

use crate::models::ProviderType;
use crate::services::orchestrator::ProviderWorkflowState;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why the published activity collection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    InitialCache,
    UserRefresh,
    BackgroundUpdate,
    NewRecordSynced,
    ForceRefresh,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::InitialCache => "initial_cache",
            ChangeReason::UserRefresh => "user_refresh",
            ChangeReason::BackgroundUpdate => "background_update",
            ChangeReason::NewRecordSynced => "new_record_synced",
            ChangeReason::ForceRefresh => "force_refresh",
        }
    }
}

/// Events broadcast to UI-level observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The published workouts collection changed.
    WorkoutsChanged {
        reason: ChangeReason,
        count: usize,
        provider: ProviderType,
    },
    /// The active provider changed and local data was wiped.
    ProviderChanged {
        from: ProviderType,
        to: ProviderType,
    },
    /// The provider workflow state machine moved.
    StateChanged(ProviderWorkflowState),
    /// A sync failed; `message` is user-facing.
    SyncFailed { message: String, background: bool },
}

/// Broadcast bus for `SyncEvent`s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        if let SyncEvent::WorkoutsChanged { reason, count, .. } = &event {
            tracing::debug!(reason = reason.as_str(), count, "Workouts changed");
        }
        let _ = self.tx.send(event);
    }
}

/// Next event for a long-lived subscriber. Events lost to a lagging
/// receiver are logged and skipped; `None` once the bus is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> Option<SyncEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event subscriber fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tags_match_serde_names() {
        for reason in [
            ChangeReason::InitialCache,
            ChangeReason::UserRefresh,
            ChangeReason::BackgroundUpdate,
            ChangeReason::NewRecordSynced,
            ChangeReason::ForceRefresh,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::WorkoutsChanged {
            reason: ChangeReason::UserRefresh,
            count: 4,
            provider: ProviderType::ProviderB,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SyncEvent::WorkoutsChanged {
                reason: ChangeReason::UserRefresh,
                count: 4,
                provider: ProviderType::ProviderB,
            }
        );
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for count in 0..EVENT_CHANNEL_CAPACITY + 10 {
            bus.publish(SyncEvent::WorkoutsChanged {
                reason: ChangeReason::BackgroundUpdate,
                count,
                provider: ProviderType::ProviderA,
            });
        }

        match next_event(&mut rx).await {
            Some(SyncEvent::WorkoutsChanged { count, .. }) => assert_eq!(count, 10),
            other => panic!("expected the oldest retained event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn next_event_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        drop(bus);

        assert!(next_event(&mut rx).await.is_none());
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::SyncFailed {
            message: "offline".to_string(),
            background: true,
        });
    }
}
