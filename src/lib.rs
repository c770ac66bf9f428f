// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity-Sync: provider-switching fitness activity sync engine
//!
//! This crate keeps a local, cache-first view of a user's activities from
//! one active data provider (the on-device sensor store or a cloud
//! provider), uploads locally observed records to a remote sync service,
//! and coordinates concurrent refreshes, observer callbacks and provider
//! switches so that no stale data or duplicate work leaks across them.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod providers;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SharedBlobStore;
use events::EventBus;
use providers::Collaborators;
use services::SyncOrchestrator;
use std::sync::Arc;
use time_utils::SharedClock;

/// Composition root: the engine with its event bus and configuration.
pub struct SyncEngine {
    pub config: Config,
    pub events: EventBus,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl SyncEngine {
    /// Wire every component over the given collaborators and storage.
    pub async fn build(
        config: Config,
        collaborators: Collaborators,
        blobs: SharedBlobStore,
        clock: SharedClock,
    ) -> error::Result<Self> {
        let events = EventBus::new();
        let orchestrator = SyncOrchestrator::new(
            config.clone(),
            collaborators,
            blobs,
            events.clone(),
            clock,
        )
        .await?;

        Ok(Self {
            config,
            events,
            orchestrator,
        })
    }
}
