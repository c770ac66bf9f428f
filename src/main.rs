// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity-Sync headless daemon
//!
//! Runs the sync engine against the remote service with a file-backed
//! store, keeping the activity cache warm for a cloud provider until
//! interrupted.

use activity_sync::{
    config::Config,
    db::{FileBlobStore, SharedBlobStore},
    events::{next_event, SyncEvent},
    providers::Collaborators,
    services::{BlobPreferenceStore, HttpRemoteService},
    time_utils::SystemClock,
    SyncEngine,
};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        remote = %config.remote_url,
        data_dir = %config.data_dir.display(),
        "Starting activity sync daemon"
    );

    let blobs: SharedBlobStore = Arc::new(
        FileBlobStore::open(&config.data_dir)
            .await
            .context("Failed to open data directory")?,
    );
    let preferences = Arc::new(
        BlobPreferenceStore::open(blobs.clone(), config.default_provider)
            .await
            .context("Failed to load provider preference")?,
    );
    let remote = Arc::new(HttpRemoteService::new(
        &config.remote_url,
        config.api_token.clone(),
    ));

    // No platform sensor store on a headless host
    let collaborators = Collaborators {
        remote,
        platform: None,
        preferences,
        task_scheduler: None,
    };

    let engine = SyncEngine::build(config, collaborators, blobs, Arc::new(SystemClock))
        .await
        .context("Failed to build sync engine")?;
    let orchestrator = engine.orchestrator.clone();

    let mut events = engine.events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            match event {
                SyncEvent::WorkoutsChanged {
                    reason,
                    count,
                    provider,
                } => {
                    tracing::info!(reason = reason.as_str(), count, provider = %provider, "Activities updated");
                }
                SyncEvent::SyncFailed {
                    message,
                    background,
                } => {
                    tracing::warn!(background, message = %message, "Sync failed");
                }
                other => tracing::debug!(event = ?other, "Sync event"),
            }
        }
    });

    orchestrator.initialize().await?;
    orchestrator.watch_preferences();
    if let Err(e) = orchestrator.load_activities().await {
        tracing::warn!(error = %e, "Initial load failed, will retry on schedule");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    orchestrator.shutdown().await;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("activity_sync=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
