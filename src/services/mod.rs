// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync engine components.

pub mod cache;
pub mod coordinator;
pub mod ledger;
pub mod observers;
pub mod orchestrator;
pub mod preferences;
pub mod remote;
pub mod scheduler;
pub mod upload;

pub use cache::{merge_by_id, CacheEntry, TtlCacheStore};
pub use coordinator::{JoinPolicy, RunOptions, RunOutcome, TaskCoordinator, TaskStatus};
pub use ledger::UploadLedger;
pub use observers::SensorObserverRegistry;
pub use orchestrator::{ProviderWorkflowState, SyncOrchestrator, SyncSnapshot};
pub use preferences::BlobPreferenceStore;
pub use remote::HttpRemoteService;
pub use scheduler::{AppLifecycle, BackgroundSyncScheduler, SyncHandler};
pub use upload::{UploadPipeline, UploadSummary};
