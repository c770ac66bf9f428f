// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Background sync scheduling.
//!
//! Two triggers drive periodic sync:
//! - an in-process interval loop while the process is alive
//! - the platform background scheduler, which fires a submitted task at most
//!   once, so it is resubmitted after every run
//!
//! App lifecycle transitions are routed here too: returning to the
//! foreground triggers a catch-up sync, and entering the background flushes
//! pending uploads within the platform-granted execution budget.

use crate::error::Result;
use crate::providers::PlatformTaskScheduler;
use crate::time_utils::{format_utc_rfc3339, to_chrono, SharedClock};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Work the scheduler triggers. Implemented by the orchestrator.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Periodic pull (and upload sweep, where applicable).
    async fn periodic_sync(&self) -> Result<()>;

    /// Catch up after returning to the foreground.
    async fn catch_up(&self) -> Result<()>;

    /// Push pending uploads before the process may be suspended.
    async fn flush_uploads(&self) -> Result<()>;
}

/// Whether the app is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Periodic and lifecycle-driven sync trigger.
pub struct BackgroundSyncScheduler {
    platform: Option<Arc<dyn PlatformTaskScheduler>>,
    clock: SharedClock,
    task_id: String,
    interval: Duration,
    budget: Duration,
    handler: Mutex<Option<Weak<dyn SyncHandler>>>,
    loop_token: Mutex<Option<CancellationToken>>,
    lifecycle: Mutex<AppLifecycle>,
}

impl BackgroundSyncScheduler {
    pub fn new(
        platform: Option<Arc<dyn PlatformTaskScheduler>>,
        clock: SharedClock,
        task_id: &str,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            platform,
            clock,
            task_id: task_id.to_string(),
            interval,
            budget,
            handler: Mutex::new(None),
            loop_token: Mutex::new(None),
            lifecycle: Mutex::new(AppLifecycle::Foreground),
        }
    }

    /// Start the interval loop and submit the platform task.
    ///
    /// The scheduler keeps only a weak reference to `handler`; the loop ends
    /// on its own once the handler is dropped.
    pub async fn start(&self, handler: Arc<dyn SyncHandler>) {
        let weak = Arc::downgrade(&handler);
        let token = CancellationToken::new();

        if let Some(previous) = self
            .loop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(weak.clone());

        tokio::spawn(run_loop(weak, token, self.interval));
        self.submit_next().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Background sync scheduled"
        );
    }

    /// Stop the loop and cancel the pending platform task.
    pub async fn stop(&self) {
        if let Some(token) = self
            .loop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if let Some(platform) = &self.platform {
            if let Err(e) = platform.cancel(&self.task_id).await {
                tracing::warn!(task_id = %self.task_id, error = %e, "Failed to cancel background task");
            }
        }
    }

    /// Returns true while the interval loop is active.
    pub fn is_running(&self) -> bool {
        self.loop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point when the platform fires the submitted task. Runs one sync
    /// within the execution budget, then resubmits.
    pub async fn handle_platform_task(&self) -> Result<()> {
        let result = match self.current_handler() {
            Some(handler) => {
                match tokio::time::timeout(self.budget, handler.periodic_sync()).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            budget_secs = self.budget.as_secs(),
                            "Background sync exceeded execution budget"
                        );
                        Ok(())
                    }
                }
            }
            None => {
                tracing::debug!("Platform task fired with no active handler");
                Ok(())
            }
        };

        if self.is_running() {
            self.submit_next().await;
        }
        result
    }

    /// App returned to the foreground.
    pub async fn enter_foreground(&self) -> Result<()> {
        let previous = self.set_lifecycle(AppLifecycle::Foreground);
        if previous == AppLifecycle::Foreground {
            return Ok(());
        }

        tracing::info!("Entered foreground, catching up");
        match self.current_handler() {
            Some(handler) => handler.catch_up().await,
            None => Ok(()),
        }
    }

    /// App is moving to the background. Flushes uploads within the budget;
    /// whatever does not finish resumes from the ledger on the next run.
    pub async fn enter_background(&self) -> Result<()> {
        let previous = self.set_lifecycle(AppLifecycle::Background);
        if previous == AppLifecycle::Background {
            return Ok(());
        }

        let result = match self.current_handler() {
            Some(handler) => {
                match tokio::time::timeout(self.budget, handler.flush_uploads()).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            budget_secs = self.budget.as_secs(),
                            "Upload flush ran out of background budget"
                        );
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        if self.is_running() {
            self.submit_next().await;
        }
        result
    }

    fn set_lifecycle(&self, next: AppLifecycle) -> AppLifecycle {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *lifecycle, next)
    }

    fn current_handler(&self) -> Option<Arc<dyn SyncHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    async fn submit_next(&self) {
        let Some(platform) = &self.platform else {
            return;
        };
        let earliest = self.clock.now() + to_chrono(self.interval);
        match platform.submit(&self.task_id, earliest).await {
            Ok(()) => tracing::debug!(
                task_id = %self.task_id,
                earliest = %format_utc_rfc3339(earliest),
                "Background task submitted"
            ),
            Err(e) => tracing::warn!(
                task_id = %self.task_id,
                error = %e,
                "Platform refused background task submission"
            ),
        }
    }
}

/// The first tick fires one `period` after start; callers run the initial
/// load themselves. Late ticks are delayed, not bunched.
#[tracing::instrument(level = "info", skip_all)]
async fn run_loop(handler: Weak<dyn SyncHandler>, cancel: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Background sync loop cancelled");
                return;
            }
            _ = interval.tick() => {
                let Some(handler) = handler.upgrade() else {
                    tracing::debug!("Sync handler dropped, stopping loop");
                    return;
                };
                match handler.periodic_sync().await {
                    Ok(()) => {}
                    Err(e) if e.is_cancellation() => {
                        tracing::debug!("Periodic sync cancelled");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Periodic sync failed");
                    }
                }
            }
        }
    }
}
