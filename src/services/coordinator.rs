// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coordinator for named, deduplicated and rate-limited operations.
//!
//! Every operation runs under the coordinator's current cancellation scope.
//! `cancel_all` cancels the scope and opens a fresh one, so work started
//! before a provider switch can never outlive it.

use crate::error::{Result, SyncError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a caller does when the requested id is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Wait for the running task and report its status.
    Wait,
    /// Return immediately without running anything.
    Drop,
}

/// Per-call admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub join: JoinPolicy,
    /// Reject callers that arrive within this window of the last start.
    pub cooldown: Option<Duration>,
}

impl RunOptions {
    pub const fn wait() -> Self {
        Self {
            join: JoinPolicy::Wait,
            cooldown: None,
        }
    }

    pub const fn drop_duplicate() -> Self {
        Self {
            join: JoinPolicy::Drop,
            cooldown: None,
        }
    }

    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }
}

/// Final status of a coordinated task, as seen by joined callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Result of asking the coordinator to run an operation.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// This caller ran the operation.
    Completed(T),
    /// Another caller was running it; this caller waited for it.
    Joined(TaskStatus),
    /// Another caller was running it; this caller was dropped.
    Deduplicated,
    /// The id is cooling down.
    Throttled { retry_after: Duration },
}

impl<T> RunOutcome<T> {
    /// Returns true if this caller executed the operation.
    pub fn ran(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

struct InFlight {
    generation: u64,
    status: watch::Receiver<Option<TaskStatus>>,
}

enum Admission {
    Start {
        generation: u64,
        status: watch::Sender<Option<TaskStatus>>,
        token: CancellationToken,
    },
    Join(watch::Receiver<Option<TaskStatus>>),
    Deduplicated,
    Throttled(Duration),
}

struct Inner {
    in_flight: DashMap<String, InFlight>,
    last_started: DashMap<String, Instant>,
    scope: Mutex<CancellationToken>,
    next_generation: AtomicU64,
}

/// Deduplicates and rate-limits named operations; cancellable as a group.
#[derive(Clone)]
pub struct TaskCoordinator {
    inner: Arc<Inner>,
}

impl Default for TaskCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: DashMap::new(),
                last_started: DashMap::new(),
                scope: Mutex::new(CancellationToken::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    fn scope_token(&self) -> CancellationToken {
        self.inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Token cancelled together with the current scope. Long-lived loops
    /// select on it.
    pub fn child_token(&self) -> CancellationToken {
        self.scope_token().child_token()
    }

    /// Returns true if an operation with this id is running.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.inner.in_flight.contains_key(id)
    }

    /// Check-then-register as one step under the map's entry lock.
    fn admit(&self, id: &str, options: RunOptions) -> Admission {
        match self.inner.in_flight.entry(id.to_string()) {
            Entry::Occupied(entry) => match options.join {
                JoinPolicy::Wait => Admission::Join(entry.get().status.clone()),
                JoinPolicy::Drop => Admission::Deduplicated,
            },
            Entry::Vacant(entry) => {
                if let Some(cooldown) = options.cooldown {
                    if let Some(last) = self.inner.last_started.get(id) {
                        let elapsed = last.elapsed();
                        if elapsed < cooldown {
                            return Admission::Throttled(cooldown - elapsed);
                        }
                    }
                }

                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                entry.insert(InFlight {
                    generation,
                    status: rx,
                });
                self.inner
                    .last_started
                    .insert(id.to_string(), Instant::now());

                Admission::Start {
                    generation,
                    status: tx,
                    token: self.scope_token(),
                }
            }
        }
    }

    /// Run `fut` as the operation `id`.
    ///
    /// Returns `Err(SyncError::Cancelled)` if the scope is cancelled while
    /// the operation runs; the future is dropped at its next suspension point.
    pub async fn run<T, F>(&self, id: &str, options: RunOptions, fut: F) -> Result<RunOutcome<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let (generation, status, token) = match self.admit(id, options) {
            Admission::Start {
                generation,
                status,
                token,
            } => (generation, status, token),
            Admission::Join(mut rx) => {
                tracing::debug!(task = id, "Joining in-flight task");
                let status = match rx.wait_for(|s| s.is_some()).await {
                    Ok(status) => status.clone().unwrap_or(TaskStatus::Cancelled),
                    Err(_) => TaskStatus::Cancelled,
                };
                return Ok(RunOutcome::Joined(status));
            }
            Admission::Deduplicated => {
                tracing::debug!(task = id, "Task already in flight, dropping duplicate");
                return Ok(RunOutcome::Deduplicated);
            }
            Admission::Throttled(retry_after) => {
                tracing::debug!(
                    task = id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Task cooling down"
                );
                return Ok(RunOutcome::Throttled { retry_after });
            }
        };

        let mut guard = FinishGuard {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
            generation,
            status: Some(status),
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SyncError::Cancelled),
            r = fut => r,
        };

        guard.finish(match &result {
            Ok(_) => TaskStatus::Succeeded,
            Err(SyncError::Cancelled) => TaskStatus::Cancelled,
            Err(e) => TaskStatus::Failed(e.to_string()),
        });

        result.map(RunOutcome::Completed)
    }

    /// Run `fut` detached as `id`, dropping it if `id` is already running.
    pub fn spawn<F>(&self, id: &str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let coordinator = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            match coordinator
                .run(&id, RunOptions::drop_duplicate(), fut)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_cancellation() => {
                    tracing::debug!(task = %id, "Background task cancelled");
                }
                Err(e) => {
                    tracing::warn!(task = %id, error = %e, "Background task failed");
                }
            }
        })
    }

    /// Cancel every task in the current scope and start a fresh scope.
    /// Cooldowns are forgotten with it.
    pub fn cancel_all(&self) {
        let old = {
            let mut scope = self
                .inner
                .scope
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *scope, CancellationToken::new())
        };
        old.cancel();

        let cancelled = self.inner.in_flight.len();
        self.inner.in_flight.clear();
        self.inner.last_started.clear();
        tracing::debug!(cancelled, "Cancelled coordinator scope");
    }
}

/// Releases the in-flight slot even if the running future is dropped.
struct FinishGuard {
    inner: Arc<Inner>,
    id: String,
    generation: u64,
    status: Option<watch::Sender<Option<TaskStatus>>>,
}

impl FinishGuard {
    fn finish(&mut self, status: TaskStatus) {
        let generation = self.generation;
        self.inner
            .in_flight
            .remove_if(&self.id, |_, entry| entry.generation == generation);
        if let Some(tx) = self.status.take() {
            let _ = tx.send(Some(status));
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.status.is_some() {
            self.finish(TaskStatus::Cancelled);
        }
    }
}
