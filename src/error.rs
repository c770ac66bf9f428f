// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync engine error types.
//!
//! Partial sensor data is deliberately absent here: a record uploaded
//! without its heart-rate stream is an expected outcome tracked by the
//! upload ledger, not a failure.

/// Error type shared by every component of the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The platform sensor store refused access. Fatal to the platform
    /// provider's workflow until the user grants access again.
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The remote service could not be reached or answered with a
    /// retryable status.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The remote service permanently rejected a payload.
    #[error("Upload rejected for activity {activity_id}: {reason}")]
    UploadRejected { activity_id: String, reason: String },

    /// Work was cancelled by a provider switch or teardown.
    #[error("Operation cancelled")]
    Cancelled,

    /// The requested provider has no backing source in this process.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Returns true for errors expected during teardown or provider switch.
    /// These are swallowed and never surfaced to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Returns true if the failure is recoverable by falling back to cache.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Short, user-facing message placed into the published `sync_error`.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::AuthorizationDenied(_) => {
                "Access to activity data was denied. Grant access in settings to resume syncing."
                    .to_string()
            }
            SyncError::TransientNetwork(_) => {
                "Unable to reach the sync service. Showing saved activities.".to_string()
            }
            SyncError::UploadRejected { .. } => "An activity could not be uploaded.".to_string(),
            SyncError::ProviderUnavailable(name) => {
                format!("The {} data source is not available on this device.", name)
            }
            SyncError::Cancelled => String::new(),
            SyncError::Storage(_) | SyncError::Serialization(_) | SyncError::Internal(_) => {
                "Something went wrong while syncing activities.".to_string()
            }
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
