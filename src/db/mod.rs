// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer: a generic key-value blob store.

pub mod blob;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore, SharedBlobStore};

/// Blob keys as constants.
pub mod keys {
    /// Cached activity list for the active provider
    pub const ACTIVITIES: &str = "activities";
    /// Cached stats aggregate for the active provider
    pub const STATS: &str = "stats";
    /// Upload ledger (persists across process restarts)
    pub const UPLOAD_LEDGER: &str = "upload_ledger";
    /// Selected provider preference
    pub const PROVIDER_PREFERENCE: &str = "provider_preference";
}
