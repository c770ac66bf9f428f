// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the sync engine.

pub mod activity;
pub mod sensor;
pub mod stats;
pub mod upload;

pub use activity::{ActivityRecord, ActivityType, ProviderType};
pub use sensor::{SensorSample, SensorStreams, StreamType};
pub use stats::StatsSummary;
pub use upload::{ApiVersion, UploadOutcome, UploadRecord, UploadResult};
