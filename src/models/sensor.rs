// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sensor stream models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Time-series attached to an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    HeartRate,
    Cadence,
    Power,
}

impl StreamType {
    /// Streams fetched for every upload. Heart rate is the only required one.
    pub const UPLOADED: [StreamType; 3] = [
        StreamType::HeartRate,
        StreamType::Cadence,
        StreamType::Power,
    ];

    pub fn is_required(&self) -> bool {
        matches!(self, StreamType::HeartRate)
    }
}

/// One `(timestamp, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Streams gathered for one upload, keyed by type. Empty streams are omitted.
pub type SensorStreams = HashMap<StreamType, Vec<SensorSample>>;

/// Returns true if every required stream carries at least one sample.
pub fn has_required_streams(streams: &SensorStreams) -> bool {
    StreamType::UPLOADED
        .iter()
        .filter(|t| t.is_required())
        .all(|t| streams.get(t).is_some_and(|s| !s.is_empty()))
}
