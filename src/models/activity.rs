// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity record model shared by every provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Source of activity data. Exactly one provider is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export, export_to = "bindings/"))]
pub enum ProviderType {
    /// On-device platform sensor store
    PlatformSensor,
    /// First third-party cloud fitness service
    ProviderA,
    /// Second third-party cloud fitness service
    ProviderB,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::PlatformSensor => "platform_sensor",
            ProviderType::ProviderA => "provider_a",
            ProviderType::ProviderB => "provider_b",
        }
    }

    /// Cloud providers sync to the remote service on their own; the engine
    /// only pulls from it.
    pub fn is_cloud(&self) -> bool {
        !matches!(self, ProviderType::PlatformSensor)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform_sensor" => Ok(ProviderType::PlatformSensor),
            "provider_a" => Ok(ProviderType::ProviderA),
            "provider_b" => Ok(ProviderType::ProviderB),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Kind of physical activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export, export_to = "bindings/"))]
pub enum ActivityType {
    Run,
    Ride,
    Walk,
    Hike,
    Swim,
    Strength,
    Yoga,
    #[serde(other)]
    Other,
}

/// One completed physical activity.
///
/// Immutable once fetched; a re-fetch may supersede a record with the same
/// `id` but never edits it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(export, export_to = "bindings/"))]
pub struct ActivityRecord {
    /// Opaque identifier, stable across syncs
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub activity_type: ActivityType,
    /// Distance in meters (absent for stationary activities)
    pub distance_meters: Option<f64>,
    pub duration_seconds: f64,
    pub provider_origin: ProviderType,
    /// Version of the provider payload this record was built from
    pub raw_payload_version: u32,
}

impl ActivityRecord {
    /// Returns true if the activity started inside `[from, to]`.
    pub fn started_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start >= from && self.start <= to
    }
}
