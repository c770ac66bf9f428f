// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Upload bookkeeping models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remote API version an upload was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(ApiVersion::V1),
            "v2" => Ok(ApiVersion::V2),
            other => Err(format!("unknown api version: {}", other)),
        }
    }
}

/// Ledger entry for one activity.
///
/// Created on the first upload attempt and updated on every attempt after.
/// Only a full local-data wipe removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Activity this entry tracks
    pub activity_id: String,
    /// First successful upload (None = never uploaded)
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Whether the upload carried the heart-rate stream
    pub has_complete_sensor_data: bool,
    pub api_version: ApiVersion,
    /// First attempt, successful or not
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

/// Response of the remote service to an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub has_complete_sensor_data: bool,
}

/// Outcome of pushing a single record through the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Uploaded with every required stream
    Complete,
    /// Uploaded without heart rate; the retry sweep revisits it later
    PartialSensorData,
    /// Already uploaded or abandoned past the retry deadline
    Skipped,
    /// Attempt failed; the record stays unmarked
    Failed,
}
