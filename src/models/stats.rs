// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity statistics aggregate served by the remote service.
//!
//! Slow-changing, so it is cached for much longer than the activity list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{ActivityRecord, ActivityType};

/// Aggregate over the last `days` days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Window the aggregate covers
    pub days: u32,
    #[serde(default)]
    pub total_activities: u32,
    #[serde(default)]
    pub total_distance_meters: f64,
    #[serde(default)]
    pub total_duration_seconds: f64,
    /// Activity count per type
    #[serde(default)]
    pub activities_by_type: HashMap<ActivityType, u32>,
}

impl StatsSummary {
    /// Empty aggregate for a window.
    pub fn empty(days: u32) -> Self {
        Self {
            days,
            total_activities: 0,
            total_distance_meters: 0.0,
            total_duration_seconds: 0.0,
            activities_by_type: HashMap::new(),
        }
    }

    /// Build an aggregate locally from records. Used as an offline fallback
    /// when the remote stats endpoint is unreachable and nothing is cached.
    pub fn from_records(days: u32, records: &[ActivityRecord]) -> Self {
        let mut stats = Self::empty(days);
        for record in records {
            stats.total_activities += 1;
            stats.total_distance_meters += record.distance_meters.unwrap_or(0.0);
            stats.total_duration_seconds += record.duration_seconds;
            *stats
                .activities_by_type
                .entry(record.activity_type)
                .or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderType;
    use chrono::{Duration, Utc};

    fn record(id: &str, activity_type: ActivityType, distance: Option<f64>) -> ActivityRecord {
        let start = Utc::now() - Duration::hours(2);
        ActivityRecord {
            id: id.to_string(),
            start,
            end: start + Duration::minutes(45),
            activity_type,
            distance_meters: distance,
            duration_seconds: 2700.0,
            provider_origin: ProviderType::ProviderA,
            raw_payload_version: 1,
        }
    }

    #[test]
    fn from_records_sums_distance_and_counts_types() {
        let records = vec![
            record("a", ActivityType::Run, Some(5000.0)),
            record("b", ActivityType::Run, Some(8000.0)),
            record("c", ActivityType::Yoga, None),
        ];

        let stats = StatsSummary::from_records(30, &records);

        assert_eq!(stats.total_activities, 3);
        assert_eq!(stats.total_distance_meters, 13000.0);
        assert_eq!(stats.total_duration_seconds, 8100.0);
        assert_eq!(stats.activities_by_type.get(&ActivityType::Run), Some(&2));
        assert_eq!(stats.activities_by_type.get(&ActivityType::Yoga), Some(&1));
    }

    #[test]
    fn missing_fields_default_when_deserializing() {
        let stats: StatsSummary = serde_json::from_str(r#"{"days": 7}"#).unwrap();
        assert_eq!(stats, StatsSummary::empty(7));
    }
}
