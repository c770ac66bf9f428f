// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP client for the remote synchronization service.
//!
//! Handles:
//! - Fetching recent activities per provider
//! - Uploading locally observed activities with their sensor streams
//! - Fetching the stats aggregate
//! - Mapping HTTP failures onto the engine's error taxonomy

use crate::error::SyncError;
use crate::models::{
    ActivityRecord, ApiVersion, ProviderType, SensorSample, SensorStreams, StatsSummary,
    StreamType, UploadResult,
};
use crate::providers::RemoteSyncService;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Remote sync service over HTTP + JSON.
#[derive(Clone)]
pub struct HttpRemoteService {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteService {
    pub fn new(base_url: &str, api_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let response = self
            .authorize(self.http.get(url).query(query))
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

        self.check_response_json(response, None).await
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
        upload_of: Option<&str>,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, upload_of));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::TransientNetwork(format!("JSON parse error: {}", e)))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
///
/// `upload_of` names the activity when the request was an upload; client
/// errors on uploads are permanent rejections of that payload.
pub fn classify_status(status: StatusCode, body: &str, upload_of: Option<&str>) -> SyncError {
    match status.as_u16() {
        401 | 403 => SyncError::AuthorizationDenied(format!("HTTP {}", status)),
        429 => {
            tracing::warn!("Remote rate limit hit (429)");
            SyncError::TransientNetwork("rate limited".to_string())
        }
        400 | 409 | 413 | 422 if upload_of.is_some() => SyncError::UploadRejected {
            activity_id: upload_of.unwrap_or_default().to_string(),
            reason: format!("HTTP {}: {}", status, body),
        },
        s if s >= 500 => SyncError::TransientNetwork(format!("HTTP {}", status)),
        _ => SyncError::Internal(anyhow::anyhow!("HTTP {}: {}", status, body)),
    }
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    activity: &'a ActivityRecord,
    api_version: ApiVersion,
    streams: HashMap<StreamType, &'a [SensorSample]>,
}

#[derive(Deserialize)]
struct ActivityListResponse {
    activities: Vec<ActivityRecord>,
}

#[async_trait]
impl RemoteSyncService for HttpRemoteService {
    async fn fetch_recent_activities(
        &self,
        provider: ProviderType,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        let url = format!("{}/activities", self.base_url);
        let response: ActivityListResponse = self
            .get_json(
                &url,
                &[
                    ("provider", provider.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response.activities)
    }

    async fn upload_activity(
        &self,
        record: &ActivityRecord,
        streams: &SensorStreams,
        api_version: ApiVersion,
    ) -> Result<UploadResult, SyncError> {
        let url = format!("{}/{}/activities", self.base_url, api_version.as_str());
        let body = UploadRequest {
            activity: record,
            api_version,
            streams: streams
                .iter()
                .map(|(stream, samples)| (*stream, samples.as_slice()))
                .collect(),
        };

        let response = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

        self.check_response_json(response, Some(&record.id)).await
    }

    async fn fetch_stats(
        &self,
        provider: ProviderType,
        days: u32,
    ) -> Result<StatsSummary, SyncError> {
        let url = format!("{}/stats", self.base_url);
        self.get_json(
            &url,
            &[
                ("provider", provider.as_str().to_string()),
                ("days", days.to_string()),
            ],
        )
        .await
    }
}
