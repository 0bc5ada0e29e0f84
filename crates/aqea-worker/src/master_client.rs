//! HTTP client for the worker→master control plane (spec §6.1), generalized
//! from the teacher's `CallbackClient` progress/complete/error posts into a
//! full register/claim/progress/complete/heartbeat surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MasterError;

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkUnitView {
    pub work_id: String,
    pub language: String,
    pub source: String,
    pub range_start: String,
    pub range_end: String,
    pub estimated_entries: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorItem {
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressRequest {
    pub worker_id: String,
    pub entries_processed: i64,
    pub current_rate: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequest {
    pub worker_id: String,
    pub entries_processed: i64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Idle,
    Working,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub status: HeartbeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_work_id: Option<String>,
}

pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub async fn register(&self, worker_id: Option<&str>) -> Result<RegisterResponse, MasterError> {
        let resp = self
            .http
            .post(format!("{}/api/register", self.base_url))
            .json(&RegisterRequest {
                worker_id: worker_id.map(str::to_string),
            })
            .send()
            .await?;
        handle_response(resp).await
    }

    /// Claims the next pending work unit. `Ok(None)` means 204 (nothing
    /// pending); `Err(MasterError::Conflict)` means the worker already
    /// owns an active unit (HTTP 409).
    pub async fn claim_work(&self, worker_id: &str) -> Result<Option<WorkUnitView>, MasterError> {
        let resp = self
            .http
            .get(format!("{}/api/work", self.base_url))
            .query(&[("worker_id", worker_id)])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let unit: WorkUnitView = handle_response(resp).await?;
        Ok(Some(unit))
    }

    pub async fn report_progress(
        &self,
        work_id: &str,
        req: &ProgressRequest,
    ) -> Result<(), MasterError> {
        let resp = self
            .http
            .post(format!("{}/api/work/{}/progress", self.base_url, work_id))
            .json(req)
            .send()
            .await?;
        let _: serde_json::Value = handle_response(resp).await?;
        Ok(())
    }

    pub async fn complete(&self, work_id: &str, req: &CompleteRequest) -> Result<(), MasterError> {
        let resp = self
            .http
            .post(format!("{}/api/work/{}/complete", self.base_url, work_id))
            .json(req)
            .send()
            .await?;
        let _: serde_json::Value = handle_response(resp).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<(), MasterError> {
        let resp = self
            .http
            .post(format!("{}/api/heartbeat", self.base_url))
            .json(req)
            .send()
            .await?;
        let _: serde_json::Value = handle_response(resp).await?;
        Ok(())
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, MasterError> {
    match resp.status() {
        s if s.is_success() => resp
            .json::<T>()
            .await
            .map_err(|e| MasterError::Malformed(e.to_string())),
        reqwest::StatusCode::CONFLICT => Err(MasterError::Conflict),
        reqwest::StatusCode::SERVICE_UNAVAILABLE => Err(MasterError::ServiceUnavailable),
        s if s.is_server_error() => Err(MasterError::Transient(format!("master returned {s}"))),
        s => Err(MasterError::Malformed(format!("unexpected status {s}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_status_serializes_lowercase() {
        let json = serde_json::to_string(&HeartbeatStatus::Working).unwrap();
        assert_eq!(json, "\"working\"");
    }

    #[test]
    fn progress_request_omits_empty_errors() {
        let req = ProgressRequest {
            worker_id: "w1".to_string(),
            entries_processed: 3,
            current_rate: 12.5,
            errors: Vec::new(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("errors").is_none());
    }
}
