//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per catalog-server endpoint.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    // ========================================================================
    // Service
    // ========================================================================

    pub async fn get_health(&self) -> Response {
        self.get("/v1/health").await
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// `query` is appended verbatim, e.g. `"violence_max=5&sort=year"`.
    pub async fn search(&self, query: &str) -> Response {
        self.get(&format!("/v1/catalog/search?{}", query)).await
    }

    pub async fn get_entry(&self, natural_key: &str) -> Response {
        self.get(&format!("/v1/catalog/entry/{}", natural_key)).await
    }

    pub async fn get_genres(&self) -> Response {
        self.get("/v1/catalog/genres").await
    }

    // ========================================================================
    // Admin
    // ========================================================================

    pub async fn list_pending_reviews(&self) -> Response {
        self.get("/v1/admin/reviews").await
    }

    pub async fn resolve_review(&self, id: &str, decision: &str, resolved_by: &str) -> Response {
        self.client
            .post(format!("{}/v1/admin/reviews/{}/resolve", self.base_url, id))
            .json(&json!({
                "decision": decision,
                "resolved_by": resolved_by,
            }))
            .send()
            .await
            .expect("Resolve review request failed")
    }

    pub async fn trigger_refresh(&self) -> Response {
        self.client
            .post(format!("{}/v1/admin/refresh", self.base_url))
            .send()
            .await
            .expect("Trigger refresh request failed")
    }

    pub async fn get_refresh_logs(&self, limit: usize) -> Response {
        self.get(&format!("/v1/admin/refresh/logs?limit={}", limit))
            .await
    }

    pub async fn list_jobs(&self) -> Response {
        self.get("/v1/admin/jobs").await
    }

    pub async fn get_job_audit(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/admin/jobs/{}/audit", job_id)).await
    }

    /// Polls the cycle log until `count` cycles are recorded.
    pub async fn wait_for_cycle_count(&self, count: usize) -> Vec<serde_json::Value> {
        let start = std::time::Instant::now();
        loop {
            let logs: Vec<serde_json::Value> = self
                .get_refresh_logs(100)
                .await
                .json()
                .await
                .expect("Invalid cycle log JSON");
            if logs.len() >= count {
                return logs;
            }
            if start.elapsed() > Duration::from_millis(REFRESH_WAIT_TIMEOUT_MS) {
                panic!("Only {} of {} refresh cycles recorded", logs.len(), count);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
