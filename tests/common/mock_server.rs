//! Mock HTTP backend for provider tests.

use mockito::{Matcher, Mock, Server, ServerGuard};
use provider_failover::ProviderConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: Arc<Mutex<ServerGuard>>,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self {
            server: Arc::new(Mutex::new(server)),
            base_url,
        }
    }

    /// An `http` provider config pointing at `path` on this server.
    pub fn provider_config(&self, name: &str, path: &str) -> ProviderConfig {
        ProviderConfig::new(name)
            .with_timeout(Duration::from_secs(2))
            .with_param("base_url", self.base_url.as_str())
            .with_param("path", path)
    }

    pub async fn mock_json_response(&self, path: &str, status: u16, body: &str) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .with_status(status.into())
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Like [`mock_json_response`](Self::mock_json_response), but only matches
    /// requests whose JSON body contains `fields`.
    pub async fn mock_json_matching(
        &self,
        path: &str,
        fields: serde_json::Value,
        body: &str,
    ) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .match_body(Matcher::PartialJson(fields))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    pub async fn mock_error_response(&self, path: &str, status: u16, expected_hits: usize) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .with_status(status.into())
            .with_header("content-type", "application/json")
            .with_body(json!({"error": "unavailable"}).to_string())
            .expect(expected_hits)
            .create_async()
            .await
    }

    pub async fn mock_health(&self, path: &str, status: u16) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("GET", path)
            .with_status(status.into())
            .create_async()
            .await
    }
}
