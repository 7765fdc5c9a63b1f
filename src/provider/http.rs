//! JSON-over-HTTP provider variant.
//!
//! Recognised `params`:
//! - `base_url` (required)
//! - `path` (default: `""`)
//! - `method` (default: `"POST"`; `GET` sends parameters as query string)
//! - `health_path` (optional; without it the provider always reports healthy)
//! - `api_key` (optional; sent as `Authorization: Bearer <key>`)
//! - `headers` (optional object of extra string headers)

use super::{Parameters, Provider, ProviderError};
use crate::config::ProviderConfig;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    endpoint: Url,
    method: Method,
    health_url: Option<Url>,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
}

fn param_error(config: &ProviderConfig, key: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(format!("{}.params.{}", config.name, key))
            .with_source("http_provider"),
    )
}

fn join(base: &Url, path: &str) -> std::result::Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let p = format!("{}/", base.path());
        base.set_path(&p);
    }
    base.join(path.trim_start_matches('/'))
}

impl HttpProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let params = &config.params;
        let str_param = |key: &str| params.get(key).and_then(|v| v.as_str());

        let base_url = str_param("base_url")
            .ok_or_else(|| param_error(config, "base_url", "base_url is required"))?;
        let base = Url::parse(base_url)
            .map_err(|e| param_error(config, "base_url", format!("invalid base_url: {}", e)))?;

        let endpoint = join(&base, str_param("path").unwrap_or(""))
            .map_err(|e| param_error(config, "path", format!("invalid path: {}", e)))?;
        let health_url = str_param("health_path")
            .map(|p| join(&base, p))
            .transpose()
            .map_err(|e| param_error(config, "health_path", format!("invalid health_path: {}", e)))?;

        let method = str_param("method")
            .unwrap_or("POST")
            .to_ascii_uppercase()
            .parse::<Method>()
            .map_err(|_| param_error(config, "method", "invalid HTTP method"))?;

        let headers = match params.get("headers") {
            None => Vec::new(),
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            Some(_) => return Err(param_error(config, "headers", "headers must be an object")),
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| param_error(config, "client", format!("failed to build client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            client,
            endpoint,
            method,
            health_url,
            api_key: str_param("api_key").map(str::to_string),
            headers,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        params: &Parameters,
    ) -> std::result::Result<serde_json::Value, ProviderError> {
        let req = self.request(self.method.clone(), self.endpoint.clone());
        let req = if self.method == Method::GET {
            let query: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    let s = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), s)
                })
                .collect();
            req.query(&query)
        } else {
            req.json(params)
        };

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            debug!(
                provider = self.name.as_str(),
                http_status = status.as_u16(),
                "provider returned error status"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
            message: e.to_string(),
        })
    }

    async fn health_check(&self) -> bool {
        let Some(url) = self.health_url.clone() else {
            return true;
        };
        match self.request(Method::GET, url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = self.name.as_str(), error = %e, "health probe failed");
                false
            }
        }
    }
}
