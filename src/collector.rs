//! HTTP client for the remote collector.
//!
//! Three endpoints: configuration fetch, login and measurement upload.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Collector error types.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Configuration document served by `GET /config/get/`.
///
/// Intervals are in minutes. The probe toggles are optional; absent keys
/// leave the local values untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteConfig {
    pub polling_interval: u64,
    pub measurement_interval: u64,
    pub server_sync_interval: u64,
    pub test_interval: u64,
    pub ping_url: String,
    pub web_url: String,
    #[serde(default)]
    pub throughput_included: Option<bool>,
    #[serde(default)]
    pub ping_included: Option<bool>,
    #[serde(default)]
    pub web_included: Option<bool>,
    #[serde(default)]
    pub dns_included: Option<bool>,
    #[serde(default)]
    pub sms_included: Option<bool>,
}

/// Token and device id returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub device_id: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(rename = "Id")]
    id: serde_json::Value,
}

/// Client for the remote collector.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CollectorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollectorError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current configuration document.
    pub async fn fetch_config(&self) -> Result<RemoteConfig, CollectorError> {
        let url = format!("{}/config/get/", self.base_url);
        let response = self.http.get(&url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(CollectorError::Status(response.status()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| CollectorError::Malformed(e.to_string()))
    }

    /// Exchange credentials for an access token and device id.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials, CollectorError> {
        let url = format!("{}/user/getId/", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(CollectorError::Status(response.status()));
        }

        let body = response.text().await?;
        let parsed: LoginResponse =
            serde_json::from_str(&body).map_err(|e| CollectorError::Malformed(e.to_string()))?;

        // The collector has served the id both as a string and as a number.
        let device_id = match parsed.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(CollectorError::Malformed(format!("unexpected Id: {}", other)));
            }
        };

        Ok(Credentials {
            access_token: parsed.access_token,
            device_id,
        })
    }

    /// Upload a measurement batch. Only 200 and 201 count as accepted.
    pub async fn upload<T: Serialize + ?Sized>(
        &self,
        token: &str,
        payload: &T,
    ) -> Result<StatusCode, CollectorError> {
        let url = format!("{}/data/android/upload/", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.status()),
            other => Err(CollectorError::Status(other)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, routing::post, Json, Router};
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_config_parses_document() {
        let router = Router::new().route(
            "/config/get/",
            get(|| async {
                Json(json!({
                    "polling_interval": 60,
                    "measurement_interval": 1,
                    "server_sync_interval": 10,
                    "test_interval": 5,
                    "ping_url": "example.com",
                    "web_url": "https://example.com",
                    "sms_included": false
                }))
            }),
        );
        let base = testing::serve(router).await;
        let client = CollectorClient::new(&base, Duration::from_secs(2)).unwrap();

        let cfg = client.fetch_config().await.unwrap();
        assert_eq!(cfg.measurement_interval, 1);
        assert_eq!(cfg.ping_url, "example.com");
        assert_eq!(cfg.sms_included, Some(false));
        assert_eq!(cfg.ping_included, None);
    }

    #[tokio::test]
    async fn test_fetch_config_rejects_non_200() {
        let router = Router::new().route(
            "/config/get/",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "busy") }),
        );
        let base = testing::serve(router).await;
        let client = CollectorClient::new(&base, Duration::from_secs(2)).unwrap();

        match client.fetch_config().await {
            Err(CollectorError::Status(s)) => assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_accepts_numeric_id() {
        let router = Router::new().route(
            "/user/getId/",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["email"], "user@example.com");
                Json(json!({"access_token": "tok", "Id": 42}))
            }),
        );
        let base = testing::serve(router).await;
        let client = CollectorClient::new(&base, Duration::from_secs(2)).unwrap();

        let creds = client.login("user@example.com", "secret").await.unwrap();
        assert_eq!(creds.access_token, "tok");
        assert_eq!(creds.device_id, "42");
    }

    #[tokio::test]
    async fn test_login_failure_yields_error() {
        let router = Router::new().route(
            "/user/getId/",
            post(|| async { (AxumStatus::UNAUTHORIZED, "nope") }),
        );
        let base = testing::serve(router).await;
        let client = CollectorClient::new(&base, Duration::from_secs(2)).unwrap();

        assert!(client.login("user@example.com", "wrong").await.is_err());
    }
}
