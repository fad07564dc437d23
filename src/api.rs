use std::fmt;
use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{GalleryFilter, GalleryResponse, TrackingEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Full-resolution downloads can be tens of megabytes.
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Non-2xx response with the backend's error body already distilled into a
/// user-facing message. Callers can downcast to map specific statuses.
#[derive(Debug)]
pub struct StatusError {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StatusError {}

/// Builds a user-facing error string from a backend error body.
///
/// The backend is inconsistent about its error shape; the convention across
/// all endpoints is `messages[0]`, then `error`, then `message`, then a
/// generic fallback naming the status.
pub fn error_body_message(status: u16, body: &Value, fallback: &str) -> String {
    if let Some(first) = body
        .get("messages")
        .and_then(|m| m.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
    {
        return first.to_string();
    }
    if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
        return err.to_string();
    }
    if let Some(msg) = body.get("message").and_then(|v| v.as_str()) {
        return msg.to_string();
    }
    format!("{fallback}: {status}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub window_seconds: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendOtpResponse {
    pub message: String,
    pub expires_in: u64,
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtpResponse {
    pub message: String,
    pub verified_at: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Contact details handed to the server at the end of registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    pub service_consent: bool,
}

#[derive(Debug, Deserialize)]
struct TrackAck {
    success: bool,
    #[serde(default)]
    message: String,
}

/// Sink for interaction events. The tracker only needs this one call, and
/// tests substitute their own implementation for it.
pub trait Collector: Send + Sync {
    fn submit(&self, event: &TrackingEvent) -> anyhow::Result<()>;
}

/// JSON-over-HTTPS client for the gallery backend.
///
/// Explicitly constructed and shared via `Arc`; there is no global instance.
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { agent, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Public gallery URL for an access code, used for the share action.
    pub fn gallery_url(&self, code: &str) -> String {
        format!("{}/u/{}", self.base_url, code)
    }

    pub fn fetch_gallery(
        &self,
        code: &str,
        filter: GalleryFilter,
    ) -> anyhow::Result<GalleryResponse> {
        let url = format!("{}/api/u/{}", self.base_url, code);
        let resp = self
            .agent
            .get(&url)
            .query("filter", filter.query_value())
            .call()
            .map_err(|e| status_error(e, "Failed to fetch gallery"))?;
        Ok(resp.into_json()?)
    }

    pub fn delete_photo(&self, code: &str, photo_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/api/u/{}/photos/{}", self.base_url, code, photo_id);
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| status_error(e, "Failed to delete photo"))?;
        Ok(())
    }

    pub fn send_otp(&self, email: &str, purpose: &str) -> anyhow::Result<SendOtpResponse> {
        let url = format!("{}/api/otp", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({ "email": email, "purpose": purpose }))
            .map_err(|e| status_error(e, "Failed to send verification code"))?;
        Ok(resp.into_json()?)
    }

    pub fn verify_otp(
        &self,
        email: &str,
        code: &str,
        purpose: &str,
    ) -> anyhow::Result<VerifyOtpResponse> {
        let url = format!("{}/api/otp", self.base_url);
        let resp = self
            .agent
            .put(&url)
            .send_json(serde_json::json!({ "email": email, "code": code, "purpose": purpose }))
            .map_err(|e| status_error(e, "Verification failed"))?;
        Ok(resp.into_json()?)
    }

    pub fn register(&self, request: &RegisterRequest) -> anyhow::Result<RegisterResponse> {
        let url = format!("{}/api/register", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .send_json(serde_json::to_value(request)?)
            .map_err(|e| status_error(e, "Registration failed"))?;
        Ok(resp.into_json()?)
    }

    /// Fetches raw image bytes (thumbnail or full resolution).
    pub fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| status_error(e, "Failed to fetch image"))?;
        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Collector for ApiClient {
    fn submit(&self, event: &TrackingEvent) -> anyhow::Result<()> {
        let url = format!("{}/api/gallery/track", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .send_json(serde_json::to_value(event)?)
            .map_err(|e| status_error(e, "Tracking request failed"))?;
        let ack: TrackAck = resp.into_json()?;
        if !ack.success {
            anyhow::bail!("tracking rejected: {}", ack.message);
        }
        Ok(())
    }
}

fn status_error(err: ureq::Error, fallback: &str) -> anyhow::Error {
    match err {
        ureq::Error::Status(status, resp) => {
            let body: Value = resp.into_json().unwrap_or(Value::Null);
            anyhow::Error::new(StatusError {
                status,
                message: error_body_message(status, &body, fallback),
            })
        }
        ureq::Error::Transport(t) => anyhow::Error::new(t),
    }
}
