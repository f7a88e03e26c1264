use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use nirbhay_core::{NirbhayError, Result};

use crate::message::normalize_phone;

pub const FAST2SMS_URL: &str = "https://www.fast2sms.com/dev/bulkV2";
pub const FCM_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Outbound SMS gateway.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &str;

    /// One delivery attempt. No retries.
    async fn send_sms(&self, phone: &str, text: &str) -> Result<()>;
}

/// Outbound push-notification gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn send_push(&self, token: &str, title: &str, body: &str) -> Result<()>;
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn gateway_err(gateway: &str, reason: impl ToString) -> NirbhayError {
    NirbhayError::Gateway {
        gateway: gateway.into(),
        reason: reason.to_string(),
    }
}

// ── Fast2SMS ───────────────────────────────────────────────────

/// SMS via the Fast2SMS bulk API (quick route, form-encoded).
pub struct Fast2SmsGateway {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl Fast2SmsGateway {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_endpoint(api_key, FAST2SMS_URL.into(), timeout)
    }

    /// Point at a different endpoint (staging, local stub).
    pub fn with_endpoint(api_key: String, endpoint: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            endpoint,
        }
    }
}

#[async_trait]
impl SmsGateway for Fast2SmsGateway {
    fn name(&self) -> &str {
        "fast2sms"
    }

    async fn send_sms(&self, phone: &str, text: &str) -> Result<()> {
        let numbers = normalize_phone(phone);
        let form = [
            ("route", "q"),
            ("message", text),
            ("language", "english"),
            ("flash", "0"),
            ("numbers", numbers.as_str()),
        ];

        let resp = self
            .client
            .post(&self.endpoint)
            .header("authorization", self.api_key.as_str())
            .header("cache-control", "no-cache")
            .form(&form)
            .send()
            .await
            .map_err(|e| gateway_err("fast2sms", e))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let accepted = body["return"].as_bool() == Some(true) || body["status_code"].as_u64() == Some(200);
        if !accepted {
            return Err(gateway_err("fast2sms", format!("rejected ({status}): {body}")));
        }
        info!(gateway = "fast2sms", numbers = %numbers, "sms accepted");
        Ok(())
    }
}

// ── FCM ────────────────────────────────────────────────────────

/// Push via the FCM HTTP endpoint with a server key.
pub struct FcmPushGateway {
    client: reqwest::Client,
    server_key: String,
    endpoint: String,
}

impl FcmPushGateway {
    pub fn new(server_key: String, timeout: Duration) -> Self {
        Self::with_endpoint(server_key, FCM_URL.into(), timeout)
    }

    pub fn with_endpoint(server_key: String, endpoint: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            server_key,
            endpoint,
        }
    }
}

#[async_trait]
impl PushGateway for FcmPushGateway {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send_push(&self, token: &str, title: &str, body: &str) -> Result<()> {
        let payload = serde_json::json!({
            "to": token,
            "priority": "high",
            "notification": { "title": title, "body": body },
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("authorization", format!("key={}", self.server_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| gateway_err("fcm", e))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(gateway_err("fcm", format!("send failed: {}", text)));
        }
        Ok(())
    }
}

// ── Simulated ──────────────────────────────────────────────────

/// A message a [`SimulatedGateway`] pretended to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDelivery {
    pub target: String,
    pub text: String,
}

/// Logs instead of sending. Used when no gateway key is configured (demo mode).
#[derive(Clone, Default)]
pub struct SimulatedGateway {
    deliveries: Arc<Mutex<Vec<SimulatedDelivery>>>,
    fail: bool,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose every attempt fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<SimulatedDelivery> {
        self.deliveries.lock().clone()
    }

    fn deliver(&self, channel: &str, target: &str, text: &str) -> Result<()> {
        if self.fail {
            warn!(channel, target, "simulated gateway failure");
            return Err(gateway_err(channel, "simulated failure"));
        }
        info!(channel, target, text, "SIMULATED delivery");
        self.deliveries.lock().push(SimulatedDelivery {
            target: target.into(),
            text: text.into(),
        });
        Ok(())
    }
}

#[async_trait]
impl SmsGateway for SimulatedGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn send_sms(&self, phone: &str, text: &str) -> Result<()> {
        self.deliver("sms", phone, text)
    }
}

#[async_trait]
impl PushGateway for SimulatedGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn send_push(&self, token: &str, title: &str, body: &str) -> Result<()> {
        self.deliver("push", token, &format!("{title}: {body}"))
    }
}
