use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nirbhay_config::{AlertsConfig, NirbhayConfig};
use nirbhay_core::{Result, Trip};

use crate::gateway::{Fast2SmsGateway, FcmPushGateway, PushGateway, SimulatedGateway, SmsGateway};
use crate::message::{Alert, PUSH_TITLE};

/// Per-channel delivery result. Partial success is normal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub push_sent: bool,
    pub sms_sent: bool,
}

/// Delivers an alert to a trip's guardians.
///
/// Implementations attempt every channel once and report what went through.
/// They never fail and never retry.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, trip: &Trip, alert: &Alert) -> DispatchReport;
}

/// Dispatcher that talks to SMS and push gateways directly.
pub struct GatewayDispatcher {
    sms: Arc<dyn SmsGateway>,
    push: Arc<dyn PushGateway>,
    timeout: Duration,
    prefix: String,
}

impl GatewayDispatcher {
    pub fn new(sms: Arc<dyn SmsGateway>, push: Arc<dyn PushGateway>, config: &AlertsConfig) -> Self {
        Self {
            sms,
            push,
            timeout: Duration::from_secs(config.dispatch_timeout_secs),
            prefix: config.message_prefix.clone(),
        }
    }

    /// Real gateways where keys are configured, simulated (demo mode) otherwise.
    pub fn from_config(config: &NirbhayConfig) -> Self {
        let timeout = Duration::from_secs(config.alerts.dispatch_timeout_secs);
        let sms: Arc<dyn SmsGateway> = match &config.services.fast2sms_api_key {
            Some(key) => Arc::new(Fast2SmsGateway::new(key.clone(), timeout)),
            None => {
                warn!("Fast2SMS key not configured, SMS alerts will be simulated");
                Arc::new(SimulatedGateway::new())
            }
        };
        let push: Arc<dyn PushGateway> = match &config.services.fcm_server_key {
            Some(key) => Arc::new(FcmPushGateway::new(key.clone(), timeout)),
            None => Arc::new(SimulatedGateway::new()),
        };
        Self::new(sms, push, &config.alerts)
    }

    pub fn sms_gateway(&self) -> &str {
        self.sms.name()
    }

    pub fn push_gateway(&self) -> &str {
        self.push.name()
    }

    /// Run one gateway attempt under the dispatch timeout.
    async fn attempt(&self, channel: &str, target: &str, fut: impl Future<Output = Result<()>>) -> bool {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(channel, target, error = %e, "alert delivery failed");
                false
            }
            Err(_) => {
                warn!(channel, target, timeout_secs = self.timeout.as_secs(), "alert delivery timed out");
                false
            }
        }
    }
}

#[async_trait]
impl AlertDispatcher for GatewayDispatcher {
    async fn dispatch(&self, trip: &Trip, alert: &Alert) -> DispatchReport {
        let text = alert.message(&self.prefix);

        let pushes = trip.guardians.iter().filter_map(|g| g.push_token.as_deref()).map(|token| {
            self.attempt("push", token, self.push.send_push(token, PUSH_TITLE, &text))
        });
        let texts = trip
            .guardians
            .iter()
            .map(|g| self.attempt("sms", &g.phone, self.sms.send_sms(&g.phone, &text)));

        // Push and SMS are independent; neither waits on the other's outcome.
        let (push_results, sms_results) = tokio::join!(join_all(pushes), join_all(texts));

        let report = DispatchReport {
            push_sent: push_results.into_iter().any(|ok| ok),
            sms_sent: sms_results.into_iter().any(|ok| ok),
        };
        info!(
            trip_id = %trip.id,
            label = %alert.label,
            push_sent = report.push_sent,
            sms_sent = report.sms_sent,
            "alert dispatched"
        );
        report
    }
}
