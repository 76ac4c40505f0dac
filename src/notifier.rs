use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{Config, PhoneConfig};
use crate::dispatch::{self, BulkResult, Pacer, Recipient};
use crate::error::NotifyError;
use crate::gateway::{GatewayClient, RemoteState};
use crate::phone::CanonicalPhone;
use crate::templates::{Template, Variables};
use crate::tracker::{ConnectionTracker, LinkStatus};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    pub success: bool,
    /// The phone exactly as the caller supplied it.
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SendResult {
    fn delivered(phone: &str, data: Value) -> Self {
        Self {
            success: true,
            phone: phone.to_string(),
            error: None,
            data: Some(data),
        }
    }

    fn failed(phone: &str, error: String) -> Self {
        Self {
            success: false,
            phone: phone.to_string(),
            error: Some(error),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitOutcome {
    pub status: LinkStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qrcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub connected: bool,
    pub status: String,
    pub phone: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogoutOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives the gateway session and delivers notifications through it.
pub struct Notifier {
    gateway: Arc<dyn GatewayClient>,
    tracker: ConnectionTracker,
    phone: PhoneConfig,
    qr_file: Option<PathBuf>,
    bulk_delay: std::time::Duration,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn GatewayClient>, config: &Config) -> Self {
        Self {
            gateway,
            tracker: ConnectionTracker::new(),
            phone: config.phone.clone(),
            qr_file: config.gateway.qr_file.clone(),
            bulk_delay: config.dispatch.bulk_delay(),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Ask the gateway for its current state and remember it.
    async fn refresh_state(&self) -> RemoteState {
        let remote = self.gateway.state().await;
        self.tracker.observe(&remote);
        remote
    }

    /// Make sure the instance exists and is either linked or waiting for a
    /// QR scan. Failures are reported in the outcome, never raised.
    pub async fn initialize(&self) -> InitOutcome {
        info!("Initializing WhatsApp gateway session");
        match self.try_initialize().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to initialize WhatsApp: {}", e);
                self.tracker.set_status(LinkStatus::Error);
                InitOutcome {
                    status: LinkStatus::Error,
                    message: e.to_string(),
                    qrcode: None,
                }
            }
        }
    }

    async fn try_initialize(&self) -> Result<InitOutcome, NotifyError> {
        let probe = self.gateway.ensure_instance().await?;
        if let Some(remote) = RemoteState::from_connection_state(&probe) {
            self.tracker.observe(&remote);
        }

        if self.refresh_state().await.is_open() {
            info!("WhatsApp is already connected");
            return Ok(InitOutcome {
                status: LinkStatus::Connected,
                message: "WhatsApp is already connected".to_string(),
                qrcode: None,
            });
        }

        let pairing = self.gateway.pair().await?;
        let Some(payload) = pairing.payload() else {
            warn!("Gateway did not return a QR payload");
            self.tracker.set_status(LinkStatus::Error);
            return Ok(InitOutcome {
                status: LinkStatus::Error,
                message: "Gateway did not return a QR code".to_string(),
                qrcode: None,
            });
        };

        if let Some(path) = &self.qr_file {
            if let Err(e) = write_qr_file(path, payload).await {
                warn!("Could not save QR to {}: {}", path.display(), e);
            }
        }

        info!("QR code issued, waiting for a phone to scan it");
        self.tracker.set_status(LinkStatus::AwaitingScan);
        Ok(InitOutcome {
            status: LinkStatus::AwaitingScan,
            message: "Scan the QR code with WhatsApp".to_string(),
            qrcode: Some(payload.to_string()),
        })
    }

    /// Current remote state. Phone and profile name fall back to the last
    /// values the gateway reported when this refresh omits them.
    pub async fn status(&self) -> StatusReport {
        let remote = self.refresh_state().await;
        let known = self.tracker.snapshot();
        StatusReport {
            connected: remote.is_open(),
            status: remote.state,
            phone: remote.phone.or(known.phone),
            name: remote.name.or(known.name),
        }
    }

    /// Deliver `text` to `phone`. Failures come back as data; a dropped
    /// session additionally triggers one re-initialization, but the message
    /// is not re-sent.
    pub async fn send_message(&self, phone: &str, text: &str) -> SendResult {
        match self.deliver(phone, text).await {
            Ok(data) => {
                info!("Message sent to {}", phone);
                SendResult::delivered(phone, data)
            }
            Err(e) => {
                error!("Failed to send message to {}: {}", phone, e);
                if e.is_disconnect() {
                    warn!("Gateway session is down, attempting to reconnect");
                    let outcome = self.initialize().await;
                    info!("Reconnect attempt finished with status {}", outcome.status);
                }
                SendResult::failed(phone, e.to_string())
            }
        }
    }

    async fn deliver(&self, phone: &str, text: &str) -> Result<Value, NotifyError> {
        if !self.refresh_state().await.is_open() {
            return Err(NotifyError::GatewayNotConnected);
        }
        let canonical = CanonicalPhone::normalize(phone, &self.phone)?;
        Ok(self.gateway.send(&canonical.jid(), text).await?)
    }

    /// Render `template_name` and send it. An unknown template fails before
    /// the gateway is contacted.
    pub async fn send_template(
        &self,
        phone: &str,
        template_name: &str,
        vars: &Variables,
    ) -> Result<SendResult, NotifyError> {
        let template: Template = template_name.parse()?;
        Ok(self.send_rendered(phone, template, vars).await)
    }

    pub async fn send_rendered(
        &self,
        phone: &str,
        template: Template,
        vars: &Variables,
    ) -> SendResult {
        let text = template.render(vars);
        self.send_message(phone, &text).await
    }

    /// Send one template to many recipients, one at a time.
    pub async fn send_bulk(
        &self,
        recipients: &[Recipient],
        template_name: &str,
        shared: &Variables,
    ) -> Result<BulkResult, NotifyError> {
        let template: Template = template_name.parse()?;
        Ok(self.send_bulk_template(recipients, template, shared).await)
    }

    pub async fn send_bulk_template(
        &self,
        recipients: &[Recipient],
        template: Template,
        shared: &Variables,
    ) -> BulkResult {
        let mut pacer = Pacer::new(self.bulk_delay);
        dispatch::dispatch(self, &mut pacer, recipients, template, shared).await
    }

    pub async fn logout(&self) -> LogoutOutcome {
        match self.gateway.terminate().await {
            Ok(()) => {
                self.tracker.set_status(LinkStatus::Disconnected);
                info!("WhatsApp session closed");
                LogoutOutcome {
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                error!("Failed to close WhatsApp session: {}", e);
                LogoutOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

async fn write_qr_file(path: &Path, payload: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, payload).await
}
