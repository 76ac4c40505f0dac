//! Error types for template rendering and gateway delivery.

use thiserror::Error;

/// Failures talking to the messaging gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed before a response arrived
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Gateway answered with a non-success status
    #[error("gateway error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

/// Errors surfaced by the notifier.
///
/// Only `UnknownTemplate` ever escapes a send operation; everything else is
/// folded into a failed `SendResult`.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("template \"{0}\" not found")]
    UnknownTemplate(String),
    #[error("WhatsApp is not connected, initialize it first")]
    GatewayNotConnected,
    #[error("invalid phone number: \"{0}\"")]
    InvalidPhone(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl NotifyError {
    /// Whether this failure means the gateway session dropped, which is the
    /// one case that warrants a reconnect attempt.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NotifyError::GatewayNotConnected => true,
            NotifyError::Gateway(GatewayError::Api { message, .. }) => {
                let message = message.to_lowercase();
                message.contains("not connected") || message.contains("connection closed")
            }
            _ => false,
        }
    }
}
