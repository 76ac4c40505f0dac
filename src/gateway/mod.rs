pub mod evolution;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

pub use evolution::EvolutionClient;

/// Connection state as reported by the gateway for our instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RemoteState {
    pub const OPEN: &'static str = "open";
    pub const DISCONNECTED: &'static str = "disconnected";

    pub fn disconnected() -> Self {
        Self {
            state: Self::DISCONNECTED.to_string(),
            phone: None,
            name: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == Self::OPEN
    }

    /// Read a `connectionState` body (`{"instance": {"state", ...}}`).
    /// Returns `None` when the body has no instance object.
    pub fn from_connection_state(body: &Value) -> Option<Self> {
        let instance = body.get("instance")?.as_object()?;
        let field = |key: &str| {
            instance
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Some(Self {
            state: field("state").unwrap_or_else(|| Self::DISCONNECTED.to_string()),
            phone: field("phone"),
            name: field("name"),
        })
    }
}

/// QR material returned when asking the gateway to pair a phone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PairingCode {
    #[serde(default)]
    pub qrcode: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Rendered QR image as a data URL.
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default, rename = "pairingCode")]
    pub pairing_code: Option<String>,
}

impl PairingCode {
    /// The raw payload to encode as a QR, if the gateway sent one.
    pub fn payload(&self) -> Option<&str> {
        self.qrcode
            .as_deref()
            .or(self.code.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Everything the notifier needs from a messaging gateway, scoped to the
/// single instance this process manages.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Create the instance unless the gateway already knows it.
    async fn ensure_instance(&self) -> Result<Value, GatewayError>;

    /// Current connection state. Never fails: transport problems are
    /// reported as a disconnected state.
    async fn state(&self) -> RemoteState;

    /// Request a QR payload to link a phone.
    async fn pair(&self) -> Result<PairingCode, GatewayError>;

    /// Deliver `text` to a recipient JID (`<digits>@s.whatsapp.net`).
    async fn send(&self, jid: &str, text: &str) -> Result<Value, GatewayError>;

    /// Log the linked phone out of the instance.
    async fn terminate(&self) -> Result<(), GatewayError>;
}
