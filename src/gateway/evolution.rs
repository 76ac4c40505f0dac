//! Evolution API client.
//!
//! Evolution wraps WhatsApp Web behind a REST interface. Every endpoint is
//! scoped to one named instance and authenticated with a static `apikey`
//! header.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{GatewayClient, PairingCode, RemoteState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstanceRequest<'a> {
    instance_name: &'a str,
    token: &'a str,
    qrcode: bool,
    number: Option<&'a str>,
    business: bool,
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
    options: SendOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendOptions {
    delay: u64,
    presence: &'static str,
    link_preview: bool,
}

pub struct EvolutionClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl EvolutionClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_root(), path)
    }

    fn instance_url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.api_root(),
            path,
            self.config.instance_name
        )
    }

    /// Map non-2xx responses to `GatewayError::Api`, keeping the body text.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Body of a successful response. Anything that is not JSON is kept as
    /// a string so a 2xx never turns into an error here.
    async fn json_body(response: reqwest::Response) -> Result<Value, GatewayError> {
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }

    async fn fetch_state(&self) -> Result<Value, GatewayError> {
        let response = self
            .client
            .get(self.instance_url("/instance/connectionState"))
            .header("apikey", &self.config.api_key)
            .send()
            .await?;
        Self::json_body(Self::check(response).await?).await
    }
}

#[async_trait]
impl GatewayClient for EvolutionClient {
    async fn ensure_instance(&self) -> Result<Value, GatewayError> {
        match self.fetch_state().await {
            Ok(existing) if !existing.is_null() => {
                debug!("Instance '{}' already exists", self.config.instance_name);
                return Ok(existing);
            }
            Ok(_) => {}
            Err(e) => debug!("Instance probe failed, creating it: {}", e),
        }

        let request = CreateInstanceRequest {
            instance_name: &self.config.instance_name,
            token: &self.config.api_key,
            qrcode: true,
            number: None,
            business: false,
        };

        let response = self
            .client
            .post(self.url("/instance/create"))
            .header("apikey", &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let created = Self::json_body(Self::check(response).await?).await?;

        info!("Created gateway instance '{}'", self.config.instance_name);
        Ok(created)
    }

    async fn state(&self) -> RemoteState {
        let body = match self.fetch_state().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to fetch connection state: {}", e);
                return RemoteState::disconnected();
            }
        };

        RemoteState::from_connection_state(&body).unwrap_or_else(RemoteState::disconnected)
    }

    async fn pair(&self) -> Result<PairingCode, GatewayError> {
        let response = self
            .client
            .get(self.instance_url("/instance/connect"))
            .header("apikey", &self.config.api_key)
            .send()
            .await?;
        let body = Self::json_body(Self::check(response).await?).await?;
        if body.is_null() {
            return Ok(PairingCode::default());
        }
        serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn send(&self, jid: &str, text: &str) -> Result<Value, GatewayError> {
        let request = SendTextRequest {
            number: jid,
            text,
            options: SendOptions {
                delay: self.config.typing_delay_ms,
                presence: "composing",
                link_preview: self.config.link_preview,
            },
        };

        debug!("Sending WhatsApp text to {}", jid);

        let response = self
            .client
            .post(self.instance_url("/message/sendText"))
            .header("apikey", &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        Self::json_body(Self::check(response).await?).await
    }

    async fn terminate(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.instance_url("/instance/logout"))
            .header("apikey", &self.config.api_key)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
