use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// Per-request timeout for every gateway call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// "composing" presence shown to the recipient before the text lands.
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
    #[serde(default = "default_link_preview")]
    pub link_preview: bool,
    /// Where the latest pairing QR payload is written, if anywhere.
    #[serde(default)]
    pub qr_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhoneConfig {
    /// Country calling code prepended to numbers that are too short to be
    /// international (e.g. "58" for Venezuela).
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default = "default_min_international_digits")]
    pub min_international_digits: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Minimum gap between two consecutive bulk sends, in milliseconds.
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub admin_token: String,
    #[serde(default = "default_server_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_instance_name() -> String {
    "roboworks".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_typing_delay_ms() -> u64 {
    1200
}

fn default_link_preview() -> bool {
    true
}

fn default_country_code() -> String {
    "58".to_string()
}

fn default_min_international_digits() -> usize {
    11
}

fn default_bulk_delay_ms() -> u64 {
    1500
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_server_timeout_secs() -> u64 {
    // A bulk dispatch to a whole class can run for minutes.
    600
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            instance_name: default_instance_name(),
            request_timeout_secs: default_request_timeout_secs(),
            typing_delay_ms: default_typing_delay_ms(),
            link_preview: default_link_preview(),
            qr_file: None,
        }
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
            min_international_digits: default_min_international_digits(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bulk_delay_ms: default_bulk_delay_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: String::new(),
            request_timeout_secs: default_server_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DispatchConfig {
    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Environment variables win over file values when set and non-empty.
    /// Takes a lookup function so tests don't have to touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("EVOLUTION_API_URL") {
            self.gateway.base_url = url;
        }
        if let Some(key) = get("EVOLUTION_API_KEY") {
            self.gateway.api_key = key;
        }
        if let Some(token) = get("NOTIFIER_ADMIN_TOKEN") {
            self.server.admin_token = token;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.api_key.is_empty() {
            anyhow::bail!("gateway.api_key is empty (set it in the config or EVOLUTION_API_KEY)");
        }
        if self.gateway.instance_name.is_empty() {
            anyhow::bail!("gateway.instance_name must not be empty");
        }
        if !self
            .phone
            .default_country_code
            .chars()
            .all(|c| c.is_ascii_digit())
        {
            anyhow::bail!(
                "phone.default_country_code must be digits only, got '{}'",
                self.phone.default_country_code
            );
        }
        Ok(())
    }
}
