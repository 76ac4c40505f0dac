//! One-shot pairing tool.
//!
//! Loads the config, makes sure the gateway instance exists and prints the
//! pairing QR in the terminal so an operator can link the academy phone.
//!
//! With `--wait`: keeps polling the gateway until the phone is linked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use qrcode::{Color, EcLevel, QrCode};

use academy_notifier::config::Config;
use academy_notifier::gateway::EvolutionClient;
use academy_notifier::notifier::Notifier;
use academy_notifier::tracker::LinkStatus;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 60;

/// Render a QR payload with Unicode half blocks, two module rows per line.
fn render_qr(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .context("QR generation failed")?;

    let width = code.width();
    let colors = code.into_colors();
    let is_dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let wait = args.iter().any(|a| a == "--wait");
    let config_path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let gateway = EvolutionClient::new(config.gateway.clone())
        .context("Failed to build gateway HTTP client")?;
    let notifier = Notifier::new(Arc::new(gateway), &config);

    println!("Connecting WhatsApp instance '{}'...", config.gateway.instance_name);
    let outcome = notifier.initialize().await;

    match outcome.status {
        LinkStatus::Connected => {
            println!("✓  {}", outcome.message);
            return Ok(());
        }
        LinkStatus::AwaitingScan => {
            if let Some(payload) = &outcome.qrcode {
                println!("\nScan this QR with WhatsApp (Linked devices → Link a device):\n");
                println!("{}", render_qr(payload)?);
            }
        }
        LinkStatus::Error | LinkStatus::Disconnected => {
            anyhow::bail!("Could not initialize WhatsApp: {}", outcome.message);
        }
    }

    if !wait {
        println!("Run again with --wait to block until the phone is linked.");
        return Ok(());
    }

    for _ in 0..MAX_POLLS {
        tokio::time::sleep(POLL_INTERVAL).await;
        let status = notifier.status().await;
        if status.connected {
            let who = status.name.or(status.phone).unwrap_or_default();
            println!("✓  WhatsApp connected {}", who);
            return Ok(());
        }
    }

    anyhow::bail!("Timed out waiting for the QR to be scanned")
}
