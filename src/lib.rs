//! WhatsApp notifications for the academy platform, delivered through an
//! Evolution API gateway.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod notifier;
pub mod phone;
pub mod server;
pub mod templates;
pub mod tracker;
