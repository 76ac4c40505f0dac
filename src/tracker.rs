use std::fmt;
use std::sync::RwLock;

use serde::Serialize;

use crate::gateway::RemoteState;

/// Locally observed state of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    AwaitingScan,
    Connected,
    Error,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::AwaitingScan => write!(f, "awaiting_scan"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub status: LinkStatus,
    pub phone: Option<String>,
    pub name: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            phone: None,
            name: None,
        }
    }
}

/// Advisory, last-write-wins memory of the gateway session. Send paths
/// always re-check the gateway instead of trusting this.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    inner: RwLock<Snapshot>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn status(&self) -> LinkStatus {
        self.snapshot().status
    }

    pub fn set_status(&self, status: LinkStatus) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.status = status;
    }

    /// Overwrite with a freshly fetched remote state. Phone and name are
    /// only replaced when the gateway reports them.
    pub fn observe(&self, remote: &RemoteState) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.status = if remote.is_open() {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        };
        if remote.phone.is_some() {
            guard.phone = remote.phone.clone();
        }
        if remote.name.is_some() {
            guard.name = remote.name.clone();
        }
    }
}
