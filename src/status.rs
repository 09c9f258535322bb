//! Server status report and the recent-request log behind `GET /`.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Settings;
use crate::error::Error;
use crate::store::{Store, StoreStats};

/// One served request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    /// Resolved client id
    pub client: String,
    /// When the request finished
    pub timestamp: DateTime<Utc>,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Quote served, if any
    pub quote_id: Option<String>,
    /// Response status code
    pub status: u16,
    /// Wall time spent handling the request
    pub processing_time_ms: f64,
}

/// Bounded log of the most recent requests, newest last.
#[derive(Debug)]
pub struct RecentConnections {
    capacity: usize,
    entries: Mutex<VecDeque<ConnectionInfo>>,
}

impl RecentConnections {
    /// Keep at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a request, dropping the oldest when full.
    pub fn record(&self, info: ConnectionInfo) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(info);
        }
    }

    /// Copy of the log, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Application section of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    /// Crate name
    pub name: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Process start
    pub started_at: DateTime<Utc>,
    /// Seconds since start
    pub uptime_seconds: i64,
}

/// Host section of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    /// Operating system
    pub os: &'static str,
    /// CPU architecture
    pub arch: &'static str,
    /// Process id
    pub pid: u32,
}

/// Database section of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    /// Database file, `None` when in memory
    pub path: Option<String>,
    /// Row counts
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// Everything `GET /` reports.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Host
    pub system: SystemInfo,
    /// Application
    pub app: AppInfo,
    /// Quote store
    pub database: DatabaseInfo,
    /// Active settings (secrets omitted)
    pub config: Settings,
    /// Most recent requests, oldest first
    pub recent_connections: Vec<ConnectionInfo>,
}

impl ServerStatus {
    /// Gather the current status.
    pub fn collect(
        started_at: DateTime<Utc>,
        store: &Store,
        settings: &Settings,
        recent: &RecentConnections,
    ) -> Result<Self, Error> {
        Ok(Self {
            system: SystemInfo {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
                pid: std::process::id(),
            },
            app: AppInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                started_at,
                uptime_seconds: (Utc::now() - started_at).num_seconds(),
            },
            database: DatabaseInfo {
                path: store.path().map(|p| p.display().to_string()),
                stats: store.stats()?,
            },
            config: settings.clone(),
            recent_connections: recent.snapshot(),
        })
    }
}
