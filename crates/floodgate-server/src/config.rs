//! Server configuration for Floodgate.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `FLOODGATE_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Store backend type.
    pub store_backend: StoreBackendType,
    /// Log level filter (e.g. `info`, `debug`, `warn`).
    pub log_level: String,
    /// Public base URL of this service, used to build the scanner callback
    /// URL. Callbacks are disabled when unset.
    pub public_url: Option<String>,
    /// Whether the scanner callback route is mounted and advertised.
    pub enable_callback: bool,
    /// Lease duration `T` for scheduler locks.
    pub lock_timeout: Duration,
    /// Lease refresh interval `R`, with `R < T/2`.
    pub lock_refresh_interval: Duration,
    /// Cadence of the lock sweep and the upload sweep task.
    pub sweep_interval: Duration,
    /// Age after which an in-flight upload is re-reconciled by the sweep.
    pub upload_stale_after: Duration,
    /// Maximum accepted upload size in bytes.
    pub max_file_size: i64,
    /// Accepted MIME types.
    pub allowed_mime_types: Vec<String>,
    /// Accepted archive-entry extensions, dot-prefixed.
    pub allowed_archive_extensions: Vec<String>,
    /// Presigned download URL lifetime.
    pub download_url_ttl: Duration,
    /// Scan service base URL.
    pub scan_service_url: String,
    /// Scan client per-request timeout.
    pub scan_service_timeout: Duration,
    /// Object-store bucket for scanned files.
    pub storage_bucket: String,
    /// Key prefix within the bucket.
    pub storage_path_prefix: Option<String>,
    /// Object-store endpoint override for local mode.
    pub storage_endpoint: Option<String>,
    /// Object-store region.
    pub storage_region: String,
    /// How long handlers get to drain on shutdown.
    pub shutdown_grace: Duration,
}

/// Supported store backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackendType {
    /// In-memory (single replica, data lost on restart). The object store
    /// and project sink are in-memory too.
    Memory,
    /// PostgreSQL (the production default; required for multi-replica
    /// scheduling).
    Postgres { url: String },
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ms),
    )
}

fn env_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_secs),
    )
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Split a comma-separated list, trimming whitespace and dropping empties.
pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

const DEFAULT_MIME_TYPES: &str = "application/pdf,application/msword,\
     application/vnd.openxmlformats-officedocument.wordprocessingml.document,\
     application/vnd.ms-excel,\
     application/vnd.openxmlformats-officedocument.spreadsheetml.sheet,\
     image/jpeg,image/png,application/zip,application/x-zip-compressed";

const DEFAULT_ARCHIVE_EXTENSIONS: &str = ".pdf,.doc,.docx,.xls,.xlsx,.jpg,.jpeg,.png";

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `FLOODGATE_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8080`)
    /// - `FLOODGATE_STORE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — PostgreSQL connection string (required when `FLOODGATE_STORE=postgres`)
    /// - `FLOODGATE_LOG_LEVEL` — log filter (default: `info`)
    /// - `FLOODGATE_PUBLIC_URL` — public base URL for scanner callbacks (optional)
    /// - `FLOODGATE_ENABLE_CALLBACK` — mount the callback route (default: `true`)
    /// - `FLOODGATE_LOCK_TIMEOUT_MS` — lease duration (default: `300000`)
    /// - `FLOODGATE_LOCK_REFRESH_INTERVAL_MS` — refresher interval (default: `60000`)
    /// - `FLOODGATE_SWEEP_INTERVAL_MS` — sweep cadence (default: `3600000`)
    /// - `FLOODGATE_UPLOAD_STALE_AFTER_SECS` — in-flight age before sweep (default: `86400`)
    /// - `FLOODGATE_MAX_FILE_SIZE` — upload size cap in bytes (default: 100 MiB)
    /// - `FLOODGATE_ALLOWED_MIME_TYPES` — comma-separated allow-list
    /// - `FLOODGATE_ALLOWED_ARCHIVE_EXTENSIONS` — comma-separated, dot-prefixed
    /// - `FLOODGATE_DOWNLOAD_URL_TTL_SECS` — presigned URL expiry (default: `900`)
    /// - `FLOODGATE_SCAN_SERVICE_URL` — scan service base URL
    /// - `FLOODGATE_SCAN_SERVICE_TIMEOUT_MS` — scan client timeout (default: `10000`)
    /// - `FLOODGATE_STORAGE_BUCKET` — object-store bucket (default: `floodgate-uploads`)
    /// - `FLOODGATE_STORAGE_PATH_PREFIX` — key prefix (optional)
    /// - `FLOODGATE_STORAGE_ENDPOINT` — endpoint override for local mode (optional)
    /// - `FLOODGATE_STORAGE_REGION` — region (default: `eu-west-1`)
    /// - `FLOODGATE_SHUTDOWN_GRACE_SECS` — handler drain grace (default: `10`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("FLOODGATE_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8080);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8080))
        };

        let store_backend = match env_string("FLOODGATE_STORE", "memory").to_lowercase().as_str() {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/floodgate".to_owned());
                StoreBackendType::Postgres { url }
            }
            _ => StoreBackendType::Memory,
        };

        let public_url = std::env::var("FLOODGATE_PUBLIC_URL")
            .ok()
            .map(|u| u.trim_end_matches('/').to_owned());

        Self {
            bind_addr,
            store_backend,
            log_level: env_string("FLOODGATE_LOG_LEVEL", "info"),
            public_url,
            enable_callback: env_bool("FLOODGATE_ENABLE_CALLBACK", true),
            lock_timeout: env_ms("FLOODGATE_LOCK_TIMEOUT_MS", 300_000),
            lock_refresh_interval: env_ms("FLOODGATE_LOCK_REFRESH_INTERVAL_MS", 60_000),
            sweep_interval: env_ms("FLOODGATE_SWEEP_INTERVAL_MS", 3_600_000),
            upload_stale_after: env_secs("FLOODGATE_UPLOAD_STALE_AFTER_SECS", 86_400),
            max_file_size: std::env::var("FLOODGATE_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100 * 1024 * 1024),
            allowed_mime_types: split_csv(&env_string(
                "FLOODGATE_ALLOWED_MIME_TYPES",
                DEFAULT_MIME_TYPES,
            )),
            allowed_archive_extensions: split_csv(&env_string(
                "FLOODGATE_ALLOWED_ARCHIVE_EXTENSIONS",
                DEFAULT_ARCHIVE_EXTENSIONS,
            )),
            download_url_ttl: env_secs("FLOODGATE_DOWNLOAD_URL_TTL_SECS", 900),
            scan_service_url: env_string("FLOODGATE_SCAN_SERVICE_URL", "http://localhost:9000"),
            scan_service_timeout: env_ms("FLOODGATE_SCAN_SERVICE_TIMEOUT_MS", 10_000),
            storage_bucket: env_string("FLOODGATE_STORAGE_BUCKET", "floodgate-uploads"),
            storage_path_prefix: std::env::var("FLOODGATE_STORAGE_PATH_PREFIX")
                .ok()
                .filter(|p| !p.is_empty()),
            storage_endpoint: std::env::var("FLOODGATE_STORAGE_ENDPOINT").ok(),
            storage_region: env_string("FLOODGATE_STORAGE_REGION", "eu-west-1"),
            shutdown_grace: env_secs("FLOODGATE_SHUTDOWN_GRACE_SECS", 10),
        }
    }

    /// The callback URL advertised to the scan service, when callbacks are
    /// enabled and the public URL is known.
    #[must_use]
    pub fn callback_url(&self) -> Option<String> {
        if !self.enable_callback {
            return None;
        }
        self.public_url
            .as_ref()
            .map(|base| format!("{base}/file-uploads/callback"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_csv(" application/pdf , image/png ,, "),
            vec!["application/pdf", "image/png"]
        );
        assert!(split_csv("").is_empty());
    }

    #[test]
    fn callback_url_requires_public_url_and_flag() {
        let mut config = ServerConfig::from_env();
        config.enable_callback = true;
        config.public_url = Some("https://floodgate.example".to_owned());
        assert_eq!(
            config.callback_url().as_deref(),
            Some("https://floodgate.example/file-uploads/callback")
        );

        config.enable_callback = false;
        assert_eq!(config.callback_url(), None);

        config.enable_callback = true;
        config.public_url = None;
        assert_eq!(config.callback_url(), None);
    }
}
