// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, CORS) may still read their
// own env vars; this module covers the core server settings.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use tracing::warn;

/// Core server configuration.
///
/// Constructed via [`Config::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Base URL clients use to reach this server (download links).
    pub public_base_url: String,
    /// PostgreSQL connection string for chat history.
    pub database_url: Option<String>,
    /// On-disk root for uploaded files.
    pub blob_root: PathBuf,
    /// Secret for signing download URLs. Unset disables signing and
    /// falls back to public object URLs.
    pub url_signing_secret: Option<String>,
    /// Log filter directive (e.g. `info`, `drawbridge_server=debug`).
    pub log_filter: String,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DRAWBRIDGE_HOST` | `0.0.0.0` |
    /// | `DRAWBRIDGE_PORT` | `8080` |
    /// | `DRAWBRIDGE_PUBLIC_BASE_URL` | `http://{host}:{port}` |
    /// | `DRAWBRIDGE_DATABASE_URL` | *(none; history disabled)* |
    /// | `DRAWBRIDGE_BLOB_ROOT` | `data/files` |
    /// | `DRAWBRIDGE_URL_SIGNING_SECRET` | *(none; public fallback)* |
    /// | `DRAWBRIDGE_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DRAWBRIDGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("DRAWBRIDGE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = resolve_listen_addr(&host, port);

        let public_base_url = env("DRAWBRIDGE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{listen_addr}"));

        let database_url = env("DRAWBRIDGE_DATABASE_URL").ok();
        let blob_root =
            env("DRAWBRIDGE_BLOB_ROOT").map(PathBuf::from).unwrap_or_else(|_| "data/files".into());
        let url_signing_secret = env("DRAWBRIDGE_URL_SIGNING_SECRET").ok();

        let log_filter = env("DRAWBRIDGE_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            public_base_url,
            database_url,
            blob_root,
            url_signing_secret,
            log_filter,
        }
    }
}

/// Turn a configured host into a listen address. Accepts literal
/// addresses and hostnames such as `localhost`; an unresolvable host
/// falls back to the wildcard address with a warning.
fn resolve_listen_addr(host: &str, port: u16) -> SocketAddr {
    if let Ok(addr) = format!("{host}:{port}").parse() {
        return addr;
    }
    match (host, port).to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
        Some(addr) => addr,
        None => {
            warn!(%host, "failed to resolve listen host, binding 0.0.0.0 instead");
            SocketAddr::from(([0, 0, 0, 0], port))
        }
    }
}
