//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with
//! zero configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database. When unset the store
    /// picks the platform data directory.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Ed25519 public key of the token issuer (hex-encoded, 64 chars).
    /// Env: `AUTH_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub auth_pubkey: [u8; 32],

    /// Timeout for one push dispatch request, in seconds.
    /// Env: `PUSH_TIMEOUT_SECS`
    /// Default: `10`
    pub push_timeout_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            auth_pubkey: [0u8; 32],
            push_timeout_secs: 10,
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_key) = std::env::var("AUTH_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_PUBKEY, using default (dev-only, rejects all tokens)"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("PUSH_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.push_timeout_secs = n;
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's
        // EnvFilter, so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(input: &str) -> Result<[u8; 32], String> {
    let decoded = hex::decode(input.trim()).map_err(|e| format!("invalid hex: {e}"))?;
    decoded
        .try_into()
        .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))
}
