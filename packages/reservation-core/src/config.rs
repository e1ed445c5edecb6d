//! Environment-driven configuration.
//!
//! Mirrors `MonitorConfig` in the monitoring engine this core is grounded
//! on: a single struct with a `Default` impl for local development and an
//! `from_env()` constructor read once at process start (never lazily in a
//! handler, per the "Global state" design note).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string for the Order Store.
    pub database_url: String,
    /// Redis connection string for the Reservation Session Store. When
    /// absent, the in-memory session store is used instead (single-process
    /// mode).
    pub session_store_url: Option<String>,
    /// `host:port` of the ledger service.
    pub tb_address: String,
    /// Base URL of the mock payment provider's webhook sink. When unset,
    /// the mock provider calls the webhook handler in-process.
    pub mock_webhook_url: Option<String>,
    /// Hold timeout in seconds (`PENDING` transfer timeout).
    pub hold_timeout_seconds: u32,
    /// Grace window added to `hold_expires_at` before the sweep considers
    /// an order abandoned (§9 Open Question (c), default 30s).
    pub sweep_grace_seconds: u32,
    /// Cadence of the timeout-sweep background task, in seconds.
    pub sweep_interval_seconds: u64,
    /// Total supply of goodies.
    pub goodie_supply: u64,
    /// Total supply of class A tickets.
    pub ticket_supply_a: u64,
    /// Total supply of class B tickets.
    pub ticket_supply_b: u64,
    /// Reserved for an external admin surface; not read by any route in
    /// this core (admin listing/basic-auth are explicit Non-goals).
    pub admin_basic_auth: Option<String>,
    /// Shared secret for HMAC-SHA256 webhook signature verification.
    pub webhook_secret: String,
    /// Bind address for the HTTP API.
    pub api_bind_address: String,
    /// CORS allowed origin; falls back to allow-any with a warning in dev.
    pub allowed_origin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/reservations".to_string(),
            session_store_url: None,
            tb_address: "127.0.0.1:3000".to_string(),
            mock_webhook_url: None,
            hold_timeout_seconds: 300,
            sweep_grace_seconds: 30,
            sweep_interval_seconds: 10,
            goodie_supply: 100,
            ticket_supply_a: 1000,
            ticket_supply_b: 1000,
            admin_basic_auth: None,
            webhook_secret: "dev-secret-change-me".to_string(),
            api_bind_address: "0.0.0.0:8080".to_string(),
            allowed_origin: None,
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to
    /// `Default` for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            session_store_url: std::env::var("SESSION_STORE_URL").ok(),
            tb_address: std::env::var("TB_ADDRESS").unwrap_or(defaults.tb_address),
            mock_webhook_url: std::env::var("MOCK_WEBHOOK_URL").ok(),
            hold_timeout_seconds: std::env::var("HOLD_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.hold_timeout_seconds),
            sweep_grace_seconds: std::env::var("SWEEP_GRACE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_grace_seconds),
            sweep_interval_seconds: std::env::var("SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval_seconds),
            goodie_supply: std::env::var("GOODIE_SUPPLY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.goodie_supply),
            ticket_supply_a: std::env::var("TICKET_SUPPLY_A")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ticket_supply_a),
            ticket_supply_b: std::env::var("TICKET_SUPPLY_B")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ticket_supply_b),
            admin_basic_auth: std::env::var("ADMIN_BASIC_AUTH").ok(),
            webhook_secret: std::env::var("WEBHOOK_SECRET").unwrap_or(defaults.webhook_secret),
            api_bind_address: std::env::var("API_BIND_ADDRESS").unwrap_or(defaults.api_bind_address),
            allowed_origin: std::env::var("ALLOWED_ORIGIN")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.hold_timeout_seconds, 300);
        assert_eq!(config.goodie_supply, 100);
        assert!(config.session_store_url.is_none());
    }
}
