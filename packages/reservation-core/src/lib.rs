//! Reservation & Settlement Core
//!
//! Mediates between a double-entry ledger (scarce resources as account
//! balances), a relational order store, a short-lived session cache, and a
//! mock payment provider. See `SPEC_FULL.md` at the workspace root for the
//! full design.

pub mod config;
pub mod ledger;
pub mod session;
pub mod orders;
pub mod checkout;
pub mod webhook;
pub mod sweep;
pub mod mock_provider;
pub mod api;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::AppConfig;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ledger transport error: {0}")]
    LedgerTransport(String),

    #[error("ledger batch submission failed: {0}")]
    LedgerBatch(String),

    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("order not found: {0}")]
    OrderNotFound(u128),

    #[error("unknown payment intent")]
    UnknownIntent,

    #[error("sold out")]
    SoldOut,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid webhook signature")]
    BadSignature,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Ticket class. The system models exactly two classes (§3 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketClass {
    A,
    B,
}

impl std::fmt::Display for TicketClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketClass::A => write!(f, "A"),
            TicketClass::B => write!(f, "B"),
        }
    }
}

/// Order lifecycle state (§4.5 state machine). Terminal states are PAID,
/// PAID_UNFULFILLED, FAILED, CANCELED, TIMEOUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Held,
    Paid,
    PaidUnfulfilled,
    Failed,
    Canceled,
    Timeout,
}

impl OrderStatus {
    /// Terminal states are never re-entered (§8 property 3).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::PaidUnfulfilled
                | OrderStatus::Failed
                | OrderStatus::Canceled
                | OrderStatus::Timeout
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Held => "HELD",
            OrderStatus::Paid => "PAID",
            OrderStatus::PaidUnfulfilled => "PAID_UNFULFILLED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

/// Durable order record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u128,
    pub class: TicketClass,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub hold_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ticket_pending_id: Option<u128>,
    pub goodie_pending_id: Option<u128>,
    pub payment_intent_id: Option<String>,
    pub status: OrderStatus,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Short-lived session record backing in-flight checkouts (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub order_id: u128,
    pub class: TicketClass,
    pub ticket_pending_id: u128,
    pub goodie_pending_id: Option<u128>,
    pub hold_expires_at: chrono::DateTime<chrono::Utc>,
}
