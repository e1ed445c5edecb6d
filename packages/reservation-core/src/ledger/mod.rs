//! Double-entry ledger: wire protocol, transport, auto-batching, and the
//! resource-accounting layer built on top of it (components A and B).

pub mod accounting;
pub mod batcher;
pub mod client;
pub mod memory;
pub mod protocol;

pub use accounting::{HoldResult, PostResult, ResourceAccounting};
pub use batcher::BatcherHandle;
pub use client::{LedgerClient, TcpLedgerClient};
