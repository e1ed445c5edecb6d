//! Resource accounting layer (component B).
//!
//! Maps ticket classes, goodies, and the restart counter onto ledger
//! account pairs and expresses hold/post/void as transfer primitives on
//! top of the Batcher.

use sha2::{Digest, Sha256};

use crate::ledger::batcher::BatcherHandle;
use crate::ledger::protocol::{Account, AccountFlags, CreateTransferResult, Transfer, TransferFlags};
use crate::{AppConfig, Result, TicketClass};

/// Chart of accounts. `code` and `id` coincide by convention (both are
/// caller-chosen numeric tags in the wire protocol).
struct ResourcePair {
    ledger: u32,
    budget_id: u128,
    spent_id: u128,
}

const CLASS_A: ResourcePair = ResourcePair {
    ledger: 1,
    budget_id: 2115,
    spent_id: 2110,
};
const CLASS_B: ResourcePair = ResourcePair {
    ledger: 2,
    budget_id: 2215,
    spent_id: 2210,
};
const GOODIES: ResourcePair = ResourcePair {
    ledger: 3,
    budget_id: 2225,
    spent_id: 2220,
};
const RESTART_COUNTER: ResourcePair = ResourcePair {
    ledger: 9,
    budget_id: 1005,
    spent_id: 1000,
};

/// A synthetic operator account funding every budget account at init.
/// Ledger 0 is reserved for this bootstrap use only.
const OPERATOR_ACCOUNT_ID: u128 = 1;

fn class_pair(class: TicketClass) -> &'static ResourcePair {
    match class {
        TicketClass::A => &CLASS_A,
        TicketClass::B => &CLASS_B,
    }
}

/// Derives a deterministic 128-bit transfer id from `(order_id, kind)` so
/// that retried webhooks submit identical ids (§9 "Deterministic transfer
/// ids").
fn derive_transfer_id(order_id: u128, kind: &[u8]) -> u128 {
    let mut hasher = Sha256::new();
    hasher.update(order_id.to_be_bytes());
    hasher.update(kind);
    let digest = hasher.finalize();
    u128::from_be_bytes(digest[0..16].try_into().unwrap())
}

/// Result of attempting a hold at checkout.
#[derive(Debug, Clone, Copy)]
pub struct HoldResult {
    pub ticket_ok: bool,
    pub goodie_ok: bool,
    pub ticket_pending_id: u128,
    pub goodie_pending_id: Option<u128>,
}

/// Result of attempting to post (commit) a hold.
#[derive(Debug, Clone, Copy)]
pub struct PostResult {
    pub ticket_posted: bool,
    pub goodie_posted: bool,
}

pub struct ResourceAccounting {
    batcher: BatcherHandle,
}

impl ResourceAccounting {
    pub fn new(batcher: BatcherHandle) -> Self {
        Self { batcher }
    }

    /// Idempotently creates the fixed account set and funds each budget
    /// account from the synthetic operator account. Safe to call on every
    /// process start.
    pub async fn initialize_supply(&self, config: &AppConfig) -> Result<()> {
        let plan = [
            (&CLASS_A, config.ticket_supply_a as u128),
            (&CLASS_B, config.ticket_supply_b as u128),
            (&GOODIES, config.goodie_supply as u128),
            (&RESTART_COUNTER, 0),
        ];

        for (pair, supply) in plan {
            // The restart counter is a plain tally, not a scarce resource:
            // its budget account carries no non-negative-balance
            // enforcement and is never funded.
            let budget_flags = if pair.ledger == RESTART_COUNTER.ledger {
                AccountFlags::empty()
            } else {
                AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS
            };
            self.batcher
                .create_account(Account {
                    id: pair.budget_id,
                    ledger: pair.ledger,
                    code: pair.budget_id as u16,
                    flags: budget_flags,
                    ..Default::default()
                })
                .await?;
            self.batcher
                .create_account(Account {
                    id: pair.spent_id,
                    ledger: pair.ledger,
                    code: pair.spent_id as u16,
                    ..Default::default()
                })
                .await?;

            if supply > 0 {
                let fund_id = derive_transfer_id(pair.budget_id, b"initial_supply");
                self.batcher
                    .create_transfer(Transfer {
                        id: fund_id,
                        debit_account_id: OPERATOR_ACCOUNT_ID,
                        credit_account_id: pair.budget_id,
                        amount: supply,
                        ledger: pair.ledger,
                        code: pair.budget_id as u16,
                        flags: TransferFlags::empty(),
                        ..Default::default()
                    })
                    .await?;
            }
        }

        // Bump the restart counter once per process start (§9(b)): an
        // immediate, non-pending transfer from its budget to its spent
        // account. The seed is the spent account's current posted balance
        // (its count of prior bumps), so the derived id changes on every
        // start instead of colliding with the previous one.
        let seed = self.restart_seed().await?;
        let bump_id = derive_transfer_id(seed, b"restart_bump");
        let result = self
            .batcher
            .create_transfer(Transfer {
                id: bump_id,
                debit_account_id: RESTART_COUNTER.budget_id,
                credit_account_id: RESTART_COUNTER.spent_id,
                amount: 1,
                ledger: RESTART_COUNTER.ledger,
                code: RESTART_COUNTER.spent_id as u16,
                flags: TransferFlags::empty(),
                ..Default::default()
            })
            .await?;

        match result {
            CreateTransferResult::Ok | CreateTransferResult::Exists => {}
            other => tracing::warn!("restart counter bump did not succeed: {other:?}"),
        }

        Ok(())
    }

    /// Current posted balance of the restart counter's spent account,
    /// i.e. how many prior bumps have landed. Absent on the very first
    /// process start, which reads as zero.
    async fn restart_seed(&self) -> Result<u128> {
        let account = self.batcher.lookup_account(RESTART_COUNTER.spent_id).await?;
        Ok(account.map(|a| a.credits_posted).unwrap_or(0) + 1)
    }

    /// Lightweight ledger reachability probe for the `/health` endpoint.
    pub async fn health_check(&self) -> Result<()> {
        self.batcher.account_balances(RESTART_COUNTER.budget_id, 1).await?;
        Ok(())
    }

    /// Places up to two PENDING transfers: one for the ticket, one for an
    /// optional goodie.
    pub async fn hold(
        &self,
        order_id: u128,
        class: TicketClass,
        want_goodie: bool,
        timeout_s: u32,
    ) -> Result<HoldResult> {
        let pair = class_pair(class);
        let ticket_pending_id = derive_transfer_id(order_id, b"ticket_hold");

        let ticket_result = self
            .batcher
            .create_transfer(Transfer {
                id: ticket_pending_id,
                debit_account_id: pair.budget_id,
                credit_account_id: pair.spent_id,
                amount: 1,
                timeout: timeout_s,
                ledger: pair.ledger,
                code: pair.spent_id as u16,
                flags: TransferFlags::PENDING,
                ..Default::default()
            })
            .await?;

        let ticket_ok = ticket_result.is_success();

        if !ticket_ok {
            return Ok(HoldResult {
                ticket_ok: false,
                goodie_ok: false,
                ticket_pending_id,
                goodie_pending_id: None,
            });
        }

        if !want_goodie {
            return Ok(HoldResult {
                ticket_ok: true,
                goodie_ok: false,
                ticket_pending_id,
                goodie_pending_id: None,
            });
        }

        let goodie_pending_id = derive_transfer_id(order_id, b"goodie_hold");
        let goodie_result = self
            .batcher
            .create_transfer(Transfer {
                id: goodie_pending_id,
                debit_account_id: GOODIES.budget_id,
                credit_account_id: GOODIES.spent_id,
                amount: 1,
                timeout: timeout_s,
                ledger: GOODIES.ledger,
                code: GOODIES.spent_id as u16,
                flags: TransferFlags::PENDING,
                ..Default::default()
            })
            .await?;

        let goodie_ok = goodie_result.is_success();

        Ok(HoldResult {
            ticket_ok: true,
            goodie_ok,
            ticket_pending_id,
            goodie_pending_id: if goodie_ok { Some(goodie_pending_id) } else { None },
        })
    }

    /// Posts the pending ticket (and, if present, goodie) transfer. Falls
    /// back to an immediate transfer when the pending hold has expired.
    pub async fn post(
        &self,
        order_id: u128,
        class: TicketClass,
        ticket_pending_id: u128,
        goodie_pending_id: Option<u128>,
    ) -> Result<PostResult> {
        let pair = class_pair(class);
        let ticket_posted = self
            .post_one(order_id, b"ticket_post", pair.budget_id, pair.spent_id, pair.ledger, ticket_pending_id)
            .await?;

        let goodie_posted = if let Some(goodie_pending_id) = goodie_pending_id {
            self.post_one(
                order_id,
                b"goodie_post",
                GOODIES.budget_id,
                GOODIES.spent_id,
                GOODIES.ledger,
                goodie_pending_id,
            )
            .await?
        } else {
            false
        };

        Ok(PostResult {
            ticket_posted,
            goodie_posted,
        })
    }

    async fn post_one(
        &self,
        order_id: u128,
        kind: &[u8],
        budget_id: u128,
        spent_id: u128,
        ledger: u32,
        pending_id: u128,
    ) -> Result<bool> {
        let post_id = derive_transfer_id(order_id, kind);
        let result = self
            .batcher
            .create_transfer(Transfer {
                id: post_id,
                debit_account_id: budget_id,
                credit_account_id: spent_id,
                amount: 1,
                pending_id,
                ledger,
                code: spent_id as u16,
                flags: TransferFlags::POST_PENDING_TRANSFER,
                ..Default::default()
            })
            .await?;

        match result {
            CreateTransferResult::Ok | CreateTransferResult::Exists | CreateTransferResult::PendingTransferAlreadyPosted => {
                Ok(true)
            }
            CreateTransferResult::PendingTransferExpired => {
                // Auto-retry as an immediate, non-pending transfer with the
                // same derived id (§4.2).
                let retry_result = self
                    .batcher
                    .create_transfer(Transfer {
                        id: post_id,
                        debit_account_id: budget_id,
                        credit_account_id: spent_id,
                        amount: 1,
                        ledger,
                        code: spent_id as u16,
                        flags: TransferFlags::empty(),
                        ..Default::default()
                    })
                    .await?;
                Ok(retry_result.is_success())
            }
            _ => Ok(false),
        }
    }

    /// Voids the pending ticket (and, if present, goodie) transfer.
    /// Already-expired or already-voided pendings are treated as success.
    pub async fn void(
        &self,
        order_id: u128,
        class: TicketClass,
        ticket_pending_id: u128,
        goodie_pending_id: Option<u128>,
    ) -> Result<()> {
        let pair = class_pair(class);
        self.void_one(order_id, b"ticket_void", pair.budget_id, pair.spent_id, pair.ledger, ticket_pending_id)
            .await?;

        if let Some(goodie_pending_id) = goodie_pending_id {
            self.void_one(
                order_id,
                b"goodie_void",
                GOODIES.budget_id,
                GOODIES.spent_id,
                GOODIES.ledger,
                goodie_pending_id,
            )
            .await?;
        }

        Ok(())
    }

    async fn void_one(
        &self,
        order_id: u128,
        kind: &[u8],
        budget_id: u128,
        spent_id: u128,
        ledger: u32,
        pending_id: u128,
    ) -> Result<()> {
        let void_id = derive_transfer_id(order_id, kind);
        let result = self
            .batcher
            .create_transfer(Transfer {
                id: void_id,
                debit_account_id: budget_id,
                credit_account_id: spent_id,
                amount: 1,
                pending_id,
                ledger,
                code: spent_id as u16,
                flags: TransferFlags::VOID_PENDING_TRANSFER,
                ..Default::default()
            })
            .await?;

        match result {
            CreateTransferResult::Ok
            | CreateTransferResult::Exists
            | CreateTransferResult::PendingTransferAlreadyVoided
            | CreateTransferResult::PendingTransferExpired
            | CreateTransferResult::PendingTransferAlreadyPosted => Ok(()),
            other => {
                tracing::warn!("unexpected void result for order {order_id}: {other:?}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_transfer_id_deterministic() {
        let a = derive_transfer_id(42, b"ticket_hold");
        let b = derive_transfer_id(42, b"ticket_hold");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_transfer_id_distinguishes_kind() {
        let hold = derive_transfer_id(42, b"ticket_hold");
        let post = derive_transfer_id(42, b"ticket_post");
        assert_ne!(hold, post);
    }

    #[test]
    fn test_derive_transfer_id_distinguishes_order() {
        let a = derive_transfer_id(1, b"ticket_hold");
        let b = derive_transfer_id(2, b"ticket_hold");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_restart_counter_bumps_on_every_start() {
        use crate::ledger::batcher::BatcherHandle;
        use crate::ledger::memory::InMemoryLedgerClient;
        use crate::ledger::LedgerClient;
        use std::sync::Arc;

        let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
        let batcher = BatcherHandle::spawn(client);
        let accounting = ResourceAccounting::new(batcher);
        let config = AppConfig::default();

        // Three simulated process starts must each land a bump, not just
        // the first.
        accounting.initialize_supply(&config).await.unwrap();
        accounting.initialize_supply(&config).await.unwrap();
        accounting.initialize_supply(&config).await.unwrap();

        let counter = accounting
            .batcher
            .lookup_account(RESTART_COUNTER.spent_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.credits_posted, 3);
    }
}
