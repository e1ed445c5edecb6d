//! In-memory ledger test double.
//!
//! Implements enough of the real ledger's account/transfer/pending
//! semantics — non-negative budget balances, pending expiry, idempotent
//! duplicate ids — to drive the `tests/` scenario suite without a real
//! ledger service. Grounded on the `dashmap`-backed concurrent state style
//! already used elsewhere in this core (`session::InMemorySessionStore`).

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::time::{Duration, Instant};

use crate::ledger::client::LedgerClient;
use crate::ledger::protocol::{
    Account, AccountBalance, AccountFlags, CreateAccountResult, CreateTransferResult, Transfer,
    TransferFlags,
};
use crate::Result;

struct PendingEntry {
    debit_account_id: u128,
    credit_account_id: u128,
    amount: u128,
    created_at: Instant,
    timeout: Duration,
}

/// In-memory stand-in for the ledger service.
pub struct InMemoryLedgerClient {
    accounts: DashMap<u128, Account>,
    pending: DashMap<u128, PendingEntry>,
    posted_pending_ids: DashSet<u128>,
    voided_pending_ids: DashSet<u128>,
    committed_transfer_ids: DashSet<u128>,
}

impl Default for InMemoryLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerClient {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            pending: DashMap::new(),
            posted_pending_ids: DashSet::new(),
            voided_pending_ids: DashSet::new(),
            committed_transfer_ids: DashSet::new(),
        }
    }

    fn is_expired(entry: &PendingEntry) -> bool {
        entry.created_at.elapsed() > entry.timeout
    }

    fn release(&self, entry: &PendingEntry) {
        if let Some(mut debit) = self.accounts.get_mut(&entry.debit_account_id) {
            debit.debits_pending = debit.debits_pending.saturating_sub(entry.amount);
        }
        if let Some(mut credit) = self.accounts.get_mut(&entry.credit_account_id) {
            credit.credits_pending = credit.credits_pending.saturating_sub(entry.amount);
        }
    }

    fn settle(&self, entry: &PendingEntry) {
        if let Some(mut debit) = self.accounts.get_mut(&entry.debit_account_id) {
            debit.debits_pending = debit.debits_pending.saturating_sub(entry.amount);
            debit.debits_posted += entry.amount;
        }
        if let Some(mut credit) = self.accounts.get_mut(&entry.credit_account_id) {
            credit.credits_pending = credit.credits_pending.saturating_sub(entry.amount);
            credit.credits_posted += entry.amount;
        }
    }

    fn create_pending(&self, t: &Transfer) -> CreateTransferResult {
        let Some(debit) = self.accounts.get(&t.debit_account_id) else {
            return CreateTransferResult::DebitAccountNotFound;
        };
        let Some(_credit) = self.accounts.get(&t.credit_account_id) else {
            return CreateTransferResult::CreditAccountNotFound;
        };
        if debit.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS)
            && debit.available_balance() < t.amount as i128
        {
            return CreateTransferResult::ExceedsCredits;
        }
        drop(debit);

        self.accounts.get_mut(&t.debit_account_id).unwrap().debits_pending += t.amount;
        self.accounts.get_mut(&t.credit_account_id).unwrap().credits_pending += t.amount;

        self.pending.insert(
            t.id,
            PendingEntry {
                debit_account_id: t.debit_account_id,
                credit_account_id: t.credit_account_id,
                amount: t.amount,
                created_at: Instant::now(),
                timeout: Duration::from_secs(t.timeout as u64),
            },
        );
        self.committed_transfer_ids.insert(t.id);
        CreateTransferResult::Ok
    }

    fn post_pending(&self, t: &Transfer) -> CreateTransferResult {
        match self.pending.remove(&t.pending_id) {
            Some((_, entry)) => {
                if Self::is_expired(&entry) {
                    self.release(&entry);
                    CreateTransferResult::PendingTransferExpired
                } else {
                    self.settle(&entry);
                    self.posted_pending_ids.insert(t.pending_id);
                    self.committed_transfer_ids.insert(t.id);
                    CreateTransferResult::Ok
                }
            }
            None => {
                if self.posted_pending_ids.contains(&t.pending_id) {
                    CreateTransferResult::PendingTransferAlreadyPosted
                } else if self.voided_pending_ids.contains(&t.pending_id) {
                    CreateTransferResult::PendingTransferAlreadyVoided
                } else {
                    CreateTransferResult::PendingTransferNotFound
                }
            }
        }
    }

    fn void_pending(&self, t: &Transfer) -> CreateTransferResult {
        match self.pending.remove(&t.pending_id) {
            Some((_, entry)) => {
                self.release(&entry);
                self.voided_pending_ids.insert(t.pending_id);
                self.committed_transfer_ids.insert(t.id);
                CreateTransferResult::Ok
            }
            None => {
                if self.voided_pending_ids.contains(&t.pending_id) {
                    CreateTransferResult::Ok
                } else if self.posted_pending_ids.contains(&t.pending_id) {
                    CreateTransferResult::PendingTransferAlreadyPosted
                } else {
                    CreateTransferResult::PendingTransferNotFound
                }
            }
        }
    }

    fn create_immediate(&self, t: &Transfer) -> CreateTransferResult {
        let Some(debit) = self.accounts.get(&t.debit_account_id) else {
            return CreateTransferResult::DebitAccountNotFound;
        };
        if self.accounts.get(&t.credit_account_id).is_none() {
            return CreateTransferResult::CreditAccountNotFound;
        }
        if debit.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS)
            && debit.available_balance() < t.amount as i128
        {
            return CreateTransferResult::ExceedsCredits;
        }
        drop(debit);

        self.accounts.get_mut(&t.debit_account_id).unwrap().debits_posted += t.amount;
        self.accounts.get_mut(&t.credit_account_id).unwrap().credits_posted += t.amount;
        self.committed_transfer_ids.insert(t.id);
        CreateTransferResult::Ok
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedgerClient {
    async fn create_accounts(&self, items: Vec<Account>) -> Result<Vec<CreateAccountResult>> {
        let mut results = Vec::with_capacity(items.len());
        for a in items {
            if let Some(existing) = self.accounts.get(&a.id) {
                if existing.ledger == a.ledger && existing.code == a.code && existing.flags == a.flags {
                    results.push(CreateAccountResult::Exists);
                } else {
                    results.push(CreateAccountResult::ExistsWithDifferentFlags);
                }
                continue;
            }
            if a.id == 0 {
                results.push(CreateAccountResult::IdMustNotBeZero);
                continue;
            }
            if a.ledger == 0 {
                results.push(CreateAccountResult::LedgerMustNotBeZero);
                continue;
            }
            if a.code == 0 {
                results.push(CreateAccountResult::CodeMustNotBeZero);
                continue;
            }
            self.accounts.insert(a.id, a);
            results.push(CreateAccountResult::Ok);
        }
        Ok(results)
    }

    async fn create_transfers(&self, items: Vec<Transfer>) -> Result<Vec<CreateTransferResult>> {
        let mut results = Vec::with_capacity(items.len());
        for t in items {
            if self.committed_transfer_ids.contains(&t.id) {
                results.push(CreateTransferResult::Exists);
                continue;
            }
            let result = if t.flags.contains(TransferFlags::PENDING) {
                self.create_pending(&t)
            } else if t.flags.contains(TransferFlags::POST_PENDING_TRANSFER) {
                self.post_pending(&t)
            } else if t.flags.contains(TransferFlags::VOID_PENDING_TRANSFER) {
                self.void_pending(&t)
            } else {
                self.create_immediate(&t)
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn lookup_accounts(&self, ids: Vec<u128>) -> Result<Vec<Option<Account>>> {
        Ok(ids.iter().map(|id| self.accounts.get(id).map(|a| *a)).collect())
    }

    async fn lookup_transfers(&self, _ids: Vec<u128>) -> Result<Vec<Option<Transfer>>> {
        // Not exercised: the accounting layer never needs to re-read a
        // transfer it submitted, only account balances.
        Ok(Vec::new())
    }

    async fn get_account_balances(&self, id: u128, _limit: u32) -> Result<Vec<AccountBalance>> {
        Ok(self
            .accounts
            .get(&id)
            .map(|a| {
                vec![AccountBalance {
                    debits_pending: a.debits_pending,
                    debits_posted: a.debits_posted,
                    credits_pending: a.credits_pending,
                    credits_posted: a.credits_posted,
                    timestamp: a.timestamp,
                }]
            })
            .unwrap_or_default())
    }
}
