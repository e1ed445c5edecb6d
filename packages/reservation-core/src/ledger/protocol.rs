//! Ledger wire protocol types.
//!
//! Byte-layout-compatible with the real ledger service; `#[repr(C)]` plus
//! `bitflags` for the flag fields, matching a TigerBeetle-style protocol.
//! Only the fields this core actually needs are kept.

use bitflags::bitflags;

/// Ledger account (budget or spent side of a resource pair).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Account {
    pub id: u128,
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
    pub ledger: u32,
    pub code: u16,
    pub flags: AccountFlags,
    pub timestamp: u64,
}

impl Account {
    /// `credits_posted - debits_posted - debits_pending`: what remains
    /// available to debit against right now.
    pub fn available_balance(&self) -> i128 {
        self.credits_posted as i128 - self.debits_posted as i128 - self.debits_pending as i128
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct AccountFlags: u16 {
        const LINKED = 1 << 0;
        /// Enforce that debits do not exceed credits — applied to every
        /// budget account so a hold can never drive it negative.
        const DEBITS_MUST_NOT_EXCEED_CREDITS = 1 << 1;
        const CREDITS_MUST_NOT_EXCEED_DEBITS = 1 << 2;
        const HISTORY = 1 << 3;
    }
}

/// A transfer between two accounts.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Transfer {
    pub id: u128,
    pub debit_account_id: u128,
    pub credit_account_id: u128,
    pub amount: u128,
    /// Id of the pending transfer this one posts or voids (0 if neither).
    pub pending_id: u128,
    /// Seconds; only meaningful together with `TransferFlags::PENDING`.
    pub timeout: u32,
    pub ledger: u32,
    pub code: u16,
    pub flags: TransferFlags,
    pub timestamp: u64,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TransferFlags: u16 {
        const LINKED = 1 << 0;
        const PENDING = 1 << 1;
        const POST_PENDING_TRANSFER = 1 << 2;
        const VOID_PENDING_TRANSFER = 1 << 3;
    }
}

/// Historical balance snapshot, returned by `get_account_balances`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AccountBalance {
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
    pub timestamp: u64,
}

/// Result code for a single item of a `create_accounts` batch.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateAccountResult {
    Ok = 0,
    IdMustNotBeZero = 6,
    LedgerMustNotBeZero = 13,
    CodeMustNotBeZero = 14,
    /// Account already exists with matching fields — idempotent success.
    Exists = 21,
    ExistsWithDifferentFlags = 15,
}

/// Result code for a single item of a `create_transfers` batch.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateTransferResult {
    Ok = 0,
    IdMustNotBeZero = 5,
    DebitAccountNotFound = 21,
    CreditAccountNotFound = 22,
    PendingTransferNotFound = 25,
    /// The referenced pending transfer has already expired; the caller
    /// (`ledger::accounting::post`) retries with an immediate transfer.
    PendingTransferExpired = 35,
    PendingTransferAlreadyPosted = 33,
    PendingTransferAlreadyVoided = 34,
    /// Transfer already exists with matching fields — idempotent success.
    Exists = 46,
    /// Budget exhausted: the debit would drive the account negative.
    ExceedsCredits = 54,
}

impl CreateTransferResult {
    pub fn is_success(self) -> bool {
        matches!(self, CreateTransferResult::Ok | CreateTransferResult::Exists)
    }
}

impl CreateAccountResult {
    pub fn is_success(self) -> bool {
        matches!(self, CreateAccountResult::Ok | CreateAccountResult::Exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_flags_bits() {
        let flags = AccountFlags::LINKED | AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS;
        assert_eq!(flags.bits(), 0b11);
    }

    #[test]
    fn test_transfer_flags_bits() {
        let flags = TransferFlags::PENDING | TransferFlags::LINKED;
        assert_eq!(flags.bits(), 0b11);
    }

    #[test]
    fn test_available_balance() {
        let mut acct = Account {
            credits_posted: 100,
            ..Default::default()
        };
        assert_eq!(acct.available_balance(), 100);
        acct.debits_pending = 10;
        acct.debits_posted = 5;
        assert_eq!(acct.available_balance(), 85);
    }

    #[test]
    fn test_result_success_variants() {
        assert!(CreateTransferResult::Ok.is_success());
        assert!(CreateTransferResult::Exists.is_success());
        assert!(!CreateTransferResult::ExceedsCredits.is_success());
    }
}
