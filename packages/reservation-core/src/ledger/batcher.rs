//! Auto-batching layer over a `LedgerClient`.
//!
//! One worker task per operation kind owns a mailbox of single-item
//! requests tagged with a oneshot reply handle; it drains up to
//! `MAX_BATCH` items (or until `MAX_WAIT_MICROS` has elapsed since the
//! first item arrived) and submits them to the ledger as one round-trip.
//! Grounded on the mailbox + `tokio::select!` drain loop of
//! `examples/other_examples/149fdad2_..._actor.rs.rs`'s `LedgerActor::run`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::ledger::client::LedgerClient;
use crate::ledger::protocol::{Account, AccountBalance, CreateAccountResult, CreateTransferResult, Transfer};
use crate::{Error, Result};

/// Ledger's per-message item limits (§4.1).
const MAX_BATCH_TRANSFERS: usize = 8189;
const MAX_BATCH_ACCOUNTS: usize = 8190;
const MAX_WAIT: Duration = Duration::from_micros(200);

type Reply<R> = oneshot::Sender<Result<R>>;

struct Request<T, R> {
    item: T,
    reply: Reply<R>,
}

/// Drains `rx` into batches of at most `max_batch` items, or until
/// `MAX_WAIT` has elapsed since the first item of the batch arrived,
/// then calls `submit` once per batch and fans results back out
/// positionally.
async fn run_worker<T, R, S, Fut>(
    mut rx: mpsc::Receiver<Request<T, R>>,
    max_batch: usize,
    submit: S,
) where
    S: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<R>>>,
{
    loop {
        let Some(first) = rx.recv().await else {
            return;
        };

        let mut items = Vec::with_capacity(max_batch);
        let mut replies = Vec::with_capacity(max_batch);
        items.push(first.item);
        replies.push(first.reply);

        let deadline = Instant::now() + MAX_WAIT;
        while items.len() < max_batch {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(req)) => {
                    items.push(req.item);
                    replies.push(req.reply);
                }
                Ok(None) | Err(_) => break,
            }
        }

        let batch_len = items.len();
        match submit(items).await {
            Ok(results) if results.len() == batch_len => {
                for (reply, result) in replies.into_iter().zip(results.into_iter()) {
                    let _ = reply.send(Ok(result));
                }
            }
            Ok(_) => {
                // Ledger returned a mismatched result count; treat the
                // whole batch as failed rather than guess an alignment.
                for reply in replies {
                    let _ = reply.send(Err(Error::LedgerBatch(
                        "ledger reply count mismatch".to_string(),
                    )));
                }
            }
            Err(e) => {
                tracing::warn!("ledger batch submission failed: {e}");
                for reply in replies {
                    let _ = reply.send(Err(Error::LedgerBatch(e.to_string())));
                }
            }
        }
    }
}

/// Handle to the running Batcher; cheap to clone, shared via `Arc` in
/// `AppState`.
#[derive(Clone)]
pub struct BatcherHandle {
    create_accounts_tx: mpsc::Sender<Request<Account, CreateAccountResult>>,
    create_transfers_tx: mpsc::Sender<Request<Transfer, CreateTransferResult>>,
    lookup_accounts_tx: mpsc::Sender<Request<u128, Option<Account>>>,
    lookup_transfers_tx: mpsc::Sender<Request<u128, Option<Transfer>>>,
    balances_tx: mpsc::Sender<Request<(u128, u32), Vec<AccountBalance>>>,
}

impl BatcherHandle {
    /// Spawn one worker task per operation kind.
    pub fn spawn(client: Arc<dyn LedgerClient>) -> Self {
        let (ca_tx, ca_rx) = mpsc::channel(4096);
        let (ct_tx, ct_rx) = mpsc::channel(4096);
        let (la_tx, la_rx) = mpsc::channel(4096);
        let (lt_tx, lt_rx) = mpsc::channel(4096);
        let (gb_tx, gb_rx) = mpsc::channel(4096);

        {
            let client = client.clone();
            tokio::spawn(run_worker(ca_rx, MAX_BATCH_ACCOUNTS, move |items| {
                let client = client.clone();
                async move { client.create_accounts(items).await }
            }));
        }
        {
            let client = client.clone();
            tokio::spawn(run_worker(ct_rx, MAX_BATCH_TRANSFERS, move |items| {
                let client = client.clone();
                async move { client.create_transfers(items).await }
            }));
        }
        {
            let client = client.clone();
            tokio::spawn(run_worker(la_rx, MAX_BATCH_ACCOUNTS, move |ids: Vec<u128>| {
                let client = client.clone();
                async move {
                    let accounts = client.lookup_accounts(ids).await?;
                    Ok(accounts)
                }
            }));
        }
        {
            let client = client.clone();
            tokio::spawn(run_worker(lt_rx, MAX_BATCH_TRANSFERS, move |ids: Vec<u128>| {
                let client = client.clone();
                async move {
                    let transfers = client.lookup_transfers(ids).await?;
                    Ok(transfers)
                }
            }));
        }
        {
            let client = client.clone();
            tokio::spawn(run_worker(gb_rx, MAX_BATCH_ACCOUNTS, move |reqs: Vec<(u128, u32)>| {
                let client = client.clone();
                async move {
                    let mut out = Vec::with_capacity(reqs.len());
                    for (id, limit) in reqs {
                        out.push(client.get_account_balances(id, limit).await?);
                    }
                    Ok(out)
                }
            }));
        }

        Self {
            create_accounts_tx: ca_tx,
            create_transfers_tx: ct_tx,
            lookup_accounts_tx: la_tx,
            lookup_transfers_tx: lt_tx,
            balances_tx: gb_tx,
        }
    }

    async fn call<T, R>(tx: &mpsc::Sender<Request<T, R>>, item: T) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        tx.send(Request { item, reply })
            .await
            .map_err(|_| Error::LedgerBatch("batcher worker gone".to_string()))?;
        rx.await
            .map_err(|_| Error::LedgerBatch("batcher reply channel closed".to_string()))?
    }

    pub async fn create_account(&self, account: Account) -> Result<CreateAccountResult> {
        Self::call(&self.create_accounts_tx, account).await
    }

    pub async fn create_transfer(&self, transfer: Transfer) -> Result<CreateTransferResult> {
        Self::call(&self.create_transfers_tx, transfer).await
    }

    pub async fn lookup_account(&self, id: u128) -> Result<Option<Account>> {
        Self::call(&self.lookup_accounts_tx, id).await
    }

    pub async fn lookup_transfer(&self, id: u128) -> Result<Option<Transfer>> {
        Self::call(&self.lookup_transfers_tx, id).await
    }

    pub async fn account_balances(&self, id: u128, limit: u32) -> Result<Vec<AccountBalance>> {
        Self::call(&self.balances_tx, (id, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerClient;
    use crate::ledger::protocol::{AccountFlags, TransferFlags};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_submission() {
        let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
        let batcher = BatcherHandle::spawn(client.clone());

        batcher
            .create_account(Account {
                id: 1,
                ledger: 1,
                code: 100,
                flags: AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS,
                credits_posted: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        batcher
            .create_account(Account {
                id: 2,
                ledger: 1,
                code: 101,
                ..Default::default()
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20u128 {
            let batcher = batcher.clone();
            handles.push(tokio::spawn(async move {
                batcher
                    .create_transfer(Transfer {
                        id: 1000 + i,
                        debit_account_id: 1,
                        credit_account_id: 2,
                        amount: 1,
                        timeout: 60,
                        ledger: 1,
                        code: 100,
                        flags: TransferFlags::PENDING,
                        ..Default::default()
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap().is_success() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 10);
    }
}
