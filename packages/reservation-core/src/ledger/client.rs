//! Ledger transport.
//!
//! `LedgerClient` is the narrow boundary the Batcher submits whole batches
//! across. `TcpLedgerClient` is the production implementation; tests use
//! `super::memory::InMemoryLedgerClient` instead.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::ledger::protocol::{
    Account, AccountBalance, AccountFlags, CreateAccountResult, CreateTransferResult, Transfer,
    TransferFlags,
};
use crate::{Error, Result};

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn create_accounts(&self, items: Vec<Account>) -> Result<Vec<CreateAccountResult>>;
    async fn create_transfers(&self, items: Vec<Transfer>) -> Result<Vec<CreateTransferResult>>;
    async fn lookup_accounts(&self, ids: Vec<u128>) -> Result<Vec<Option<Account>>>;
    async fn lookup_transfers(&self, ids: Vec<u128>) -> Result<Vec<Option<Transfer>>>;
    async fn get_account_balances(&self, id: u128, limit: u32) -> Result<Vec<AccountBalance>>;
}

/// One operation kind, framed as `[u8 opcode][u32 len][payload...]` over a
/// single long-lived TCP connection. The real wire protocol batches and
/// acknowledges requests in order; we serialize access with a mutex since
/// the Batcher is the only caller and already coalesces concurrent work
/// into single submissions.
pub struct TcpLedgerClient {
    conn: Mutex<TcpStream>,
}

#[repr(u8)]
enum Opcode {
    CreateAccounts = 1,
    CreateTransfers = 2,
    LookupAccounts = 3,
    LookupTransfers = 4,
    GetAccountBalances = 5,
}

impl TcpLedgerClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let conn = TcpStream::connect(address)
            .await
            .map_err(|e| Error::LedgerTransport(format!("connect to {address}: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn roundtrip(&self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
        let mut conn = self.conn.lock().await;

        conn.write_u8(opcode as u8)
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;
        conn.write_u32(payload.len() as u32)
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;
        conn.write_all(payload)
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;
        conn.flush()
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;

        let reply_len = conn
            .read_u32()
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;
        let mut reply = vec![0u8; reply_len as usize];
        conn.read_exact(&mut reply)
            .await
            .map_err(|e| Error::LedgerTransport(e.to_string()))?;
        Ok(reply)
    }
}

#[async_trait]
impl LedgerClient for TcpLedgerClient {
    async fn create_accounts(&self, items: Vec<Account>) -> Result<Vec<CreateAccountResult>> {
        let payload = encode_accounts(&items);
        let reply = self.roundtrip(Opcode::CreateAccounts, &payload).await?;
        decode_account_results(&reply, items.len())
    }

    async fn create_transfers(&self, items: Vec<Transfer>) -> Result<Vec<CreateTransferResult>> {
        let payload = encode_transfers(&items);
        let reply = self.roundtrip(Opcode::CreateTransfers, &payload).await?;
        decode_transfer_results(&reply, items.len())
    }

    async fn lookup_accounts(&self, ids: Vec<u128>) -> Result<Vec<Option<Account>>> {
        let mut payload = Vec::with_capacity(ids.len() * 16);
        for id in &ids {
            payload.extend_from_slice(&id.to_le_bytes());
        }
        let reply = self.roundtrip(Opcode::LookupAccounts, &payload).await?;
        decode_optional_accounts(&reply, ids.len())
    }

    async fn lookup_transfers(&self, ids: Vec<u128>) -> Result<Vec<Option<Transfer>>> {
        let mut payload = Vec::with_capacity(ids.len() * 16);
        for id in &ids {
            payload.extend_from_slice(&id.to_le_bytes());
        }
        let reply = self.roundtrip(Opcode::LookupTransfers, &payload).await?;
        decode_optional_transfers(&reply, ids.len())
    }

    async fn get_account_balances(&self, id: u128, limit: u32) -> Result<Vec<AccountBalance>> {
        let mut payload = Vec::with_capacity(20);
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(&limit.to_le_bytes());
        let reply = self
            .roundtrip(Opcode::GetAccountBalances, &payload)
            .await?;
        decode_account_balances(&reply)
    }
}

// Wire encoding helpers. The layout is an implementation detail of this
// core's ledger service, not a published protocol, so it is kept as plain
// little-endian field concatenation rather than raw `#[repr(C)]` transmutes.

fn encode_accounts(items: &[Account]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(items.len() * 48);
    for a in items {
        buf.extend_from_slice(&a.id.to_le_bytes());
        buf.extend_from_slice(&a.ledger.to_le_bytes());
        buf.extend_from_slice(&a.code.to_le_bytes());
        buf.extend_from_slice(&a.flags.bits().to_le_bytes());
    }
    buf
}

fn encode_transfers(items: &[Transfer]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(items.len() * 80);
    for t in items {
        buf.extend_from_slice(&t.id.to_le_bytes());
        buf.extend_from_slice(&t.debit_account_id.to_le_bytes());
        buf.extend_from_slice(&t.credit_account_id.to_le_bytes());
        buf.extend_from_slice(&t.amount.to_le_bytes());
        buf.extend_from_slice(&t.pending_id.to_le_bytes());
        buf.extend_from_slice(&t.timeout.to_le_bytes());
        buf.extend_from_slice(&t.ledger.to_le_bytes());
        buf.extend_from_slice(&t.code.to_le_bytes());
        buf.extend_from_slice(&t.flags.bits().to_le_bytes());
    }
    buf
}

fn decode_account_results(reply: &[u8], expected: usize) -> Result<Vec<CreateAccountResult>> {
    if reply.len() != expected * 4 {
        return Err(Error::LedgerTransport(
            "malformed create_accounts reply".to_string(),
        ));
    }
    reply
        .chunks_exact(4)
        .map(|chunk| {
            let code = u32::from_le_bytes(chunk.try_into().unwrap());
            account_result_from_code(code)
        })
        .collect()
}

fn decode_transfer_results(reply: &[u8], expected: usize) -> Result<Vec<CreateTransferResult>> {
    if reply.len() != expected * 4 {
        return Err(Error::LedgerTransport(
            "malformed create_transfers reply".to_string(),
        ));
    }
    reply
        .chunks_exact(4)
        .map(|chunk| {
            let code = u32::from_le_bytes(chunk.try_into().unwrap());
            transfer_result_from_code(code)
        })
        .collect()
}

fn account_result_from_code(code: u32) -> Result<CreateAccountResult> {
    Ok(match code {
        0 => CreateAccountResult::Ok,
        6 => CreateAccountResult::IdMustNotBeZero,
        13 => CreateAccountResult::LedgerMustNotBeZero,
        14 => CreateAccountResult::CodeMustNotBeZero,
        15 => CreateAccountResult::ExistsWithDifferentFlags,
        21 => CreateAccountResult::Exists,
        other => {
            return Err(Error::LedgerTransport(format!(
                "unknown create_account result code {other}"
            )))
        }
    })
}

fn transfer_result_from_code(code: u32) -> Result<CreateTransferResult> {
    Ok(match code {
        0 => CreateTransferResult::Ok,
        5 => CreateTransferResult::IdMustNotBeZero,
        21 => CreateTransferResult::DebitAccountNotFound,
        22 => CreateTransferResult::CreditAccountNotFound,
        25 => CreateTransferResult::PendingTransferNotFound,
        33 => CreateTransferResult::PendingTransferAlreadyPosted,
        34 => CreateTransferResult::PendingTransferAlreadyVoided,
        35 => CreateTransferResult::PendingTransferExpired,
        46 => CreateTransferResult::Exists,
        54 => CreateTransferResult::ExceedsCredits,
        other => {
            return Err(Error::LedgerTransport(format!(
                "unknown create_transfer result code {other}"
            )))
        }
    })
}

fn read_u16(buf: &[u8], offset: &mut usize) -> u16 {
    let v = u16::from_le_bytes(buf[*offset..*offset + 2].try_into().unwrap());
    *offset += 2;
    v
}

fn read_u32(buf: &[u8], offset: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*offset..*offset + 4].try_into().unwrap());
    *offset += 4;
    v
}

fn read_u64(buf: &[u8], offset: &mut usize) -> u64 {
    let v = u64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
    *offset += 8;
    v
}

fn read_u128(buf: &[u8], offset: &mut usize) -> u128 {
    let v = u128::from_le_bytes(buf[*offset..*offset + 16].try_into().unwrap());
    *offset += 16;
    v
}

/// One presence byte followed by the account record when present.
const ACCOUNT_RECORD_LEN: usize = 1 + 16 * 5 + 4 + 2 + 2 + 8;
/// One presence byte followed by the transfer record when present.
const TRANSFER_RECORD_LEN: usize = 1 + 16 * 5 + 4 + 4 + 2 + 2 + 8;
/// A `u32` count header followed by fixed-size balance records.
const BALANCE_RECORD_LEN: usize = 16 * 4 + 8;

fn decode_optional_accounts(reply: &[u8], count: usize) -> Result<Vec<Option<Account>>> {
    if reply.len() != ACCOUNT_RECORD_LEN * count {
        return Err(Error::LedgerTransport("malformed lookup_accounts reply".to_string()));
    }

    let mut out = Vec::with_capacity(count);
    for chunk in reply.chunks_exact(ACCOUNT_RECORD_LEN) {
        if chunk[0] == 0 {
            out.push(None);
            continue;
        }
        let mut offset = 1;
        let id = read_u128(chunk, &mut offset);
        let debits_pending = read_u128(chunk, &mut offset);
        let debits_posted = read_u128(chunk, &mut offset);
        let credits_pending = read_u128(chunk, &mut offset);
        let credits_posted = read_u128(chunk, &mut offset);
        let ledger = read_u32(chunk, &mut offset);
        let code = read_u16(chunk, &mut offset);
        let flags = AccountFlags::from_bits_truncate(read_u16(chunk, &mut offset));
        let timestamp = read_u64(chunk, &mut offset);
        out.push(Some(Account {
            id,
            debits_pending,
            debits_posted,
            credits_pending,
            credits_posted,
            ledger,
            code,
            flags,
            timestamp,
        }));
    }
    Ok(out)
}

fn decode_optional_transfers(reply: &[u8], count: usize) -> Result<Vec<Option<Transfer>>> {
    if reply.len() != TRANSFER_RECORD_LEN * count {
        return Err(Error::LedgerTransport("malformed lookup_transfers reply".to_string()));
    }

    let mut out = Vec::with_capacity(count);
    for chunk in reply.chunks_exact(TRANSFER_RECORD_LEN) {
        if chunk[0] == 0 {
            out.push(None);
            continue;
        }
        let mut offset = 1;
        let id = read_u128(chunk, &mut offset);
        let debit_account_id = read_u128(chunk, &mut offset);
        let credit_account_id = read_u128(chunk, &mut offset);
        let amount = read_u128(chunk, &mut offset);
        let pending_id = read_u128(chunk, &mut offset);
        let timeout = read_u32(chunk, &mut offset);
        let ledger = read_u32(chunk, &mut offset);
        let code = read_u16(chunk, &mut offset);
        let flags = TransferFlags::from_bits_truncate(read_u16(chunk, &mut offset));
        let timestamp = read_u64(chunk, &mut offset);
        out.push(Some(Transfer {
            id,
            debit_account_id,
            credit_account_id,
            amount,
            pending_id,
            timeout,
            ledger,
            code,
            flags,
            timestamp,
        }));
    }
    Ok(out)
}

fn decode_account_balances(reply: &[u8]) -> Result<Vec<AccountBalance>> {
    if reply.len() < 4 {
        return Err(Error::LedgerTransport("malformed account_balances reply".to_string()));
    }
    let mut offset = 0;
    let count = read_u32(reply, &mut offset) as usize;
    if reply.len() != 4 + BALANCE_RECORD_LEN * count {
        return Err(Error::LedgerTransport("malformed account_balances reply".to_string()));
    }

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let debits_pending = read_u128(reply, &mut offset);
        let debits_posted = read_u128(reply, &mut offset);
        let credits_pending = read_u128(reply, &mut offset);
        let credits_posted = read_u128(reply, &mut offset);
        let timestamp = read_u64(reply, &mut offset);
        out.push(AccountBalance {
            debits_pending,
            debits_posted,
            credits_pending,
            credits_posted,
            timestamp,
        });
    }
    Ok(out)
}
