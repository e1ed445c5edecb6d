//! Reservation Session Store (component C).
//!
//! Idempotency and correlation data for in-flight checkouts, keyed by
//! order id and by payment-intent id. Two interchangeable backends behind
//! the `SessionStore` trait: `InMemorySessionStore` for single-process
//! deployments and `RedisSessionStore` for multi-worker deployments
//! sharing one key-value service.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{Error, Result, Session};

/// TTL floor: hold timeout plus a grace margin (§4.3).
pub const TTL_GRACE_SECONDS: u64 = 60;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: Session, ttl: Duration) -> Result<()>;
    async fn get(&self, order_id: u128) -> Result<Option<Session>>;
    async fn delete(&self, order_id: u128) -> Result<()>;
    async fn bind_intent(&self, payment_intent_id: &str, order_id: u128, ttl: Duration) -> Result<()>;
    async fn resolve_intent(&self, payment_intent_id: &str) -> Result<Option<u128>>;
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// `dashmap`-backed single-process session store. A background sweep task
/// (spawned alongside it) evicts expired entries periodically; reads also
/// treat an expired-but-not-yet-swept entry as absent.
pub struct InMemorySessionStore {
    sessions: DashMap<u128, Entry<Session>>,
    intents: DashMap<String, Entry<u128>>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            intents: DashMap::new(),
        }
    }

    /// Removes all entries past their TTL. Intended to run on a periodic
    /// timer alongside the order-timeout sweep.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        self.intents.retain(|_, entry| entry.expires_at > now);
    }

    /// Spawns the periodic eviction task. Only meaningful for this
    /// single-process backend; `RedisSessionStore` relies on `SET ... EX`
    /// for expiry instead.
    pub fn spawn_sweep(self: Arc<Self>, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session, ttl: Duration) -> Result<()> {
        self.sessions.insert(
            session.order_id,
            Entry {
                value: session,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, order_id: u128) -> Result<Option<Session>> {
        Ok(self.sessions.get(&order_id).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn delete(&self, order_id: u128) -> Result<()> {
        self.sessions.remove(&order_id);
        Ok(())
    }

    async fn bind_intent(&self, payment_intent_id: &str, order_id: u128, ttl: Duration) -> Result<()> {
        self.intents.insert(
            payment_intent_id.to_string(),
            Entry {
                value: order_id,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn resolve_intent(&self, payment_intent_id: &str) -> Result<Option<u128>> {
        Ok(self.intents.get(payment_intent_id).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value)
            } else {
                None
            }
        }))
    }
}

/// Redis-backed store for multi-worker deployments: `SET ... EX` / `GET` /
/// `DEL`, matching the "external key-value service" named in §4.3.
pub struct RedisSessionStore {
    client: redis::Client,
}

#[derive(Serialize, Deserialize)]
struct WireSession {
    order_id: u128,
    class: crate::TicketClass,
    ticket_pending_id: u128,
    goodie_pending_id: Option<u128>,
    hold_expires_at: chrono::DateTime<Utc>,
}

impl From<&Session> for WireSession {
    fn from(s: &Session) -> Self {
        Self {
            order_id: s.order_id,
            class: s.class,
            ticket_pending_id: s.ticket_pending_id,
            goodie_pending_id: s.goodie_pending_id,
            hold_expires_at: s.hold_expires_at,
        }
    }
}

impl From<WireSession> for Session {
    fn from(w: WireSession) -> Self {
        Self {
            order_id: w.order_id,
            class: w.class,
            ticket_pending_id: w.ticket_pending_id,
            goodie_pending_id: w.goodie_pending_id,
            hold_expires_at: w.hold_expires_at,
        }
    }
}

impl RedisSessionStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::SessionStore(e.to_string()))?;
        Ok(Self { client })
    }

    fn session_key(order_id: u128) -> String {
        format!("session:{order_id}")
    }

    fn intent_key(payment_intent_id: &str) -> String {
        format!("intent:{payment_intent_id}")
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: Session, ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let wire: WireSession = (&session).into();
        let payload = serde_json::to_string(&wire).map_err(|e| Error::SessionStore(e.to_string()))?;
        conn.set_ex::<_, _, ()>(Self::session_key(session.order_id), payload, ttl.as_secs())
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))
    }

    async fn get(&self, order_id: u128) -> Result<Option<Session>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn
            .get(Self::session_key(order_id))
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))?;
        match payload {
            Some(p) => {
                let wire: WireSession =
                    serde_json::from_str(&p).map_err(|e| Error::SessionStore(e.to_string()))?;
                Ok(Some(wire.into()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, order_id: u128) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(Self::session_key(order_id))
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))
    }

    async fn bind_intent(&self, payment_intent_id: &str, order_id: u128, ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(Self::intent_key(payment_intent_id), order_id.to_string(), ttl.as_secs())
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))
    }

    async fn resolve_intent(&self, payment_intent_id: &str) -> Result<Option<u128>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(Self::intent_key(payment_intent_id))
            .await
            .map_err(|e| Error::SessionStore(e.to_string()))?;
        value
            .map(|v| v.parse::<u128>().map_err(|e| Error::SessionStore(e.to_string())))
            .transpose()
    }
}
