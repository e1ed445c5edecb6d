//! Order Store (component D).
//!
//! A row-oriented persistent table with a primary key on `order_id` and a
//! unique index on `payment_intent_id`. `update_status` is a single
//! conditional `UPDATE ... WHERE status = ANY($from)`, the serialization
//! point for webhook duplicates and timeout sweeps (§9 "Conditional status
//! update" — never emulated with read-then-write).
//!
//! Grounded on `packages/monitoring-engine/src/database/mod.rs`'s
//! `deadpool-postgres`/`tokio-postgres` pool construction and
//! prepare/execute call shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use dashmap::DashMap;
use tokio_postgres::NoTls;

use crate::{Error, Order, OrderStatus, Result, TicketClass};

refinery::embed_migrations!("migrations");

/// Fields an `update_status` call may also set, alongside the status
/// transition itself.
#[derive(Debug, Clone, Default)]
pub struct UpdateExtras {
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_intent_id: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, order_id: u128) -> Result<Option<Order>>;
    async fn get_by_intent(&self, intent_id: &str) -> Result<Option<Order>>;
    /// Returns `true` if the row transitioned, `false` if the current
    /// status was not in `from` (another actor already won the race).
    async fn update_status(
        &self,
        order_id: u128,
        from: &[OrderStatus],
        to: OrderStatus,
        extra: UpdateExtras,
    ) -> Result<bool>;
    /// Orders currently HELD whose hold expired more than `grace` ago —
    /// feeds the timeout sweep.
    async fn find_expired_holds(&self, grace: chrono::Duration) -> Result<Vec<Order>>;
    /// Lightweight reachability probe for the `/health` endpoint.
    async fn health_check(&self) -> Result<()>;
}

fn class_to_str(class: TicketClass) -> &'static str {
    match class {
        TicketClass::A => "A",
        TicketClass::B => "B",
    }
}

fn class_from_str(s: &str) -> Result<TicketClass> {
    match s {
        "A" => Ok(TicketClass::A),
        "B" => Ok(TicketClass::B),
        other => Err(Error::Database(format!("unknown ticket class {other}"))),
    }
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Created => "CREATED",
        OrderStatus::Held => "HELD",
        OrderStatus::Paid => "PAID",
        OrderStatus::PaidUnfulfilled => "PAID_UNFULFILLED",
        OrderStatus::Failed => "FAILED",
        OrderStatus::Canceled => "CANCELED",
        OrderStatus::Timeout => "TIMEOUT",
    }
}

fn status_from_str(s: &str) -> Result<OrderStatus> {
    Ok(match s {
        "CREATED" => OrderStatus::Created,
        "HELD" => OrderStatus::Held,
        "PAID" => OrderStatus::Paid,
        "PAID_UNFULFILLED" => OrderStatus::PaidUnfulfilled,
        "FAILED" => OrderStatus::Failed,
        "CANCELED" => OrderStatus::Canceled,
        "TIMEOUT" => OrderStatus::Timeout,
        other => return Err(Error::Database(format!("unknown order status {other}"))),
    })
}

fn u128_opt_to_text(v: Option<u128>) -> Option<String> {
    v.map(|v| v.to_string())
}

fn text_opt_to_u128(v: Option<String>) -> Result<Option<u128>> {
    v.map(|v| v.parse::<u128>().map_err(|e| Error::Database(e.to_string())))
        .transpose()
}

/// `deadpool-postgres` connection pool backend.
pub struct PostgresOrderStore {
    pool: Pool,
}

impl PostgresOrderStore {
    pub async fn new(database_url: &str, max_connections: usize) -> Result<Self> {
        tracing::info!("connecting to order store at {database_url}");

        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, mgr_config);

        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| Error::Database(format!("failed to build connection pool: {e}")))?;

        let mut client = pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;

        tracing::info!("order store migrations applied");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_order(row: &tokio_postgres::Row) -> Result<Order> {
        Ok(Order {
            order_id: row.get::<_, String>("order_id").parse().map_err(|e: std::num::ParseIntError| Error::Database(e.to_string()))?,
            class: class_from_str(&row.get::<_, String>("class"))?,
            amount_cents: row.get("amount_cents"),
            currency: row.get("currency"),
            created_at: row.get("created_at"),
            hold_expires_at: row.get("hold_expires_at"),
            ticket_pending_id: text_opt_to_u128(row.get("ticket_pending_id"))?,
            goodie_pending_id: text_opt_to_u128(row.get("goodie_pending_id"))?,
            payment_intent_id: row.get("payment_intent_id"),
            status: status_from_str(&row.get::<_, String>("status"))?,
            paid_at: row.get("paid_at"),
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        client
            .execute(
                "INSERT INTO orders
                 (order_id, class, amount_cents, currency, created_at, hold_expires_at,
                  ticket_pending_id, goodie_pending_id, payment_intent_id, status, paid_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (order_id) DO NOTHING",
                &[
                    &order.order_id.to_string(),
                    &class_to_str(order.class),
                    &order.amount_cents,
                    &order.currency,
                    &order.created_at,
                    &order.hold_expires_at,
                    &u128_opt_to_text(order.ticket_pending_id),
                    &u128_opt_to_text(order.goodie_pending_id),
                    &order.payment_intent_id,
                    &status_to_str(order.status),
                    &order.paid_at,
                ],
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, order_id: u128) -> Result<Option<Order>> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        let row = client
            .query_opt("SELECT * FROM orders WHERE order_id = $1", &[&order_id.to_string()])
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn get_by_intent(&self, intent_id: &str) -> Result<Option<Order>> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        let row = client
            .query_opt("SELECT * FROM orders WHERE payment_intent_id = $1", &[&intent_id])
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn update_status(
        &self,
        order_id: u128,
        from: &[OrderStatus],
        to: OrderStatus,
        extra: UpdateExtras,
    ) -> Result<bool> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        let from_strs: Vec<&str> = from.iter().map(|s| status_to_str(*s)).collect();

        let rows = client
            .execute(
                "UPDATE orders
                 SET status = $1, paid_at = COALESCE($2, paid_at), payment_intent_id = COALESCE($3, payment_intent_id)
                 WHERE order_id = $4 AND status = ANY($5)",
                &[
                    &status_to_str(to),
                    &extra.paid_at,
                    &extra.payment_intent_id,
                    &order_id.to_string(),
                    &from_strs,
                ],
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows > 0)
    }

    async fn find_expired_holds(&self, grace: chrono::Duration) -> Result<Vec<Order>> {
        let client = self.pool.get().await.map_err(|e| Error::Database(e.to_string()))?;
        let cutoff = Utc::now() - grace;
        let rows = client
            .query(
                "SELECT * FROM orders WHERE status = 'HELD' AND hold_expires_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn health_check(&self) -> Result<()> {
        PostgresOrderStore::health_check(self).await
    }
}

/// In-memory test double used by the `tests/` scenario suite.
pub struct InMemoryOrderStore {
    orders: DashMap<u128, Order>,
    by_intent: DashMap<String, u128>,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            by_intent: DashMap::new(),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        if let Some(intent) = &order.payment_intent_id {
            self.by_intent.insert(intent.clone(), order.order_id);
        }
        self.orders.entry(order.order_id).or_insert(order);
        Ok(())
    }

    async fn get(&self, order_id: u128) -> Result<Option<Order>> {
        Ok(self.orders.get(&order_id).map(|o| o.clone()))
    }

    async fn get_by_intent(&self, intent_id: &str) -> Result<Option<Order>> {
        let Some(order_id) = self.by_intent.get(intent_id).map(|id| *id) else {
            return Ok(None);
        };
        self.get(order_id).await
    }

    async fn update_status(
        &self,
        order_id: u128,
        from: &[OrderStatus],
        to: OrderStatus,
        extra: UpdateExtras,
    ) -> Result<bool> {
        let Some(mut order) = self.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if !from.contains(&order.status) {
            return Ok(false);
        }
        order.status = to;
        if let Some(paid_at) = extra.paid_at {
            order.paid_at = Some(paid_at);
        }
        if let Some(intent) = extra.payment_intent_id {
            order.payment_intent_id = Some(intent);
        }
        Ok(true)
    }

    async fn find_expired_holds(&self, grace: chrono::Duration) -> Result<Vec<Order>> {
        let cutoff = Utc::now() - grace;
        Ok(self
            .orders
            .iter()
            .filter(|entry| {
                entry.status == OrderStatus::Held
                    && entry.hold_expires_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .map(|entry| entry.clone())
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
