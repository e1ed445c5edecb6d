//! Timeout sweep (§4.5 "Timeout sweep").
//!
//! A periodic task that voids any still-HELD order whose hold expired
//! more than `grace` ago and conditionally transitions it to TIMEOUT.
//! Correctness does not depend on its promptness: the ledger auto-releases
//! budget on pending expiry, and a late `paid` webhook on a TIMEOUT order
//! is still handled by `ledger::accounting::post`'s immediate-transfer
//! fallback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::ledger::ResourceAccounting;
use crate::orders::{OrderStore, UpdateExtras};
use crate::session::SessionStore;
use crate::{OrderStatus, Result};

pub struct TimeoutSweep {
    accounting: Arc<ResourceAccounting>,
    order_store: Arc<dyn OrderStore>,
    session_store: Arc<dyn SessionStore>,
    grace: ChronoDuration,
}

impl TimeoutSweep {
    pub fn new(
        accounting: Arc<ResourceAccounting>,
        order_store: Arc<dyn OrderStore>,
        session_store: Arc<dyn SessionStore>,
        grace_seconds: u32,
    ) -> Self {
        Self {
            accounting,
            order_store,
            session_store,
            grace: ChronoDuration::seconds(grace_seconds as i64),
        }
    }

    /// Runs one sweep pass, returning the number of orders transitioned.
    pub async fn run_once(&self) -> Result<usize> {
        let expired = self.order_store.find_expired_holds(self.grace).await?;
        let mut swept = 0;

        for order in expired {
            let Some(ticket_pending_id) = order.ticket_pending_id else {
                continue;
            };

            if let Err(e) = self
                .accounting
                .void(order.order_id, order.class, ticket_pending_id, order.goodie_pending_id)
                .await
            {
                tracing::warn!("sweep: void failed for order {}: {e}", order.order_id);
                continue;
            }

            let transitioned = self
                .order_store
                .update_status(
                    order.order_id,
                    &[OrderStatus::Held],
                    OrderStatus::Timeout,
                    UpdateExtras::default(),
                )
                .await?;

            if transitioned {
                self.session_store.delete(order.order_id).await?;
                swept += 1;
            }
        }

        Ok(swept)
    }

    /// Spawns the periodic sweep task. Call once at startup; the returned
    /// handle should be held for the process lifetime.
    pub fn spawn(self: Arc<Self>, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(n) if n > 0 => tracing::info!("sweep: transitioned {n} order(s) to TIMEOUT"),
                    Ok(_) => {}
                    Err(e) => tracing::error!("sweep pass failed: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::batcher::BatcherHandle;
    use crate::ledger::memory::InMemoryLedgerClient;
    use crate::ledger::LedgerClient;
    use crate::orders::InMemoryOrderStore;
    use crate::session::InMemorySessionStore;
    use crate::{AppConfig, Order, TicketClass};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_transitions_expired_hold_to_timeout() {
        let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
        let batcher = BatcherHandle::spawn(client);
        let accounting = Arc::new(ResourceAccounting::new(batcher));
        accounting
            .initialize_supply(&AppConfig {
                ticket_supply_a: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        let order_store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
        let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

        let order_id = 99u128;
        let hold = accounting.hold(order_id, TicketClass::A, false, 0).await.unwrap();
        order_store
            .insert(Order {
                order_id,
                class: TicketClass::A,
                amount_cents: 5000,
                currency: "USD".to_string(),
                created_at: Utc::now(),
                hold_expires_at: Some(Utc::now() - chrono::Duration::seconds(120)),
                ticket_pending_id: Some(hold.ticket_pending_id),
                goodie_pending_id: None,
                payment_intent_id: Some("pi_sweep".to_string()),
                status: OrderStatus::Held,
                paid_at: None,
            })
            .await
            .unwrap();

        let sweep = TimeoutSweep::new(accounting, order_store.clone(), session_store, 30);
        let swept = sweep.run_once().await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(order_store.get(order_id).await.unwrap().unwrap().status, OrderStatus::Timeout);
    }
}
