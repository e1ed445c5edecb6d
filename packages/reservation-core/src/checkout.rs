//! Checkout half of the Orchestrator (component E).

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::ResourceAccounting;
use crate::orders::OrderStore;
use crate::session::{SessionStore, TTL_GRACE_SECONDS};
use crate::{Error, Order, OrderStatus, Result, Session, TicketClass};

/// IP-keyed token bucket shielding the Batcher from abusive clients
/// (§4.5 "Rate limiting"). Checkout only; webhooks are signature-verified
/// instead.
pub struct CheckoutRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl CheckoutRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap());
        Self {
            limiter: DefaultKeyedRateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub class: TicketClass,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub redirect_url: String,
}

pub struct CheckoutOrchestrator {
    accounting: Arc<ResourceAccounting>,
    order_store: Arc<dyn OrderStore>,
    session_store: Arc<dyn SessionStore>,
    hold_timeout_seconds: u32,
    mock_provider_base_url: String,
}

impl CheckoutOrchestrator {
    pub fn new(
        accounting: Arc<ResourceAccounting>,
        order_store: Arc<dyn OrderStore>,
        session_store: Arc<dyn SessionStore>,
        hold_timeout_seconds: u32,
        mock_provider_base_url: String,
    ) -> Self {
        Self {
            accounting,
            order_store,
            session_store,
            hold_timeout_seconds,
            mock_provider_base_url,
        }
    }

    /// §4.5 "Checkout operation". Always requests a goodie hold alongside
    /// the ticket hold; goodie exhaustion is silent (§7).
    pub async fn checkout(&self, class: TicketClass) -> Result<CheckoutResponse> {
        let order_id = Uuid::new_v4().as_u128();

        let hold = self
            .accounting
            .hold(order_id, class, true, self.hold_timeout_seconds)
            .await?;

        if !hold.ticket_ok {
            let order = Order {
                order_id,
                class,
                amount_cents: amount_for_class(class),
                currency: "USD".to_string(),
                created_at: Utc::now(),
                hold_expires_at: None,
                ticket_pending_id: None,
                goodie_pending_id: None,
                payment_intent_id: None,
                status: OrderStatus::Failed,
                paid_at: None,
            };
            self.order_store.insert(order).await?;
            return Err(Error::SoldOut);
        }

        let now = Utc::now();
        let hold_expires_at = now + ChronoDuration::seconds(self.hold_timeout_seconds as i64);
        let payment_intent_id = format!("pi_{}", Uuid::new_v4());

        let order = Order {
            order_id,
            class,
            amount_cents: amount_for_class(class),
            currency: "USD".to_string(),
            created_at: now,
            hold_expires_at: Some(hold_expires_at),
            ticket_pending_id: Some(hold.ticket_pending_id),
            goodie_pending_id: hold.goodie_pending_id,
            payment_intent_id: Some(payment_intent_id.clone()),
            status: OrderStatus::Created,
            paid_at: None,
        };
        self.order_store.insert(order).await?;

        let session = Session {
            order_id,
            class,
            ticket_pending_id: hold.ticket_pending_id,
            goodie_pending_id: hold.goodie_pending_id,
            hold_expires_at,
        };
        let ttl = std::time::Duration::from_secs(
            self.hold_timeout_seconds as u64 + TTL_GRACE_SECONDS,
        );
        self.session_store.put(session, ttl).await?;
        self.session_store
            .bind_intent(&payment_intent_id, order_id, ttl)
            .await?;

        let transitioned = self
            .order_store
            .update_status(
                order_id,
                &[OrderStatus::Created],
                OrderStatus::Held,
                crate::orders::UpdateExtras::default(),
            )
            .await?;
        if !transitioned {
            tracing::warn!("order {order_id} failed CREATED -> HELD transition immediately after insert");
        }

        Ok(CheckoutResponse {
            order_id: order_id.to_string(),
            redirect_url: format!(
                "{}/payments/mock/{}",
                self.mock_provider_base_url, payment_intent_id
            ),
        })
    }
}

fn amount_for_class(class: TicketClass) -> i64 {
    match class {
        TicketClass::A => 5000,
        TicketClass::B => 2500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::batcher::BatcherHandle;
    use crate::ledger::memory::InMemoryLedgerClient;
    use crate::orders::InMemoryOrderStore;
    use crate::session::InMemorySessionStore;
    use crate::AppConfig;
    use std::net::{IpAddr, Ipv4Addr};

    async fn make_orchestrator(ticket_supply_a: u64) -> CheckoutOrchestrator {
        let client: Arc<dyn crate::ledger::LedgerClient> = Arc::new(InMemoryLedgerClient::new());
        let batcher = BatcherHandle::spawn(client);
        let accounting = Arc::new(ResourceAccounting::new(batcher));
        let config = AppConfig {
            ticket_supply_a,
            goodie_supply: 5,
            ..Default::default()
        };
        accounting.initialize_supply(&config).await.unwrap();

        CheckoutOrchestrator::new(
            accounting,
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemorySessionStore::new()),
            300,
            "http://localhost:8080".to_string(),
        )
    }

    #[tokio::test]
    async fn test_checkout_happy_path() {
        let orchestrator = make_orchestrator(10).await;
        let response = orchestrator.checkout(TicketClass::A).await.unwrap();
        assert!(!response.order_id.is_empty());
        assert!(response.redirect_url.contains("/payments/mock/"));
    }

    #[tokio::test]
    async fn test_checkout_sold_out() {
        let orchestrator = make_orchestrator(1).await;
        let first = orchestrator.checkout(TicketClass::A).await;
        assert!(first.is_ok());
        let second = orchestrator.checkout(TicketClass::A).await;
        assert!(matches!(second, Err(Error::SoldOut)));
    }

    #[test]
    fn test_rate_limiter_blocks_after_quota() {
        let limiter = CheckoutRateLimiter::new(1);
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }
}
