//! Webhook half of the Orchestrator (component E).

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::ledger::ResourceAccounting;
use crate::orders::{OrderStore, UpdateExtras};
use crate::session::SessionStore;
use crate::{Error, OrderStatus, Result};

type HmacSha256 = Hmac<Sha256>;

/// A 5-minute skew between `timestamp` and now is accepted (§6).
const MAX_SKEW_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    #[serde(rename = "payment.paid")]
    Paid,
    #[serde(rename = "payment.failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub intent_id: String,
    pub timestamp: i64,
    pub signature: String,
}

fn event_tag(event: WebhookEvent) -> &'static str {
    match event {
        WebhookEvent::Paid => "payment.paid",
        WebhookEvent::Failed => "payment.failed",
    }
}

/// Computes the HMAC-SHA256 signature over `intent_id + "|" + event +
/// "|" + timestamp`, base64url-encoded without padding.
pub fn sign(secret: &str, intent_id: &str, event: WebhookEvent, timestamp: i64) -> String {
    let canonical = format!("{intent_id}|{}|{timestamp}", event_tag(event));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn verify(secret: &str, payload: &WebhookPayload) -> bool {
    let now = Utc::now().timestamp();
    if (now - payload.timestamp).abs() > MAX_SKEW_SECONDS {
        return false;
    }

    let Ok(given_bytes) = URL_SAFE_NO_PAD.decode(&payload.signature) else {
        return false;
    };

    let canonical = format!("{}|{}|{}", payload.intent_id, event_tag(payload.event), payload.timestamp);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(canonical.as_bytes());
    mac.verify_slice(&given_bytes).is_ok()
}

pub struct WebhookOrchestrator {
    accounting: Arc<ResourceAccounting>,
    order_store: Arc<dyn OrderStore>,
    session_store: Arc<dyn SessionStore>,
    webhook_secret: String,
}

impl WebhookOrchestrator {
    pub fn new(
        accounting: Arc<ResourceAccounting>,
        order_store: Arc<dyn OrderStore>,
        session_store: Arc<dyn SessionStore>,
        webhook_secret: String,
    ) -> Self {
        Self {
            accounting,
            order_store,
            session_store,
            webhook_secret,
        }
    }

    /// §4.5 "Webhook operation". Always resolves to `Ok(())` once the
    /// signature is valid — duplicate/late/lost-race deliveries are
    /// idempotent no-ops, not errors, matching the "return 200 always, if
    /// signature valid" contract of §6.
    pub async fn handle(&self, payload: WebhookPayload) -> Result<()> {
        if !verify(&self.webhook_secret, &payload) {
            return Err(Error::BadSignature);
        }

        let Some(order_id) = self.session_store.resolve_intent(&payload.intent_id).await? else {
            let Some(order) = self.order_store.get_by_intent(&payload.intent_id).await? else {
                return Err(Error::UnknownIntent);
            };
            if order.status.is_terminal() {
                return Ok(());
            }
            return self.apply(order.order_id, order.class, order.ticket_pending_id, order.goodie_pending_id, payload.event).await;
        };

        let Some(order) = self.order_store.get(order_id).await? else {
            return Err(Error::OrderNotFound(order_id));
        };

        if order.status.is_terminal() {
            return Ok(());
        }

        self.apply(order.order_id, order.class, order.ticket_pending_id, order.goodie_pending_id, payload.event)
            .await
    }

    async fn apply(
        &self,
        order_id: u128,
        class: crate::TicketClass,
        ticket_pending_id: Option<u128>,
        goodie_pending_id: Option<u128>,
        event: WebhookEvent,
    ) -> Result<()> {
        let Some(ticket_pending_id) = ticket_pending_id else {
            // A FAILED-at-checkout order has no pending ids to resolve;
            // any webhook for it is stale.
            return Ok(());
        };

        match event {
            WebhookEvent::Paid => {
                let post = self
                    .accounting
                    .post(order_id, class, ticket_pending_id, goodie_pending_id)
                    .await?;

                let to_status = if post.ticket_posted {
                    OrderStatus::Paid
                } else {
                    tracing::warn!(
                        "order {order_id} paid but ticket could not be posted — marking PAID_UNFULFILLED, refund outside core"
                    );
                    OrderStatus::PaidUnfulfilled
                };

                let transitioned = self
                    .order_store
                    .update_status(
                        order_id,
                        &[OrderStatus::Held],
                        to_status,
                        UpdateExtras {
                            paid_at: Some(Utc::now()),
                            payment_intent_id: None,
                        },
                    )
                    .await?;

                if transitioned {
                    self.session_store.delete(order_id).await?;
                }
                Ok(())
            }
            WebhookEvent::Failed => {
                self.accounting
                    .void(order_id, class, ticket_pending_id, goodie_pending_id)
                    .await?;

                let transitioned = self
                    .order_store
                    .update_status(order_id, &[OrderStatus::Held], OrderStatus::Canceled, UpdateExtras::default())
                    .await?;

                if transitioned {
                    self.session_store.delete(order_id).await?;
                }
                Ok(())
            }
        }
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
    use crate::{AppConfig, Order, Session, TicketClass};

    const SECRET: &str = "test-secret";

    fn make_payload(intent_id: &str, event: WebhookEvent) -> WebhookPayload {
        let timestamp = Utc::now().timestamp();
        let signature = sign(SECRET, intent_id, event, timestamp);
        WebhookPayload {
            event,
            intent_id: intent_id.to_string(),
            timestamp,
            signature,
        }
    }

    async fn setup() -> (WebhookOrchestrator, Arc<dyn OrderStore>, Arc<dyn SessionStore>) {
        let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
        let batcher = BatcherHandle::spawn(client);
        let accounting = Arc::new(ResourceAccounting::new(batcher));
        accounting
            .initialize_supply(&AppConfig {
                ticket_supply_a: 10,
                goodie_supply: 5,
                ..Default::default()
            })
            .await
            .unwrap();

        let order_store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
        let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

        let order_id = 7u128;
        let hold = accounting.hold(order_id, TicketClass::A, true, 300).await.unwrap();
        let now = Utc::now();
        order_store
            .insert(Order {
                order_id,
                class: TicketClass::A,
                amount_cents: 5000,
                currency: "USD".to_string(),
                created_at: now,
                hold_expires_at: Some(now + chrono::Duration::seconds(300)),
                ticket_pending_id: Some(hold.ticket_pending_id),
                goodie_pending_id: hold.goodie_pending_id,
                payment_intent_id: Some("pi_test".to_string()),
                status: OrderStatus::Held,
                paid_at: None,
            })
            .await
            .unwrap();
        session_store
            .put(
                Session {
                    order_id,
                    class: TicketClass::A,
                    ticket_pending_id: hold.ticket_pending_id,
                    goodie_pending_id: hold.goodie_pending_id,
                    hold_expires_at: now + chrono::Duration::seconds(300),
                },
                std::time::Duration::from_secs(360),
            )
            .await
            .unwrap();
        session_store
            .bind_intent("pi_test", order_id, std::time::Duration::from_secs(360))
            .await
            .unwrap();

        let webhook = WebhookOrchestrator::new(accounting, order_store.clone(), session_store.clone(), SECRET.to_string());
        (webhook, order_store, session_store)
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (webhook, _, _) = setup().await;
        let mut payload = make_payload("pi_test", WebhookEvent::Paid);
        payload.signature = "not-a-real-signature".to_string();
        let result = webhook.handle(payload).await;
        assert!(matches!(result, Err(Error::BadSignature)));
    }

    #[tokio::test]
    async fn test_paid_transitions_order() {
        let (webhook, order_store, _) = setup().await;
        webhook.handle(make_payload("pi_test", WebhookEvent::Paid)).await.unwrap();
        let order = order_store.get(7).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_is_idempotent() {
        let (webhook, order_store, _) = setup().await;
        for _ in 0..5 {
            webhook.handle(make_payload("pi_test", WebhookEvent::Paid)).await.unwrap();
        }
        let order = order_store.get(7).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_failed_cancels_order() {
        let (webhook, order_store, _) = setup().await;
        webhook.handle(make_payload("pi_test", WebhookEvent::Failed)).await.unwrap();
        let order = order_store.get(7).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_unknown_intent_rejected() {
        let (webhook, _, _) = setup().await;
        let result = webhook.handle(make_payload("pi_does_not_exist", WebhookEvent::Paid)).await;
        assert!(matches!(result, Err(Error::UnknownIntent)));
    }
}
