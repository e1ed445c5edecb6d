//! Checkout-to-webhook scenarios (§8 S4, S6).

use std::sync::Arc;

use reservation_core::checkout::CheckoutOrchestrator;
use reservation_core::ledger::memory::InMemoryLedgerClient;
use reservation_core::ledger::{BatcherHandle, LedgerClient, ResourceAccounting};
use reservation_core::orders::{InMemoryOrderStore, OrderStore};
use reservation_core::session::{InMemorySessionStore, SessionStore};
use reservation_core::webhook::{sign, WebhookEvent, WebhookOrchestrator, WebhookPayload};
use reservation_core::{AppConfig, OrderStatus, TicketClass};

const SECRET: &str = "integration-test-secret";

async fn build() -> (CheckoutOrchestrator, WebhookOrchestrator, Arc<dyn OrderStore>) {
    let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
    let batcher = BatcherHandle::spawn(client);
    let accounting = Arc::new(ResourceAccounting::new(batcher));
    accounting
        .initialize_supply(&AppConfig {
            ticket_supply_a: 10,
            goodie_supply: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    let order_store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let checkout = CheckoutOrchestrator::new(
        accounting.clone(),
        order_store.clone(),
        session_store.clone(),
        300,
        "http://localhost:8080".to_string(),
    );
    let webhook = WebhookOrchestrator::new(accounting, order_store.clone(), session_store, SECRET.to_string());

    (checkout, webhook, order_store)
}

fn payload(intent_id: &str, event: WebhookEvent) -> WebhookPayload {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign(SECRET, intent_id, event, timestamp);
    WebhookPayload {
        event,
        intent_id: intent_id.to_string(),
        timestamp,
        signature,
    }
}

/// S4: a `payment.failed` webhook cancels a HELD order and releases its
/// holds (observable here as the held accounting no longer blocking a
/// fresh order from being created for the same class).
#[tokio::test]
async fn s4_payment_failed_cancels_order() {
    let (checkout, webhook, order_store) = build().await;

    let response = checkout.checkout(TicketClass::A).await.unwrap();
    let order_id: u128 = response.order_id.parse().unwrap();
    let order = order_store.get(order_id).await.unwrap().unwrap();
    let intent_id = order.payment_intent_id.clone().unwrap();

    webhook.handle(payload(&intent_id, WebhookEvent::Failed)).await.unwrap();

    let order = order_store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
}

/// S6: redelivering the same `payment.paid` webhook many times over must
/// never double-post and must always end in PAID, not error.
#[tokio::test]
async fn s6_duplicate_webhook_delivery_is_idempotent() {
    let (checkout, webhook, order_store) = build().await;

    let response = checkout.checkout(TicketClass::A).await.unwrap();
    let order_id: u128 = response.order_id.parse().unwrap();
    let intent_id = order_store.get(order_id).await.unwrap().unwrap().payment_intent_id.unwrap();

    for _ in 0..10 {
        webhook.handle(payload(&intent_id, WebhookEvent::Paid)).await.unwrap();
    }

    let order = order_store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

/// A `failed` webhook delivered after the order is already PAID must be a
/// no-op: terminal states never regress (§8 property 3).
#[tokio::test]
async fn terminal_state_does_not_regress_on_late_failed_webhook() {
    let (checkout, webhook, order_store) = build().await;

    let response = checkout.checkout(TicketClass::A).await.unwrap();
    let order_id: u128 = response.order_id.parse().unwrap();
    let intent_id = order_store.get(order_id).await.unwrap().unwrap().payment_intent_id.unwrap();

    webhook.handle(payload(&intent_id, WebhookEvent::Paid)).await.unwrap();
    webhook.handle(payload(&intent_id, WebhookEvent::Failed)).await.unwrap();

    let order = order_store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}
