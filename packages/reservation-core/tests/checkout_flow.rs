//! End-to-end checkout scenarios (§8 S1-S3).

use std::sync::Arc;

use reservation_core::checkout::CheckoutOrchestrator;
use reservation_core::ledger::memory::InMemoryLedgerClient;
use reservation_core::ledger::{BatcherHandle, LedgerClient, ResourceAccounting};
use reservation_core::orders::{InMemoryOrderStore, OrderStore};
use reservation_core::session::{InMemorySessionStore, SessionStore};
use reservation_core::{AppConfig, Error, OrderStatus, TicketClass};

async fn build(ticket_supply_a: u64, goodie_supply: u64) -> (CheckoutOrchestrator, Arc<dyn OrderStore>, Arc<dyn SessionStore>) {
    let client: Arc<dyn LedgerClient> = Arc::new(InMemoryLedgerClient::new());
    let batcher = BatcherHandle::spawn(client);
    let accounting = Arc::new(ResourceAccounting::new(batcher));
    accounting
        .initialize_supply(&AppConfig {
            ticket_supply_a,
            goodie_supply,
            ..Default::default()
        })
        .await
        .unwrap();

    let order_store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let orchestrator = CheckoutOrchestrator::new(
        accounting,
        order_store.clone(),
        session_store.clone(),
        300,
        "http://localhost:8080".to_string(),
    );

    (orchestrator, order_store, session_store)
}

/// S1: a single checkout against ample supply reaches HELD with a live
/// session and a bound payment intent.
#[tokio::test]
async fn s1_happy_path_checkout_reaches_held() {
    let (orchestrator, order_store, session_store) = build(10, 10).await;

    let response = orchestrator.checkout(TicketClass::A).await.unwrap();
    let order_id: u128 = response.order_id.parse().unwrap();

    let order = order_store.get(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Held);
    assert!(order.ticket_pending_id.is_some());
    assert!(order.goodie_pending_id.is_some());

    let intent_id = order.payment_intent_id.clone().unwrap();
    assert_eq!(session_store.resolve_intent(&intent_id).await.unwrap(), Some(order_id));
    assert!(session_store.get(order_id).await.unwrap().is_some());
}

/// S2: once ticket supply is exhausted, further checkouts fail cleanly and
/// leave a FAILED row with no pending ids (nothing to reconcile later).
#[tokio::test]
async fn s2_sold_out_checkout_fails_and_records_failed_order() {
    let (orchestrator, order_store, _session_store) = build(1, 10).await;

    let first = orchestrator.checkout(TicketClass::A).await.unwrap();
    let first_id: u128 = first.order_id.parse().unwrap();
    assert_eq!(order_store.get(first_id).await.unwrap().unwrap().status, OrderStatus::Held);

    let second = orchestrator.checkout(TicketClass::A).await;
    assert!(matches!(second, Err(Error::SoldOut)));
}

/// S3: goodie exhaustion must never block the ticket itself — checkout
/// still succeeds and reaches HELD, just without a goodie pending id.
#[tokio::test]
async fn s3_goodie_exhaustion_does_not_block_ticket_hold() {
    let (orchestrator, order_store, _session_store) = build(10, 1).await;

    let first = orchestrator.checkout(TicketClass::A).await.unwrap();
    let first_id: u128 = first.order_id.parse().unwrap();
    let first_order = order_store.get(first_id).await.unwrap().unwrap();
    assert_eq!(first_order.status, OrderStatus::Held);
    assert!(first_order.goodie_pending_id.is_some());

    // Second checkout exhausts the single goodie but must still hold a
    // ticket and reach HELD.
    let second = orchestrator.checkout(TicketClass::A).await.unwrap();
    let second_id: u128 = second.order_id.parse().unwrap();
    let second_order = order_store.get(second_id).await.unwrap().unwrap();
    assert_eq!(second_order.status, OrderStatus::Held);
    assert!(second_order.ticket_pending_id.is_some());
    assert!(second_order.goodie_pending_id.is_none());
}
