//! Mock payment provider.
//!
//! Replaces the real payment provider (explicit non-goal, §1). The
//! redirect target the checkout response points browsers at; on visit it
//! redirects onward to `/success` or `/cancel` and — simulating the
//! asynchronous nature of a real provider — schedules a delayed call into
//! the same webhook-handling code path the real provider would call,
//! carrying a correctly-signed payload. This keeps the webhook code path
//! identical whether the caller is the mock or a future real provider.

use std::sync::Arc;
use std::time::Duration;

use crate::orders::OrderStore;
use crate::webhook::{sign, WebhookEvent, WebhookOrchestrator, WebhookPayload};
use crate::{Error, Result};

/// Delay before the mock provider's simulated callback fires.
const CALLBACK_DELAY: Duration = Duration::from_millis(200);

pub enum RedirectTarget {
    Success { order_id: String },
    Cancel,
}

pub struct MockProvider {
    order_store: Arc<dyn OrderStore>,
    webhook: Arc<WebhookOrchestrator>,
    webhook_secret: String,
}

impl MockProvider {
    pub fn new(order_store: Arc<dyn OrderStore>, webhook: Arc<WebhookOrchestrator>, webhook_secret: String) -> Self {
        Self {
            order_store,
            webhook,
            webhook_secret,
        }
    }

    /// `GET /payments/mock/{intent_id}` (§6). Looks up the intent's order
    /// and schedules an asynchronous `payment.paid` callback.
    pub async fn redirect(&self, intent_id: &str) -> Result<RedirectTarget> {
        let Some(order) = self.order_store.get_by_intent(intent_id).await? else {
            return Err(Error::UnknownIntent);
        };

        self.schedule_callback(intent_id.to_string(), WebhookEvent::Paid);

        Ok(RedirectTarget::Success {
            order_id: order.order_id.to_string(),
        })
    }

    fn schedule_callback(&self, intent_id: String, event: WebhookEvent) {
        let webhook = self.webhook.clone();
        let secret = self.webhook_secret.clone();

        tokio::spawn(async move {
            tokio::time::sleep(CALLBACK_DELAY).await;
            let timestamp = chrono::Utc::now().timestamp();
            let signature = sign(&secret, &intent_id, event, timestamp);
            let payload = WebhookPayload {
                event,
                intent_id: intent_id.clone(),
                timestamp,
                signature,
            };
            if let Err(e) = webhook.handle(payload).await {
                tracing::warn!("mock provider callback for intent {intent_id} failed: {e}");
            }
        });
    }
}
