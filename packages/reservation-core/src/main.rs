//! Reservation Core binary.

use std::sync::Arc;

use reservation_core::api::{start_api_server, AppState};
use reservation_core::checkout::{CheckoutOrchestrator, CheckoutRateLimiter};
use reservation_core::ledger::{BatcherHandle, LedgerClient, ResourceAccounting, TcpLedgerClient};
use reservation_core::mock_provider::MockProvider;
use reservation_core::orders::{OrderStore, PostgresOrderStore};
use reservation_core::session::{InMemorySessionStore, RedisSessionStore, SessionStore};
use reservation_core::sweep::TimeoutSweep;
use reservation_core::webhook::WebhookOrchestrator;
use reservation_core::AppConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const CHECKOUT_RATE_LIMIT_PER_MINUTE: u32 = 60;
const DB_POOL_MAX_CONNECTIONS: usize = 16;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    tracing::info!("starting reservation-core");

    let config = AppConfig::from_env();
    tracing::info!("configuration:");
    tracing::info!("  ledger address: {}", config.tb_address);
    tracing::info!("  hold timeout: {}s", config.hold_timeout_seconds);
    tracing::info!("  sweep interval: {}s, grace: {}s", config.sweep_interval_seconds, config.sweep_grace_seconds);

    let ledger_client: Arc<dyn LedgerClient> = Arc::new(TcpLedgerClient::connect(&config.tb_address).await?);
    let batcher = BatcherHandle::spawn(ledger_client);
    let accounting = Arc::new(ResourceAccounting::new(batcher));
    accounting.initialize_supply(&config).await?;
    tracing::info!("ledger topology initialized");

    let order_store: Arc<dyn OrderStore> =
        Arc::new(PostgresOrderStore::new(&config.database_url, DB_POOL_MAX_CONNECTIONS).await?);

    let session_store: Arc<dyn SessionStore> = match &config.session_store_url {
        Some(url) => {
            tracing::info!("using redis session store");
            Arc::new(RedisSessionStore::new(url)?)
        }
        None => {
            tracing::info!("using in-memory session store (single-process mode)");
            let store = Arc::new(InMemorySessionStore::new());
            let _session_sweep_handle = store.clone().spawn_sweep(config.sweep_interval_seconds);
            store
        }
    };

    let mock_base_url = config
        .mock_webhook_url
        .clone()
        .unwrap_or_else(|| format!("http://{}", config.api_bind_address));

    let checkout = CheckoutOrchestrator::new(
        accounting.clone(),
        order_store.clone(),
        session_store.clone(),
        config.hold_timeout_seconds,
        mock_base_url,
    );

    let webhook = Arc::new(WebhookOrchestrator::new(
        accounting.clone(),
        order_store.clone(),
        session_store.clone(),
        config.webhook_secret.clone(),
    ));

    let mock_provider = MockProvider::new(order_store.clone(), webhook.clone(), config.webhook_secret.clone());

    let sweep = Arc::new(TimeoutSweep::new(
        accounting.clone(),
        order_store.clone(),
        session_store.clone(),
        config.sweep_grace_seconds,
    ));
    let _sweep_handle = sweep.spawn(config.sweep_interval_seconds);

    let state = Arc::new(AppState {
        checkout,
        webhook,
        mock_provider,
        order_store,
        accounting,
        rate_limiter: CheckoutRateLimiter::new(CHECKOUT_RATE_LIMIT_PER_MINUTE),
    });

    tracing::info!("press Ctrl+C to stop");

    let api_result = tokio::select! {
        result = start_api_server(state, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    api_result?;
    Ok(())
}
