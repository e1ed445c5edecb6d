//! HTTP surface (§6).
//!
//! Grounded on `packages/monitoring-engine/src/api.rs`: `actix_web::App`
//! wrapped in `actix_cors::Cors` and `middleware::Logger`, `web::Data`
//! shared state, and the same `ALLOWED_ORIGIN` dev-mode fallback.

use std::net::IpAddr;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Serialize;

use crate::checkout::{CheckoutOrchestrator, CheckoutRateLimiter, CheckoutRequest};
use crate::ledger::ResourceAccounting;
use crate::mock_provider::{MockProvider, RedirectTarget};
use crate::orders::OrderStore;
use crate::webhook::{WebhookOrchestrator, WebhookPayload};
use crate::{AppConfig, Error};

pub struct AppState {
    pub checkout: CheckoutOrchestrator,
    pub webhook: Arc<WebhookOrchestrator>,
    pub mock_provider: MockProvider,
    pub order_store: Arc<dyn OrderStore>,
    pub accounting: Arc<ResourceAccounting>,
    pub rate_limiter: CheckoutRateLimiter,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Error::SoldOut => StatusCode::CONFLICT,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::BadSignature => StatusCode::UNAUTHORIZED,
            Error::UnknownIntent | Error::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Error::LedgerTransport(_) | Error::LedgerBatch(_) | Error::Database(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::SessionStore(_) | Error::Config(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

fn client_ip(req: &HttpRequest) -> IpAddr {
    req.peer_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

/// `POST /checkout`
async fn checkout(
    req: HttpRequest,
    body: web::Json<CheckoutRequest>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    if !state.rate_limiter.check(client_ip(&req)) {
        return Err(Error::RateLimited.into());
    }

    let response = state.checkout.checkout(body.class).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `GET /orders/{id}`
async fn get_order(path: web::Path<String>, state: web::Data<AppState>) -> actix_web::Result<HttpResponse> {
    let order_id: u128 = path
        .into_inner()
        .parse()
        .map_err(|_| Error::OrderNotFound(0))?;

    match state.order_store.get(order_id).await? {
        Some(order) => Ok(HttpResponse::Ok().json(order)),
        None => Err(Error::OrderNotFound(order_id).into()),
    }
}

/// `POST /payments/webhook`
async fn payments_webhook(
    body: web::Json<WebhookPayload>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    match state.webhook.handle(body.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(Error::BadSignature) => Err(Error::BadSignature.into()),
        // Every other fault still resolves to 200: the provider must not
        // be made to retry a webhook whose effects already landed or
        // whose order simply doesn't exist anymore.
        Err(e) => {
            tracing::warn!("webhook handling error (still returning 200): {e}");
            Ok(HttpResponse::Ok().finish())
        }
    }
}

/// `GET /payments/mock/{intent_id}`
async fn mock_payment_redirect(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let intent_id = path.into_inner();
    match state.mock_provider.redirect(&intent_id).await {
        Ok(RedirectTarget::Success { order_id }) => Ok(HttpResponse::Found()
            .append_header(("Location", format!("/success?order_id={order_id}")))
            .finish()),
        Ok(RedirectTarget::Cancel) => Ok(HttpResponse::Found().append_header(("Location", "/cancel")).finish()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /health` — probes both the ledger (via the Batcher) and the
/// order store's own connection pool.
async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let ledger_result = state.accounting.health_check().await;
    let db_result = state.order_store.health_check().await;

    if let Err(e) = &ledger_result {
        tracing::error!("ledger health check failed: {e}");
    }
    if let Err(e) = &db_result {
        tracing::error!("order store health check failed: {e}");
    }

    if ledger_result.is_ok() && db_result.is_ok() {
        HttpResponse::Ok().json(HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
        })
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "unhealthy",
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}

fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/checkout", web::post().to(checkout))
        .route("/orders/{id}", web::get().to(get_order))
        .route("/payments/webhook", web::post().to(payments_webhook))
        .route("/payments/mock/{intent_id}", web::get().to(mock_payment_redirect));
}

pub async fn start_api_server(state: Arc<AppState>, config: &AppConfig) -> crate::Result<()> {
    tracing::info!("starting API server on {}", config.api_bind_address);

    let allowed_origin = config.allowed_origin.clone();
    let app_state = web::Data::from(state);

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
            .max_age(3600);

        cors = match &allowed_origin {
            Some(origin) => {
                tracing::info!("using restricted CORS allowed_origin={origin}");
                cors.allowed_origin(origin)
            }
            None => {
                tracing::warn!("ALLOWED_ORIGIN not set — falling back to allow_any_origin (dev mode)");
                cors.allow_any_origin()
            }
        };

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(&config.api_bind_address)
    .map_err(Error::Io)?
    .run()
    .await
    .map_err(Error::Io)?;

    Ok(())
}
