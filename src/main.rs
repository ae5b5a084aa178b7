use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use greencart_api::config::{self, AppConfig};
use greencart_api::db;
use greencart_api::events::{self, EventSender};
use greencart_api::services::cart::{run_cart_sync_worker, CartService, CartStore, CartSyncOutbox};
use greencart_api::services::orders::OrderService;
use greencart_api::services::payments::{gateway_from_config, PaymentService};
use greencart_api::{api_v1_routes, AppServices, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        port = config.port,
        "starting greencart-api"
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to the database")?,
    );
    db::check_connection(&db)
        .await
        .context("database ping failed")?;

    if config.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("database migration failed")?;
    }

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(events::process_events(event_rx));

    let cart_store = CartStore::new(db.clone());
    let (cart_outbox, cart_rx) = CartSyncOutbox::new(config.cart_sync_queue_capacity);
    tokio::spawn(run_cart_sync_worker(
        cart_rx,
        cart_store.clone(),
        event_sender.clone(),
    ));

    let gateway = gateway_from_config(&config);
    let orders = OrderService::new(db.clone(), event_sender.clone());
    let payments = PaymentService::new(
        db.clone(),
        gateway,
        orders.clone(),
        event_sender.clone(),
        config.currency.clone(),
    );
    let carts = CartService::new(cart_store, cart_outbox);

    let state = AppState {
        db,
        config: config.clone(),
        event_sender,
        services: AppServices {
            orders,
            payments,
            carts,
        },
    };

    let app = api_v1_routes()
        .layer(build_cors_layer(&config)?)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

fn build_cors_layer(config: &AppConfig) -> anyhow::Result<CorsLayer> {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE];

    if config.has_cors_allowed_origins() {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| o.parse().with_context(|| format!("invalid CORS origin: {o}")))
            .collect::<anyhow::Result<_>>()?;

        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(config.cors_allow_credentials));
    }

    if config.should_allow_permissive_cors() {
        warn!("CORS is mirroring request origins; do not use this outside development");
        return Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(config.cors_allow_credentials));
    }

    // load_config() enforces this, but the layer is built separately.
    anyhow::bail!("no CORS origins configured outside development")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
