pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::cart::CartService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;

/// The service layer, wired once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub payments: PaymentService,
    pub carts: CartService,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Builds the versioned API router. State is applied by the caller.
pub fn api_v1_routes() -> Router<AppState> {
    let api = Router::new()
        .nest("/order", handlers::orders::order_routes())
        .nest("/payment", handlers::payments::payment_routes())
        .nest("/cart", handlers::carts::cart_routes())
        .route("/health", get(health_check));

    Router::new().nest("/api/v1", api)
}
