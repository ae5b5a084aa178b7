use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::SessionUser;
use crate::entities::order::PaymentType;
use crate::errors::ServiceError;
use crate::handlers::MessageResponse;
use crate::services::orders::{OrderDetails, PlaceOrderInput};
use crate::services::pricing::CartLine;
use crate::AppState;

/// One checkout line as the storefront sends it: a product id and a
/// quantity.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub product: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub items: Vec<CheckoutItem>,
    pub address: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    pub success: bool,
    pub orders: Vec<OrderDetails>,
}

pub fn to_lines(items: &[CheckoutItem]) -> Vec<CartLine> {
    items
        .iter()
        .map(|item| CartLine {
            product_id: item.product,
            quantity: item.quantity,
        })
        .collect()
}

async fn place_cod_order(
    State(state): State<AppState>,
    user: SessionUser,
    Json(body): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .orders
        .place_order(PlaceOrderInput {
            user_id: user.id,
            lines: to_lines(&body.items),
            address_id: body.address,
            payment_type: PaymentType::Cod,
            is_paid: false,
            payment_intent_id: None,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok("Order Placed Successfully")),
    ))
}

async fn get_user_orders(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<OrdersResponse>, ServiceError> {
    let orders = state.services.orders.user_orders(user.id).await?;
    Ok(Json(OrdersResponse {
        success: true,
        orders,
    }))
}

async fn get_all_orders(
    State(state): State<AppState>,
    _user: SessionUser,
) -> Result<Json<OrdersResponse>, ServiceError> {
    let orders = state.services.orders.all_orders().await?;
    Ok(Json(OrdersResponse {
        success: true,
        orders,
    }))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/cod", post(place_cod_order))
        .route("/user", get(get_user_orders))
        .route("/all", get(get_all_orders))
}
