use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::SessionUser;
use crate::errors::ServiceError;
use crate::handlers::MessageResponse;
use crate::AppState;

/// Full cart snapshot from the client: product id to quantity. The client
/// fires this after every local mutation and does not wait on the write.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartRequest {
    pub cart_items: BTreeMap<Uuid, u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub success: bool,
    pub cart_items: BTreeMap<Uuid, u32>,
}

async fn update_cart(
    State(state): State<AppState>,
    user: SessionUser,
    Json(body): Json<UpdateCartRequest>,
) -> Result<Json<MessageResponse>, ServiceError> {
    state.services.carts.sync(user.id, body.cart_items);
    Ok(Json(MessageResponse::ok("Cart Updated")))
}

/// The persisted snapshot, used to restore the cart on a fresh session.
async fn get_cart(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<CartResponse>, ServiceError> {
    let cart = state.services.carts.load(user.id).await?;
    Ok(Json(CartResponse {
        success: true,
        cart_items: cart.items().clone(),
    }))
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/update", post(update_cart))
}
