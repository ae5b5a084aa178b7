use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::SessionUser;
use crate::errors::ServiceError;
use crate::handlers::orders::{to_lines, CheckoutItem};
use crate::handlers::MessageResponse;
use crate::services::payments::{CheckoutIntent, IntentStatusView};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub items: Vec<CheckoutItem>,
    pub address: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
    pub items: Vec<CheckoutItem>,
    pub address: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub success: bool,
    #[serde(flatten)]
    pub intent: CheckoutIntent,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: IntentStatusView,
}

async fn create_intent(
    State(state): State<AppState>,
    user: SessionUser,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<IntentResponse>, ServiceError> {
    let intent = state
        .services
        .payments
        .create_intent(user.id, &to_lines(&body.items), body.address)
        .await?;

    Ok(Json(IntentResponse {
        success: true,
        intent,
    }))
}

async fn confirm_payment(
    State(state): State<AppState>,
    user: SessionUser,
    Json(body): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .payments
        .confirm(
            user.id,
            &body.payment_intent_id,
            &to_lines(&body.items),
            body.address,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok("Payment Successful. Order Placed")),
    ))
}

async fn intent_status(
    State(state): State<AppState>,
    _user: SessionUser,
    Path(intent_id): Path<String>,
) -> Result<Json<StatusResponse>, ServiceError> {
    let status = state.services.payments.status(&intent_id).await?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-intent", post(create_intent))
        .route("/confirm", post(confirm_payment))
        .route("/status/:intent_id", get(intent_status))
}
