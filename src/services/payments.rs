use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{self, PaymentType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{OrderService, PlaceOrderInput};
use crate::services::pricing::{self, CartLine};

/// Id prefix of intents minted by the simulated gateway.
pub const SIMULATED_INTENT_PREFIX: &str = "mock_payment_intent_";
const SIMULATED_SECRET_PREFIX: &str = "mock_client_secret_";

/// Lifecycle state of a payment intent as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresAction,
    Canceled,
    #[serde(untagged)]
    Other(String),
}

/// Request to mint an intent. Amount is in minor units (paise/cents).
#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
}

/// An intent as returned by the provider.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount_minor: i64,
    pub status: IntentStatus,
}

/// Seam between checkout and the payment provider. Exactly one
/// implementation is selected at startup from configuration.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn is_simulated(&self) -> bool;
    async fn create_intent(&self, req: CreateIntent) -> Result<GatewayIntent, ServiceError>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, ServiceError>;
}

/// Deterministic in-process gateway for environments without a Stripe key.
/// Every intent it mints is immediately `succeeded`.
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn is_simulated(&self) -> bool {
        true
    }

    async fn create_intent(&self, req: CreateIntent) -> Result<GatewayIntent, ServiceError> {
        let nonce = Uuid::new_v4().simple().to_string();
        Ok(GatewayIntent {
            id: format!("{SIMULATED_INTENT_PREFIX}{nonce}"),
            client_secret: Some(format!("{SIMULATED_SECRET_PREFIX}{nonce}")),
            amount_minor: req.amount_minor,
            status: IntentStatus::Succeeded,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            id: intent_id.to_string(),
            client_secret: None,
            amount_minor: 0,
            status: IntentStatus::Succeeded,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntentPayload {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    status: IntentStatus,
}

/// Live gateway speaking the Stripe payment-intents REST API.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String) -> Self {
        StripeGateway {
            http: reqwest::Client::new(),
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn parse_intent(
        response: reqwest::Response,
        context: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body, "stripe rejected {context}");
            return Err(ServiceError::ProviderFailure(format!(
                "Payment {context} failed"
            )));
        }
        let payload: StripeIntentPayload = response.json().await.map_err(|e| {
            error!(error = %e, "stripe returned an unreadable intent payload");
            ServiceError::ProviderFailure(format!("Payment {context} failed"))
        })?;
        Ok(GatewayIntent {
            id: payload.id,
            client_secret: payload.client_secret,
            amount_minor: payload.amount,
            status: payload.status,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn is_simulated(&self) -> bool {
        false
    }

    async fn create_intent(&self, req: CreateIntent) -> Result<GatewayIntent, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), req.amount_minor.to_string()),
            ("currency".to_string(), req.currency),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in req.metadata {
            form.push((format!("metadata[{key}]"), value));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "stripe create_intent request failed");
                ServiceError::ProviderFailure("Payment setup failed".to_string())
            })?;

        Self::parse_intent(response, "setup").await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{intent_id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "stripe retrieve_intent request failed");
                ServiceError::ProviderFailure("Payment verification failed".to_string())
            })?;

        Self::parse_intent(response, "verification").await
    }
}

/// Pick the gateway once at startup: Stripe when a secret key is
/// configured, the simulation otherwise.
pub fn gateway_from_config(config: &AppConfig) -> Arc<dyn PaymentGateway> {
    match &config.stripe_secret_key {
        Some(key) if config.stripe_enabled() => Arc::new(StripeGateway::new(
            key.clone(),
            config.stripe_api_base.clone(),
        )),
        _ => {
            info!("no stripe key configured, using simulated payments");
            Arc::new(SimulatedGateway)
        }
    }
}

/// What checkout hands the client to drive the payment UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutIntent {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_simulated: Option<bool>,
}

/// Read-only view of an intent's current state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStatusView {
    pub payment_intent_id: String,
    pub status: IntentStatus,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_simulated: Option<bool>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        PaymentService {
            db,
            gateway,
            orders,
            event_sender,
            currency,
        }
    }

    /// Price the cart and mint a payment intent for it. Nothing is
    /// persisted yet; the order only materializes on confirmation.
    #[instrument(skip(self, lines))]
    pub async fn create_intent(
        &self,
        user_id: Uuid,
        lines: &[CartLine],
        address_id: Option<Uuid>,
    ) -> Result<CheckoutIntent, ServiceError> {
        let address_id = validate_checkout(lines, address_id)?;

        let total = pricing::total_for_lines(&self.db, lines).await?;
        let amount_minor = to_minor_units(total.amount)?;

        let intent = self
            .gateway
            .create_intent(CreateIntent {
                amount_minor,
                currency: self.currency.clone(),
                metadata: vec![
                    ("userId".to_string(), user_id.to_string()),
                    ("addressId".to_string(), address_id.to_string()),
                ],
            })
            .await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                intent_id: intent.id.clone(),
                user_id,
                amount: total.amount,
                simulated: self.gateway.is_simulated(),
            })
            .await;

        Ok(CheckoutIntent {
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount: total.amount,
            is_simulated: self.gateway.is_simulated().then_some(true),
        })
    }

    /// Verify the intent (unless simulated) and materialize the paid
    /// order. The amount billed is recomputed at confirmation time.
    #[instrument(skip(self, lines))]
    pub async fn confirm(
        &self,
        user_id: Uuid,
        intent_id: &str,
        lines: &[CartLine],
        address_id: Option<Uuid>,
    ) -> Result<order::Model, ServiceError> {
        validate_checkout(lines, address_id)?;

        let simulated = self.gateway.is_simulated() || is_simulated_intent(intent_id);
        if !simulated {
            let intent = self.gateway.retrieve_intent(intent_id).await?;
            if intent.status != IntentStatus::Succeeded {
                return Err(ServiceError::PaymentNotCompleted);
            }
        }

        let order = self
            .orders
            .place_order(PlaceOrderInput {
                user_id,
                lines: lines.to_vec(),
                address_id,
                payment_type: PaymentType::Online,
                is_paid: true,
                payment_intent_id: Some(intent_id.to_string()),
            })
            .await?;

        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                intent_id: intent_id.to_string(),
                order_id: order.id,
            })
            .await;

        Ok(order)
    }

    /// Current provider-side state of an intent. Simulated intents are
    /// always `succeeded` and carry no amount.
    #[instrument(skip(self))]
    pub async fn status(&self, intent_id: &str) -> Result<IntentStatusView, ServiceError> {
        if self.gateway.is_simulated() || is_simulated_intent(intent_id) {
            return Ok(IntentStatusView {
                payment_intent_id: intent_id.to_string(),
                status: IntentStatus::Succeeded,
                amount: Decimal::ZERO,
                is_simulated: Some(true),
            });
        }

        let intent = self.gateway.retrieve_intent(intent_id).await?;
        Ok(IntentStatusView {
            payment_intent_id: intent.id,
            status: intent.status,
            amount: Decimal::from(intent.amount_minor) / Decimal::from(100),
            is_simulated: None,
        })
    }
}

pub fn is_simulated_intent(intent_id: &str) -> bool {
    intent_id.starts_with(SIMULATED_INTENT_PREFIX)
}

fn validate_checkout(lines: &[CartLine], address_id: Option<Uuid>) -> Result<Uuid, ServiceError> {
    let valid_lines = !lines.is_empty() && lines.iter().all(|line| line.quantity >= 1);
    match address_id {
        Some(address_id) if valid_lines => Ok(address_id),
        _ => Err(ServiceError::ValidationFailed(
            "Invalid order details".to_string(),
        )),
    }
}

/// Major-unit Decimal amount to integral minor units (×100, rounded).
/// Midpoints round away from zero, so a half-paisa is never dropped.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError("order amount out of range".to_string()))
}
