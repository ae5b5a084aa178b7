use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{Condition, DatabaseConnection, QueryOrder, Set, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order::PaymentType;
use crate::entities::{address, order, order_item, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::{self, CartLine};

/// Status a freshly materialized order starts in.
pub const INITIAL_ORDER_STATUS: &str = "Order Placed";

/// Everything needed to materialize an order. `is_paid` and
/// `payment_intent_id` come from the payment flow; a cash-on-delivery
/// order passes `false` and `None`.
#[derive(Debug, Clone)]
pub struct PlaceOrderInput {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
    pub address_id: Option<Uuid>,
    pub payment_type: PaymentType,
    pub is_paid: bool,
    pub payment_intent_id: Option<String>,
}

/// One order line joined with its product for listing responses. The
/// product is `None` when it has since been removed from the catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineDetail {
    pub product: Option<product::Model>,
    pub quantity: i32,
}

/// A fully assembled order as the storefront renders it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<OrderLineDetail>,
    pub address: Option<address::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        OrderService { db, event_sender }
    }

    /// Materialize an order from checkout lines. The stored amount is
    /// always recomputed from current catalog prices; any client-supplied
    /// total is ignored.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn place_order(&self, input: PlaceOrderInput) -> Result<order::Model, ServiceError> {
        let address_id = validate_order_input(&input)?;

        let total = pricing::total_for_lines(&self.db, &input.lines).await?;
        let order = self
            .persist_order(&input, address_id, total.amount)
            .await?;

        info!(order_id = %order.id, amount = %order.amount, "order placed");
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id: order.user_id,
                amount: order.amount,
            })
            .await;

        Ok(order)
    }

    async fn persist_order(
        &self,
        input: &PlaceOrderInput,
        address_id: Uuid,
        amount: Decimal,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let order = order::Model {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            address_id,
            amount,
            payment_type: input.payment_type,
            is_paid: input.is_paid,
            payment_intent_id: input.payment_intent_id.clone(),
            status: INITIAL_ORDER_STATUS.to_string(),
            created_at: now,
            updated_at: now,
        };

        let txn = self.db.begin().await?;
        order::Entity::insert(order::ActiveModel::from(order.clone()))
            .exec(&txn)
            .await?;
        for line in &input.lines {
            order_item::Entity::insert(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
            })
            .exec(&txn)
            .await?;
        }
        txn.commit().await?;

        Ok(order)
    }

    /// Orders visible to one customer: their COD orders plus any order
    /// that has been paid, newest first.
    #[instrument(skip(self))]
    pub async fn user_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(visible_order_condition())
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        self.assemble(orders).await
    }

    /// Every visible order across customers, newest first. Seller view.
    #[instrument(skip(self))]
    pub async fn all_orders(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = order::Entity::find()
            .filter(visible_order_condition())
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        self.assemble(orders).await
    }

    async fn assemble(&self, orders: Vec<order::Model>) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(&*self.db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let address_ids: Vec<Uuid> = orders.iter().map(|o| o.address_id).collect();
        let addresses: HashMap<Uuid, address::Model> = address::Entity::find()
            .filter(address::Column::Id.is_in(address_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut items_by_order: HashMap<Uuid, Vec<OrderLineDetail>> = HashMap::new();
        for item in items {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(OrderLineDetail {
                    product: products.get(&item.product_id).cloned(),
                    quantity: item.quantity,
                });
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                let address = addresses.get(&order.address_id).cloned();
                OrderDetails {
                    order,
                    items,
                    address,
                }
            })
            .collect())
    }
}

/// COD orders are visible immediately; online orders only once paid.
fn visible_order_condition() -> Condition {
    Condition::any()
        .add(order::Column::PaymentType.eq(PaymentType::Cod))
        .add(order::Column::IsPaid.eq(true))
}

fn validate_order_input(input: &PlaceOrderInput) -> Result<Uuid, ServiceError> {
    let valid_lines =
        !input.lines.is_empty() && input.lines.iter().all(|line| line.quantity >= 1);
    match input.address_id {
        Some(address_id) if valid_lines => Ok(address_id),
        _ => Err(ServiceError::ValidationFailed(
            "Invalid order details".to_string(),
        )),
    }
}
