use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait, Set};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use greencart_api::db::{establish_connection_with_config, run_migrations, DbConfig, DbPool};
use greencart_api::entities::order::PaymentType;
use greencart_api::entities::{address, order, product};
use greencart_api::errors::ServiceError;
use greencart_api::events::{Event, EventSender};
use greencart_api::services::cart::{
    run_cart_sync_worker, CartService, CartState, CartStore, CartSyncOutbox,
};
use greencart_api::services::orders::{OrderService, PlaceOrderInput};
use greencart_api::services::payments::{
    CreateIntent, GatewayIntent, IntentStatus, PaymentGateway, PaymentService, SimulatedGateway,
};
use greencart_api::services::pricing::CartLine;

async fn setup_test_db() -> Arc<DbPool> {
    let config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let pool = establish_connection_with_config(&config)
        .await
        .expect("failed to connect to in-memory sqlite");
    run_migrations(&pool).await.expect("migrations failed");
    Arc::new(pool)
}

fn test_event_sender() -> (Arc<EventSender>, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    (Arc::new(EventSender::new(tx)), rx)
}

async fn seed_product(
    db: &DbPool,
    price: Option<rust_decimal::Decimal>,
    offer_price: Option<rust_decimal::Decimal>,
) -> Uuid {
    let id = Uuid::new_v4();
    product::Entity::insert(product::ActiveModel {
        id: Set(id),
        name: Set("Organic Tomatoes".to_string()),
        category: Set("Vegetables".to_string()),
        price: Set(price),
        offer_price: Set(offer_price),
        images: Set(json!(["tomatoes.png"])),
        in_stock: Set(true),
        created_at: Set(Utc::now()),
    })
    .exec(db)
    .await
    .expect("failed to seed product");
    id
}

async fn seed_address(db: &DbPool, user_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    address::Entity::insert(address::ActiveModel {
        id: Set(id),
        user_id: Set(user_id),
        recipient: Set("Asha Rao".to_string()),
        street: Set("14 Market Lane".to_string()),
        city: Set("Pune".to_string()),
        state: Set("MH".to_string()),
        zipcode: Set("411001".to_string()),
        phone: Set("9900112233".to_string()),
    })
    .exec(db)
    .await
    .expect("failed to seed address");
    id
}

fn line(product_id: Uuid, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        quantity,
    }
}

async fn order_count(db: &DbPool) -> u64 {
    order::Entity::find()
        .count(db)
        .await
        .expect("failed to count orders")
}

#[tokio::test]
async fn cod_order_stores_the_catalog_computed_amount() {
    let db = setup_test_db().await;
    let (events, mut event_rx) = test_event_sender();
    let service = OrderService::new(db.clone(), events);

    let user_id = Uuid::new_v4();
    let offered = seed_product(&db, Some(dec!(50)), Some(dec!(40))).await;
    let plain = seed_product(&db, Some(dec!(60)), None).await;
    let address_id = seed_address(&db, user_id).await;

    let order = service
        .place_order(PlaceOrderInput {
            user_id,
            lines: vec![line(offered, 2), line(plain, 2)],
            address_id: Some(address_id),
            payment_type: PaymentType::Cod,
            is_paid: false,
            payment_intent_id: None,
        })
        .await
        .expect("order should be placed");

    // 2*40 + 2*60 = 200, plus floor(2%) = 4
    assert_eq!(order.amount, dec!(204));
    assert_eq!(order.payment_type, PaymentType::Cod);
    assert!(!order.is_paid);

    match event_rx.recv().await.expect("event expected") {
        Event::OrderPlaced {
            order_id, amount, ..
        } => {
            assert_eq!(order_id, order.id);
            assert_eq!(amount, dec!(204));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let listed = service.user_orders(user_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].items.len(), 2);
    assert_eq!(
        listed[0].address.as_ref().map(|a| a.city.as_str()),
        Some("Pune")
    );
}

#[tokio::test]
async fn invalid_checkout_input_creates_no_order() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let service = OrderService::new(db.clone(), events);

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&db, Some(dec!(25)), None).await;
    let address_id = seed_address(&db, user_id).await;

    let empty_items = service
        .place_order(PlaceOrderInput {
            user_id,
            lines: Vec::new(),
            address_id: Some(address_id),
            payment_type: PaymentType::Cod,
            is_paid: false,
            payment_intent_id: None,
        })
        .await;
    assert!(matches!(
        empty_items,
        Err(ServiceError::ValidationFailed(_))
    ));

    let missing_address = service
        .place_order(PlaceOrderInput {
            user_id,
            lines: vec![line(product_id, 1)],
            address_id: None,
            payment_type: PaymentType::Cod,
            is_paid: false,
            payment_intent_id: None,
        })
        .await;
    assert!(matches!(
        missing_address,
        Err(ServiceError::ValidationFailed(_))
    ));

    assert_eq!(order_count(&db).await, 0);
}

#[tokio::test]
async fn duplicate_cod_submissions_create_two_orders() {
    // There is deliberately no idempotency key on checkout; a double
    // submission is two orders.
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let service = OrderService::new(db.clone(), events);

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&db, Some(dec!(30)), None).await;
    let address_id = seed_address(&db, user_id).await;

    for _ in 0..2 {
        service
            .place_order(PlaceOrderInput {
                user_id,
                lines: vec![line(product_id, 1)],
                address_id: Some(address_id),
                payment_type: PaymentType::Cod,
                is_paid: false,
                payment_intent_id: None,
            })
            .await
            .expect("order should be placed");
    }

    assert_eq!(order_count(&db).await, 2);
}

#[tokio::test]
async fn user_orders_hides_unpaid_online_orders() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let service = OrderService::new(db.clone(), events);

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&db, Some(dec!(10)), None).await;
    let address_id = seed_address(&db, user_id).await;

    let place = |payment_type, is_paid| {
        service.place_order(PlaceOrderInput {
            user_id,
            lines: vec![line(product_id, 1)],
            address_id: Some(address_id),
            payment_type,
            is_paid,
            payment_intent_id: None,
        })
    };

    place(PaymentType::Cod, false).await.unwrap();
    let pending = place(PaymentType::Online, false).await.unwrap();
    let paid = place(PaymentType::Online, true).await.unwrap();

    let visible = service.user_orders(user_id).await.unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|o| o.order.id != pending.id));
    assert!(visible.iter().any(|o| o.order.id == paid.id));

    let all = service.all_orders().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn simulated_payment_flow_places_a_paid_order() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let orders = OrderService::new(db.clone(), events.clone());
    let payments = PaymentService::new(
        db.clone(),
        Arc::new(SimulatedGateway),
        orders.clone(),
        events,
        "inr".to_string(),
    );

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&db, Some(dec!(100)), None).await;
    let address_id = seed_address(&db, user_id).await;
    let lines = vec![line(product_id, 1)];

    let intent = payments
        .create_intent(user_id, &lines, Some(address_id))
        .await
        .expect("intent should be created");
    assert!(intent.payment_intent_id.starts_with("mock_payment_intent_"));
    assert_eq!(intent.amount, dec!(102));
    assert_eq!(intent.is_simulated, Some(true));
    // Nothing is persisted until confirmation.
    assert_eq!(order_count(&db).await, 0);

    let order = payments
        .confirm(user_id, &intent.payment_intent_id, &lines, Some(address_id))
        .await
        .expect("confirmation should place the order");
    assert_eq!(order.payment_type, PaymentType::Online);
    assert!(order.is_paid);
    assert_eq!(
        order.payment_intent_id.as_deref(),
        Some(intent.payment_intent_id.as_str())
    );
    assert_eq!(order.amount, dec!(102));

    let status = payments
        .status(&intent.payment_intent_id)
        .await
        .expect("status should resolve");
    assert_eq!(status.status, IntentStatus::Succeeded);
    assert_eq!(status.amount, dec!(0));
    assert_eq!(status.is_simulated, Some(true));
}

struct UnsettledGateway;

#[async_trait]
impl PaymentGateway for UnsettledGateway {
    fn is_simulated(&self) -> bool {
        false
    }

    async fn create_intent(&self, req: CreateIntent) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            id: "pi_test_unsettled".to_string(),
            client_secret: Some("pi_test_unsettled_secret".to_string()),
            amount_minor: req.amount_minor,
            status: IntentStatus::RequiresPaymentMethod,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            id: intent_id.to_string(),
            client_secret: None,
            amount_minor: 0,
            status: IntentStatus::Processing,
        })
    }
}

#[tokio::test]
async fn unconfirmed_payment_places_no_order() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let orders = OrderService::new(db.clone(), events.clone());
    let payments = PaymentService::new(
        db.clone(),
        Arc::new(UnsettledGateway),
        orders,
        events,
        "inr".to_string(),
    );

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&db, Some(dec!(100)), None).await;
    let address_id = seed_address(&db, user_id).await;
    let lines = vec![line(product_id, 1)];

    let result = payments
        .confirm(user_id, "pi_test_unsettled", &lines, Some(address_id))
        .await;
    assert!(matches!(result, Err(ServiceError::PaymentNotCompleted)));
    assert_eq!(order_count(&db).await, 0);

    // Retrying fails the same way without side effects.
    let retry = payments
        .confirm(user_id, "pi_test_unsettled", &lines, Some(address_id))
        .await;
    assert!(matches!(retry, Err(ServiceError::PaymentNotCompleted)));
    assert_eq!(order_count(&db).await, 0);
}

#[tokio::test]
async fn cart_sync_worker_persists_the_latest_snapshot() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let store = CartStore::new(db.clone());
    let (outbox, rx) = CartSyncOutbox::new(8);
    let worker = tokio::spawn(run_cart_sync_worker(rx, store.clone(), events));

    let user_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();
    outbox.enqueue(
        user_id,
        CartState::from_items(BTreeMap::from([(product_id, 2)])),
    );
    outbox.enqueue(
        user_id,
        CartState::from_items(BTreeMap::from([(product_id, 5)])),
    );
    drop(outbox);

    // Closing the outbox stops the worker once the queue is drained.
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker should stop")
        .expect("worker should not panic");

    let saved = store
        .load(user_id)
        .await
        .expect("load should succeed")
        .expect("cart row should exist");
    assert_eq!(saved.quantity(product_id), 5);
    assert_eq!(saved.count(), 5);
}

#[tokio::test]
async fn cart_service_restores_the_synced_snapshot() {
    let db = setup_test_db().await;
    let (events, _event_rx) = test_event_sender();
    let store = CartStore::new(db.clone());
    let (outbox, rx) = CartSyncOutbox::new(8);
    let worker = tokio::spawn(run_cart_sync_worker(rx, store.clone(), events));
    let service = CartService::new(store, outbox);

    let user_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();
    service.sync(
        user_id,
        BTreeMap::from([(product_id, 3), (Uuid::new_v4(), 0)]),
    );

    // Dropping the service closes the outbox; the worker drains and stops.
    drop(service);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker should stop")
        .expect("worker should not panic");

    let (idle_outbox, _idle_rx) = CartSyncOutbox::new(1);
    let service = CartService::new(CartStore::new(db.clone()), idle_outbox);

    let cart = service.load(user_id).await.expect("load should succeed");
    assert_eq!(cart.quantity(product_id), 3);
    assert_eq!(cart.count(), 3);

    // A user with no persisted row gets an empty cart, not an error.
    let empty = service
        .load(Uuid::new_v4())
        .await
        .expect("load should succeed");
    assert!(empty.is_empty());
}
