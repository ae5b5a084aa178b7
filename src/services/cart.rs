use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::entities::cart;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::CartLine;

/// Immutable cart snapshot: product id to quantity. Every mutation returns
/// a new snapshot, so a snapshot handed to the sync outbox can never be
/// changed underneath the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    items: BTreeMap<Uuid, u32>,
}

impl CartState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: BTreeMap<Uuid, u32>) -> Self {
        let items = items.into_iter().filter(|(_, qty)| *qty > 0).collect();
        CartState { items }
    }

    /// Add one unit of a product.
    pub fn add(&self, product_id: Uuid) -> Self {
        let mut items = self.items.clone();
        *items.entry(product_id).or_insert(0) += 1;
        CartState { items }
    }

    /// Remove one unit; the line disappears when it reaches zero.
    pub fn remove(&self, product_id: Uuid) -> Self {
        let mut items = self.items.clone();
        if let Some(qty) = items.get_mut(&product_id) {
            *qty = qty.saturating_sub(1);
            if *qty == 0 {
                items.remove(&product_id);
            }
        }
        CartState { items }
    }

    /// Set an absolute quantity; zero deletes the line.
    pub fn with_quantity(&self, product_id: Uuid, quantity: u32) -> Self {
        let mut items = self.items.clone();
        if quantity == 0 {
            items.remove(&product_id);
        } else {
            items.insert(product_id, quantity);
        }
        CartState { items }
    }

    pub fn clear(&self) -> Self {
        CartState::new()
    }

    /// Total units across all lines.
    pub fn count(&self) -> u64 {
        self.items.values().map(|&qty| u64::from(qty)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn quantity(&self, product_id: Uuid) -> u32 {
        self.items.get(&product_id).copied().unwrap_or(0)
    }

    pub fn items(&self) -> &BTreeMap<Uuid, u32> {
        &self.items
    }

    /// The snapshot as checkout lines.
    pub fn lines(&self) -> Vec<CartLine> {
        self.items
            .iter()
            .map(|(&product_id, &qty)| CartLine {
                product_id,
                quantity: qty as i32,
            })
            .collect()
    }

    fn to_json(&self) -> serde_json::Value {
        json!(self
            .items
            .iter()
            .map(|(id, qty)| (id.to_string(), *qty))
            .collect::<BTreeMap<String, u32>>())
    }
}

/// Persists cart snapshots, one row per user, overwritten wholesale.
#[derive(Clone)]
pub struct CartStore {
    db: Arc<DatabaseConnection>,
}

impl CartStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        CartStore { db }
    }

    /// Upsert the user's cart row (last write wins).
    #[instrument(skip(self, state), fields(count = state.count()))]
    pub async fn save(&self, user_id: Uuid, state: &CartState) -> Result<(), ServiceError> {
        let model = cart::ActiveModel {
            user_id: Set(user_id),
            items: Set(state.to_json()),
            updated_at: Set(Utc::now()),
        };

        cart::Entity::insert(model)
            .on_conflict(
                OnConflict::column(cart::Column::UserId)
                    .update_columns([cart::Column::Items, cart::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&*self.db)
            .await?;

        debug!(%user_id, "cart saved");
        Ok(())
    }

    pub async fn load(&self, user_id: Uuid) -> Result<Option<CartState>, ServiceError> {
        let row = cart::Entity::find_by_id(user_id).one(&*self.db).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let items: BTreeMap<Uuid, u32> =
            serde_json::from_value(row.items).unwrap_or_default();
        Ok(Some(CartState::from_items(items)))
    }
}

/// A pending cart write queued for the background sync worker.
#[derive(Debug, Clone)]
pub struct CartSyncJob {
    pub user_id: Uuid,
    pub state: CartState,
}

/// Fire-and-forget handoff of cart snapshots to the sync worker. A full
/// queue drops the write with a warning; the next sync for the same user
/// supersedes it anyway.
#[derive(Clone)]
pub struct CartSyncOutbox {
    tx: mpsc::Sender<CartSyncJob>,
}

impl CartSyncOutbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CartSyncJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (CartSyncOutbox { tx }, rx)
    }

    pub fn enqueue(&self, user_id: Uuid, state: CartState) {
        if let Err(e) = self.tx.try_send(CartSyncJob { user_id, state }) {
            warn!(%user_id, error = %e, "cart sync dropped");
        }
    }
}

/// Drains the outbox, writing each snapshot through the store. Jobs are
/// applied in arrival order, so the latest enqueue for a user is the one
/// that sticks.
pub async fn run_cart_sync_worker(
    mut rx: mpsc::Receiver<CartSyncJob>,
    store: CartStore,
    event_sender: Arc<EventSender>,
) {
    while let Some(job) = rx.recv().await {
        match store.save(job.user_id, &job.state).await {
            Ok(()) => {
                event_sender
                    .send_or_log(Event::CartSynced {
                        user_id: job.user_id,
                    })
                    .await;
            }
            Err(e) => error!(user_id = %job.user_id, error = %e, "cart sync failed"),
        }
    }
    debug!("cart sync worker stopped");
}

/// Cart operations exposed to the HTTP layer.
#[derive(Clone)]
pub struct CartService {
    store: CartStore,
    outbox: CartSyncOutbox,
}

impl CartService {
    pub fn new(store: CartStore, outbox: CartSyncOutbox) -> Self {
        CartService { store, outbox }
    }

    /// Accept a full cart snapshot from the client and queue it for
    /// persistence. Returns immediately; the client does not wait on the
    /// database write.
    pub fn sync(&self, user_id: Uuid, items: BTreeMap<Uuid, u32>) {
        self.outbox.enqueue(user_id, CartState::from_items(items));
    }

    pub async fn load(&self, user_id: Uuid) -> Result<CartState, ServiceError> {
        Ok(self.store.load(user_id).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_round_trip() {
        let id = Uuid::new_v4();
        let cart = CartState::new().add(id).add(id);
        assert_eq!(cart.quantity(id), 2);
        assert_eq!(cart.count(), 2);

        let cart = cart.remove(id);
        assert_eq!(cart.quantity(id), 1);

        let cart = cart.remove(id);
        assert!(cart.is_empty());
        assert_eq!(cart.quantity(id), 0);
    }

    #[test]
    fn remove_missing_product_is_a_noop() {
        let cart = CartState::new().remove(Uuid::new_v4());
        assert!(cart.is_empty());
    }

    #[test]
    fn setting_quantity_zero_deletes_the_line() {
        let id = Uuid::new_v4();
        let cart = CartState::new().with_quantity(id, 5);
        assert_eq!(cart.quantity(id), 5);

        let cart = cart.with_quantity(id, 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn snapshots_are_independent() {
        let id = Uuid::new_v4();
        let before = CartState::new().add(id);
        let after = before.add(id);
        assert_eq!(before.quantity(id), 1);
        assert_eq!(after.quantity(id), 2);
    }

    #[test]
    fn count_sums_across_lines() {
        let cart = CartState::new()
            .with_quantity(Uuid::new_v4(), 2)
            .with_quantity(Uuid::new_v4(), 3);
        assert_eq!(cart.count(), 5);
    }

    #[test]
    fn from_items_drops_zero_quantities() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cart = CartState::from_items(BTreeMap::from([(a, 2), (b, 0)]));
        assert_eq!(cart.quantity(a), 2);
        assert_eq!(cart.quantity(b), 0);
        assert_eq!(cart.lines().len(), 1);
    }

    #[tokio::test]
    async fn outbox_drops_when_full() {
        let (outbox, _rx) = CartSyncOutbox::new(1);
        let user = Uuid::new_v4();
        outbox.enqueue(user, CartState::new());
        // Queue is full; this must not block or panic.
        outbox.enqueue(user, CartState::new().add(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn outbox_delivers_in_order() {
        let (outbox, mut rx) = CartSyncOutbox::new(4);
        let user = Uuid::new_v4();
        let id = Uuid::new_v4();
        outbox.enqueue(user, CartState::new().with_quantity(id, 1));
        outbox.enqueue(user, CartState::new().with_quantity(id, 7));

        let first = rx.recv().await.unwrap();
        let last = rx.recv().await.unwrap();
        assert_eq!(first.state.quantity(id), 1);
        assert_eq!(last.state.quantity(id), 7);
    }
}
