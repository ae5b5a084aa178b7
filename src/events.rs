use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the checkout flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    },
    PaymentIntentCreated {
        intent_id: String,
        user_id: Uuid,
        amount: Decimal,
        simulated: bool,
    },
    PaymentConfirmed {
        intent_id: String,
        order_id: Uuid,
    },
    CartSynced {
        user_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send: a closed or lagging consumer must never fail the
    /// request that produced the event.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping domain event: {}", e);
        }
    }
}

/// Consumes domain events from the channel and logs them. This is the single
/// place to fan events out to notification or analytics sinks later.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                user_id,
                amount,
            } => info!(%order_id, %user_id, %amount, "order placed"),
            Event::PaymentIntentCreated {
                intent_id,
                user_id,
                amount,
                simulated,
            } => info!(%intent_id, %user_id, %amount, simulated, "payment intent created"),
            Event::PaymentConfirmed {
                intent_id,
                order_id,
            } => info!(%intent_id, %order_id, "payment confirmed"),
            Event::CartSynced { user_id } => info!(%user_id, "cart snapshot synced"),
        }
    }
    info!("Event processor stopped");
}
