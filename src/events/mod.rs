use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
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

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain state is already committed when events go out.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered(Uuid),

    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),

    ReviewCreated {
        product_id: Uuid,
        user_id: Uuid,
        rating: i16,
    },

    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderFulfillmentChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    PaymentSessionOpened {
        order_id: Uuid,
        session_id: String,
    },
    OrderPaid {
        order_id: Uuid,
        session_id: String,
    },
    StockDebited {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartCleared {
        user_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserRegistered(_) => "user_registered",
            Event::ProductCreated(_) => "product_created",
            Event::ProductUpdated(_) => "product_updated",
            Event::ProductDeleted(_) => "product_deleted",
            Event::ReviewCreated { .. } => "review_created",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderFulfillmentChanged { .. } => "order_fulfillment_changed",
            Event::PaymentSessionOpened { .. } => "payment_session_opened",
            Event::OrderPaid { .. } => "order_paid",
            Event::StockDebited { .. } => "stock_debited",
            Event::CartCleared { .. } => "cart_cleared",
        }
    }
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront_events_total", 1, "event" => event.name());
        match &event {
            Event::OrderPaid {
                order_id,
                session_id,
            } => {
                info!(%order_id, %session_id, "order paid");
            }
            Event::StockDebited {
                order_id,
                product_id,
                quantity,
            } => {
                info!(%order_id, %product_id, quantity, "stock debited");
            }
            other => {
                info!(event = other.name(), payload = ?other, "event received");
            }
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
