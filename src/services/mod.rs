//! Remote collaborators of the checkout.
//!
//! The inventory, cart and order services own all authoritative state
//! (capacity, money totals, expiry). The checkout only talks to them through
//! these traits; [`memory::InMemoryStorefront`] implements all three for
//! tests and the simulator.

pub mod download;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::models::{Cart, ContactDetails, Order, Session, SessionTicketType, TicketKey};

pub use download::{CircuitBreaker, CircuitState, TicketDownload, TicketDownloader};
pub use memory::{InMemoryStorefront, ScriptedPaymentWidget};

/// Input for setting one line's quantity on an existing cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCartLineInput {
    pub cart_id: String,
    pub session_id: String,
    pub ticket_type_id: String,
    pub quantity: u32,
}

impl SetCartLineInput {
    pub fn new(cart_id: &str, key: &TicketKey, quantity: u32) -> Self {
        Self {
            cart_id: cart_id.to_string(),
            session_id: key.session_id.clone(),
            ticket_type_id: key.ticket_type_id.clone(),
            quantity,
        }
    }

    pub fn key(&self) -> TicketKey {
        TicketKey::new(&self.session_id, &self.ticket_type_id)
    }
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Every session on sale.
    async fn sessions(&self) -> Result<Vec<Session>, ServiceError>;

    /// Enabled ticket types of one session.
    async fn session_ticket_types(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionTicketType>, ServiceError>;
}

/// Every mutation returns the full cart snapshot.
#[async_trait]
pub trait CartService: Send + Sync {
    async fn create_cart_with_line(&self, key: &TicketKey, quantity: u32)
        -> Result<Cart, ServiceError>;

    async fn set_cart_line(&self, input: &SetCartLineInput) -> Result<Cart, ServiceError>;

    async fn update_contact(
        &self,
        cart_id: &str,
        contact: &ContactDetails,
    ) -> Result<Cart, ServiceError>;

    async fn create_payment_intent(&self, cart_id: &str) -> Result<Cart, ServiceError>;

    /// `None` when the cart does not exist (or no longer exists).
    async fn cart(&self, cart_id: &str) -> Result<Option<Cart>, ServiceError>;
}

#[async_trait]
pub trait OrderService: Send + Sync {
    async fn order_by_gateway_ref(&self, reference: &str) -> Result<Option<Order>, ServiceError>;
}
