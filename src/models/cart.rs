use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{SessionTicketTypeRef, TicketKey};

/// Identifier of the placeholder cart used before a real one exists.
pub const EMPTY_CART_ID: &str = "0000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: String,
    pub quantity: u32,
    pub subtotal: String,
    pub booking_fees: String,
    pub session_ticket_type: SessionTicketTypeRef,
}

impl CartLine {
    pub fn key(&self) -> TicketKey {
        self.session_ticket_type.key()
    }

    pub fn session_id(&self) -> &str {
        &self.session_ticket_type.session_id
    }
}

/// Contact fields captured at the customer details stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub accepts_marketing: bool,
}

/// Server-authoritative cart snapshot. Money fields are never computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub cart_lines: Vec<CartLine>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub accepts_marketing: bool,
    pub subtotal: String,
    pub booking_fees: String,
    pub payment_fees: String,
    pub total: String,
    pub expires: DateTime<Utc>,
    pub payment_intent_client_secret: Option<String>,
}

impl Cart {
    /// Placeholder cart shown until the first line is added.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            id: EMPTY_CART_ID.to_string(),
            cart_lines: Vec::new(),
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            accepts_marketing: false,
            subtotal: "0.00".to_string(),
            booking_fees: "0.00".to_string(),
            payment_fees: "0.00".to_string(),
            total: "0.00".to_string(),
            expires: now,
            payment_intent_client_secret: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id == EMPTY_CART_ID
    }

    /// Expiry instant the countdown should run against, if any.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        (!self.is_placeholder()).then_some(self.expires)
    }

    pub fn line(&self, key: &TicketKey) -> Option<&CartLine> {
        self.cart_lines.iter().find(|line| &line.key() == key)
    }

    /// Sum of every line's quantity across all sessions.
    pub fn total_quantity(&self) -> u32 {
        self.cart_lines.iter().map(|line| line.quantity).sum()
    }
}
