use serde::{Deserialize, Serialize};

use super::session::SessionTicketTypeRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub number: String,
    pub price: String,
    pub booking_fee: String,
    pub session_ticket_type: SessionTicketTypeRef,
}

/// A finalized order, looked up by the payment gateway reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub public_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub accepts_marketing: bool,
    pub subtotal: String,
    pub booking_fees: String,
    pub payment_fees: String,
    pub total: String,
    pub processed: bool,
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
    pub card_network: Option<String>,
    pub card_exp_month: Option<u32>,
    pub card_exp_year: Option<u32>,
    pub card_last4: Option<String>,
    pub tickets: Vec<Ticket>,
}
