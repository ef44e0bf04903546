use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub timezone: String,
}

/// A scheduled occurrence of an event at a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub venue: Venue,
    /// Overall capacity of the session across every ticket type.
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub name: String,
    pub description: Option<String>,
    pub price: String,
    pub booking_fee: String,
    pub sort: Option<i32>,
}

/// A ticket type as offered for one particular session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicketType {
    pub session_id: String,
    pub ticket_type_id: String,
    pub price: String,
    pub booking_fee: String,
    /// Per-type cap for this session.
    pub max: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub ticket_type: TicketType,
}

fn enabled_by_default() -> bool {
    true
}

impl SessionTicketType {
    pub fn key(&self) -> TicketKey {
        TicketKey::new(&self.session_id, &self.ticket_type_id)
    }
}

/// Composite identity of a cart line: `(session, ticket type)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketKey {
    pub session_id: String,
    pub ticket_type_id: String,
}

impl TicketKey {
    pub fn new(session_id: impl Into<String>, ticket_type_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ticket_type_id: ticket_type_id.into(),
        }
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.ticket_type_id)
    }
}

/// Display fields of a session embedded in cart lines and order tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub venue_name: String,
    pub timezone: String,
    pub event_name: Option<String>,
}

/// Reference from a cart line or ticket back to what was bought.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicketTypeRef {
    pub session_id: String,
    pub ticket_type_id: String,
    pub ticket_type_name: String,
    pub sort: Option<i32>,
    pub session: SessionSummary,
}

impl SessionTicketTypeRef {
    pub fn key(&self) -> TicketKey {
        TicketKey::new(&self.session_id, &self.ticket_type_id)
    }
}
