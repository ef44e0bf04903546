//! Display ordering shared by the cart summary and the order confirmation.

use chrono::{DateTime, Utc};

use crate::models::{CartLine, SessionTicketTypeRef, Ticket};

/// The fields of a ticket-bearing record relevant for ordering.
pub trait TicketLike {
    fn session_ticket_type(&self) -> &SessionTicketTypeRef;
}

impl TicketLike for CartLine {
    fn session_ticket_type(&self) -> &SessionTicketTypeRef {
        &self.session_ticket_type
    }
}

impl TicketLike for Ticket {
    fn session_ticket_type(&self) -> &SessionTicketTypeRef {
        &self.session_ticket_type
    }
}

impl<T: TicketLike> TicketLike for &T {
    fn session_ticket_type(&self) -> &SessionTicketTypeRef {
        (*self).session_ticket_type()
    }
}

/// Ranks present values before absent ones.
pub(crate) fn missing_last<T: Ord>(value: Option<T>) -> (bool, Option<T>) {
    (value.is_none(), value)
}

type TicketOrder = (
    DateTime<Utc>,
    (bool, Option<DateTime<Utc>>),
    (bool, Option<i32>),
);

fn ordering_key<T: TicketLike>(ticket: &T) -> TicketOrder {
    let reference = ticket.session_ticket_type();
    (
        reference.session.start,
        missing_last(reference.session.end),
        missing_last(reference.sort),
    )
}

/// Sorts tickets in an order, or lines in a cart, by session start, session
/// end and ticket type sort. Equal records keep their input order.
pub fn sort_tickets<T: TicketLike>(mut tickets: Vec<T>) -> Vec<T> {
    tickets.sort_by_cached_key(ordering_key);
    tickets
}
