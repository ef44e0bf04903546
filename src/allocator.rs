//! allocator.rs
//!
//! Capacity-aware maximum quantities for the ticket selection controls.
//!
//! Every ticket type of a session has its own cap, and the session as a whole
//! has an overall capacity shared by all ticket types. The maximum offered for
//! one ticket type is whatever room the session would have if that type's
//! current selection were put back, bounded by the type's own cap.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::models::{CartLine, Session, SessionTicketType, TicketKey};
use crate::sort::missing_last;

/// Upper bound a quantity control uses when no allocator entry exists.
pub const DEFAULT_QUANTITY_MAX: u32 = 10;

/// Computes the allowed maximum selectable quantity for every ticket type of `session`.
///
/// Pure over its inputs: recompute from the current cart snapshot whenever it changes.
/// Ticket types belonging to another session are ignored.
pub fn max_quantities(
    session: &Session,
    ticket_types: &[SessionTicketType],
    cart_lines: &[CartLine],
) -> BTreeMap<TicketKey, u32> {
    let session_max = i64::from(session.max);
    let already_selected: i64 = cart_lines
        .iter()
        .filter(|line| line.session_id() == session.id)
        .map(|line| i64::from(line.quantity))
        .sum();

    ticket_types
        .iter()
        .filter(|ticket_type| ticket_type.session_id == session.id)
        .map(|ticket_type| {
            let key = ticket_type.key();
            let existing = cart_lines
                .iter()
                .find(|line| line.key() == key)
                .map_or(0, |line| i64::from(line.quantity));

            let room_left = session_max - already_selected + existing;
            let allowed = i64::from(ticket_type.max).min(room_left).min(session_max).max(0);

            // `allowed` is within [0, ticket_type.max], so it always fits.
            (key, u32::try_from(allowed).unwrap_or(0))
        })
        .collect()
}

/// The values a quantity control offers for a given maximum.
pub fn quantity_options(max: Option<u32>) -> RangeInclusive<u32> {
    0..=max.unwrap_or(DEFAULT_QUANTITY_MAX)
}

/// One row of the ticket selection list.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketOption {
    pub ticket_type: SessionTicketType,
    pub max: u32,
    pub selected: u32,
}

/// Ticket types of `session` in display order, each with its allowed maximum
/// and the quantity currently in the cart.
pub fn ticket_options(
    session: &Session,
    ticket_types: &[SessionTicketType],
    cart_lines: &[CartLine],
) -> Vec<TicketOption> {
    let maxima = max_quantities(session, ticket_types, cart_lines);

    let mut sorted: Vec<&SessionTicketType> = ticket_types
        .iter()
        .filter(|ticket_type| ticket_type.session_id == session.id)
        .collect();
    sorted.sort_by_key(|ticket_type| missing_last(ticket_type.ticket_type.sort));

    sorted
        .into_iter()
        .map(|ticket_type| {
            let key = ticket_type.key();
            TicketOption {
                max: maxima.get(&key).copied().unwrap_or(DEFAULT_QUANTITY_MAX),
                selected: cart_lines
                    .iter()
                    .find(|line| line.key() == key)
                    .map_or(0, |line| line.quantity),
                ticket_type: ticket_type.clone(),
            }
        })
        .collect()
}
