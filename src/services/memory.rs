//! memory.rs
//!
//! In-process storefront implementing the inventory, cart and order services,
//! plus a scripted payment widget. Used by the simulator and by tests.
//!
//! Like the real storefront it owns every authoritative value: it enforces
//! capacity, computes line and cart totals, sets the cart expiry and turns a
//! paid cart into an order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CartService, InventoryService, OrderService, SetCartLineInput};
use crate::error::ServiceError;
use crate::models::{
    format_cents, parse_cents, Cart, CartLine, ContactDetails, Order, Session, SessionSummary,
    SessionTicketType, SessionTicketTypeRef, Ticket, TicketKey, TicketType, Venue,
};
use crate::payment::{ConfirmResult, PaymentIntent, PaymentStatus, PaymentWidget};
use crate::timer::{Clock, SystemClock};

/// Sessions and ticket types on sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub sessions: Vec<Session>,
    pub ticket_types: Vec<SessionTicketType>,
    /// Session id -> event name.
    #[serde(default)]
    pub events: HashMap<String, String>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Small two-session catalog used when no fixture is configured.
    pub fn demo() -> Self {
        let venue = Venue {
            id: "venue-1".to_string(),
            name: "Town Hall".to_string(),
            timezone: "Australia/Sydney".to_string(),
        };
        let session = |id: &str, day: u32, max: u32| Session {
            id: id.to_string(),
            start: Utc.with_ymd_and_hms(2026, 12, day, 8, 0, 0).single().unwrap_or_default(),
            end: Utc.with_ymd_and_hms(2026, 12, day, 10, 30, 0).single(),
            venue: venue.clone(),
            max,
        };
        let ticket_type = |session_id: &str, id: &str, name: &str, price: &str, max: u32, sort| {
            SessionTicketType {
                session_id: session_id.to_string(),
                ticket_type_id: id.to_string(),
                price: price.to_string(),
                booking_fee: "1.50".to_string(),
                max,
                enabled: true,
                ticket_type: TicketType {
                    name: name.to_string(),
                    description: None,
                    price: price.to_string(),
                    booking_fee: "1.50".to_string(),
                    sort: Some(sort),
                },
            }
        };

        let sessions = vec![session("session-1", 5, 100), session("session-2", 6, 40)];
        let mut ticket_types = Vec::new();
        for s in &sessions {
            ticket_types.push(ticket_type(&s.id, "general", "General", "45.00", 50, 1));
            ticket_types.push(ticket_type(&s.id, "concession", "Concession", "35.00", 50, 2));
            ticket_types.push(ticket_type(&s.id, "vip", "VIP", "120.00", 10, 3));
        }
        let events = sessions
            .iter()
            .map(|s| (s.id.clone(), "Summer Gala".to_string()))
            .collect();

        Catalog {
            sessions,
            ticket_types,
            events,
        }
    }
}

fn cents(amount: &str) -> Result<i64, ServiceError> {
    parse_cents(amount).ok_or_else(|| ServiceError::Rejected(format!("invalid amount {amount:?}")))
}

#[derive(Debug, Default)]
struct StorefrontState {
    carts: HashMap<String, Cart>,
    orders: Vec<Order>,
    /// Payment intent id -> cart id.
    intents: HashMap<String, String>,
    fail_next: Option<String>,
}

/// In-memory storefront. Clones share state.
#[derive(Clone)]
pub struct InMemoryStorefront {
    catalog: Arc<Catalog>,
    state: Arc<Mutex<StorefrontState>>,
    hold: Duration,
    payment_fee: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryStorefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorefront")
            .field("sessions", &self.catalog.sessions.len())
            .field("hold", &self.hold)
            .finish()
    }
}

impl InMemoryStorefront {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            state: Arc::new(Mutex::new(StorefrontState::default())),
            hold: Duration::minutes(15),
            payment_fee: "0.00".to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_payment_fee(mut self, fee: impl Into<String>) -> Self {
        self.payment_fee = fee.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StorefrontState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next service call fail with a transport-like rejection.
    pub fn fail_next_call(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    fn check_failure(state: &mut StorefrontState) -> Result<(), ServiceError> {
        match state.fail_next.take() {
            Some(message) => Err(ServiceError::Rejected(message)),
            None => Ok(()),
        }
    }

    fn session(&self, session_id: &str) -> Result<&Session, ServiceError> {
        self.catalog
            .sessions
            .iter()
            .find(|session| session.id == session_id)
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))
    }

    fn ticket_type(&self, key: &TicketKey) -> Result<&SessionTicketType, ServiceError> {
        self.catalog
            .ticket_types
            .iter()
            .find(|ticket_type| ticket_type.enabled && &ticket_type.key() == key)
            .ok_or_else(|| ServiceError::NotFound(format!("ticket type {key}")))
    }

    fn reference(&self, key: &TicketKey) -> Result<SessionTicketTypeRef, ServiceError> {
        let session = self.session(&key.session_id)?;
        let ticket_type = self.ticket_type(key)?;
        Ok(SessionTicketTypeRef {
            session_id: key.session_id.clone(),
            ticket_type_id: key.ticket_type_id.clone(),
            ticket_type_name: ticket_type.ticket_type.name.clone(),
            sort: ticket_type.ticket_type.sort,
            session: SessionSummary {
                start: session.start,
                end: session.end,
                venue_name: session.venue.name.clone(),
                timezone: session.venue.timezone.clone(),
                event_name: self.catalog.events.get(&session.id).cloned(),
            },
        })
    }

    /// Live cart by id; expired carts are discarded.
    fn live_cart<'a>(
        &self,
        state: &'a mut StorefrontState,
        cart_id: &str,
    ) -> Result<&'a mut Cart, ServiceError> {
        let now = self.clock.now();
        if state.carts.get(cart_id).is_some_and(|cart| cart.expires <= now) {
            info!(cart_id, "discarding expired cart");
            state.carts.remove(cart_id);
        }
        state
            .carts
            .get_mut(cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id}")))
    }

    /// Quantity already held for a session by every live cart except `exclude`.
    fn held_elsewhere(&self, state: &StorefrontState, exclude: &str, key: &TicketKey) -> (u32, u32) {
        let now = self.clock.now();
        let lines = state
            .carts
            .values()
            .filter(|cart| cart.id != exclude && cart.expires > now)
            .flat_map(|cart| cart.cart_lines.iter());
        let mut session_total = 0;
        let mut type_total = 0;
        for line in lines.filter(|line| line.session_id() == key.session_id) {
            session_total += line.quantity;
            if line.key() == *key {
                type_total += line.quantity;
            }
        }
        (session_total, type_total)
    }

    fn apply_line(
        &self,
        state: &mut StorefrontState,
        cart_id: &str,
        key: &TicketKey,
        quantity: u32,
    ) -> Result<Cart, ServiceError> {
        let session_max = self.session(&key.session_id)?.max;
        let ticket_type = self.ticket_type(key)?.clone();
        let (session_elsewhere, type_elsewhere) = self.held_elsewhere(state, cart_id, key);
        let reference = self.reference(key)?;

        let cart = self.live_cart(state, cart_id)?;
        let session_in_cart: u32 = cart
            .cart_lines
            .iter()
            .filter(|line| line.session_id() == key.session_id && line.key() != *key)
            .map(|line| line.quantity)
            .sum();

        if quantity > ticket_type.max.saturating_sub(type_elsewhere)
            || session_in_cart + quantity > session_max.saturating_sub(session_elsewhere)
        {
            warn!(%key, quantity, "not enough tickets available");
            return Err(ServiceError::Rejected(
                "Not enough tickets available.".to_string(),
            ));
        }

        let unit = cents(&ticket_type.price)?;
        let fee = cents(&ticket_type.booking_fee)?;
        let position = cart.cart_lines.iter().position(|line| line.key() == *key);
        match (position, quantity) {
            (Some(index), 0) => {
                cart.cart_lines.remove(index);
            }
            (Some(index), _) => {
                let line = &mut cart.cart_lines[index];
                line.quantity = quantity;
                line.subtotal = format_cents(unit * i64::from(quantity));
                line.booking_fees = format_cents(fee * i64::from(quantity));
            }
            (None, 0) => {}
            (None, _) => cart.cart_lines.push(CartLine {
                id: Uuid::new_v4().to_string(),
                quantity,
                subtotal: format_cents(unit * i64::from(quantity)),
                booking_fees: format_cents(fee * i64::from(quantity)),
                session_ticket_type: reference,
            }),
        }

        // Line quantities changed, so any existing intent is for the wrong amount.
        cart.payment_intent_client_secret = None;
        cart.payment_fees = "0.00".to_string();
        Self::recompute_totals(cart)?;
        debug!(cart_id, %key, quantity, total = %cart.total, "cart line set");
        Ok(cart.clone())
    }

    fn recompute_totals(cart: &mut Cart) -> Result<(), ServiceError> {
        let mut subtotal = 0;
        let mut booking_fees = 0;
        for line in &cart.cart_lines {
            subtotal += cents(&line.subtotal)?;
            booking_fees += cents(&line.booking_fees)?;
        }
        let payment_fees = cents(&cart.payment_fees)?;
        cart.subtotal = format_cents(subtotal);
        cart.booking_fees = format_cents(booking_fees);
        cart.total = format_cents(subtotal + booking_fees + payment_fees);
        Ok(())
    }

    /// Completes the payment behind `intent_id`, turning its cart into an order.
    ///
    /// Stands in for the gateway webhook of a real storefront.
    pub fn complete_payment(&self, intent_id: &str) -> Result<Order, ServiceError> {
        let mut state = self.lock();
        let cart_id = state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("payment intent {intent_id}")))?;
        let cart = state
            .carts
            .remove(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id}")))?;

        let mut tickets = Vec::new();
        for line in &cart.cart_lines {
            let ticket_type = self.ticket_type(&line.key())?;
            for _ in 0..line.quantity {
                tickets.push(Ticket {
                    id: Uuid::new_v4().to_string(),
                    number: format!("{:06}", state.orders.len() * 1000 + tickets.len() + 1),
                    price: ticket_type.price.clone(),
                    booking_fee: ticket_type.booking_fee.clone(),
                    session_ticket_type: line.session_ticket_type.clone(),
                });
            }
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            public_id: format!("T{:05}", state.orders.len() + 1),
            first_name: cart.first_name.clone().unwrap_or_default(),
            last_name: cart.last_name.clone().unwrap_or_default(),
            email: cart.email.clone().unwrap_or_default(),
            phone: cart.phone.clone().unwrap_or_default(),
            accepts_marketing: cart.accepts_marketing,
            subtotal: cart.subtotal.clone(),
            booking_fees: cart.booking_fees.clone(),
            payment_fees: cart.payment_fees.clone(),
            total: cart.total.clone(),
            processed: true,
            payment_status: "succeeded".to_string(),
            payment_intent_id: Some(intent_id.to_string()),
            card_network: Some("visa".to_string()),
            card_exp_month: Some(4),
            card_exp_year: Some(2030),
            card_last4: Some("4242".to_string()),
            tickets,
        };
        info!(order_id = %order.id, public_id = %order.public_id, "order created");
        state.orders.push(order.clone());
        Ok(order)
    }
}

#[async_trait]
impl InventoryService for InMemoryStorefront {
    async fn sessions(&self) -> Result<Vec<Session>, ServiceError> {
        Self::check_failure(&mut self.lock())?;
        let mut sessions = self.catalog.sessions.clone();
        sessions.sort_by_key(|session| session.start);
        Ok(sessions)
    }

    async fn session_ticket_types(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionTicketType>, ServiceError> {
        Self::check_failure(&mut self.lock())?;
        self.session(session_id)?;
        Ok(self
            .catalog
            .ticket_types
            .iter()
            .filter(|ticket_type| ticket_type.enabled && ticket_type.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CartService for InMemoryStorefront {
    async fn create_cart_with_line(
        &self,
        key: &TicketKey,
        quantity: u32,
    ) -> Result<Cart, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;

        let now = self.clock.now();
        let mut cart = Cart::empty(now);
        cart.id = Uuid::new_v4().to_string();
        cart.expires = now + self.hold;
        let cart_id = cart.id.clone();
        state.carts.insert(cart_id.clone(), cart);
        info!(cart_id = %cart_id, "cart created");

        match self.apply_line(&mut state, &cart_id, key, quantity) {
            Ok(cart) => Ok(cart),
            Err(e) => {
                state.carts.remove(&cart_id);
                Err(e)
            }
        }
    }

    async fn set_cart_line(&self, input: &SetCartLineInput) -> Result<Cart, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        self.apply_line(&mut state, &input.cart_id, &input.key(), input.quantity)
    }

    async fn update_contact(
        &self,
        cart_id: &str,
        contact: &ContactDetails,
    ) -> Result<Cart, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        let cart = self.live_cart(&mut state, cart_id)?;
        cart.first_name = Some(contact.first_name.clone());
        cart.last_name = Some(contact.last_name.clone());
        cart.email = Some(contact.email.clone());
        cart.phone = Some(contact.phone.clone());
        cart.accepts_marketing = contact.accepts_marketing;
        Ok(cart.clone())
    }

    async fn create_payment_intent(&self, cart_id: &str) -> Result<Cart, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        let payment_fee = self.payment_fee.clone();
        let cart = self.live_cart(&mut state, cart_id)?;
        if cart.cart_lines.is_empty() {
            return Err(ServiceError::Rejected("Cart is empty.".to_string()));
        }

        let intent_id = format!("pi_{}", Uuid::new_v4().simple());
        cart.payment_fees = payment_fee;
        Self::recompute_totals(cart)?;
        cart.payment_intent_client_secret = Some(format!("{intent_id}_secret"));
        let snapshot = cart.clone();
        state.intents.insert(intent_id.clone(), snapshot.id.clone());
        info!(cart_id, intent_id = %intent_id, total = %snapshot.total, "payment intent created");
        Ok(snapshot)
    }

    async fn cart(&self, cart_id: &str) -> Result<Option<Cart>, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        match self.live_cart(&mut state, cart_id) {
            Ok(cart) => Ok(Some(cart.clone())),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl OrderService for InMemoryStorefront {
    async fn order_by_gateway_ref(&self, reference: &str) -> Result<Option<Order>, ServiceError> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        Ok(state
            .orders
            .iter()
            .find(|order| order.payment_intent_id.as_deref() == Some(reference))
            .cloned())
    }
}

/// Payment widget whose behaviour is set up front.
#[derive(Debug)]
pub struct ScriptedPaymentWidget {
    complete: AtomicBool,
    confirm: Mutex<ConfirmResult>,
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl Default for ScriptedPaymentWidget {
    fn default() -> Self {
        Self {
            complete: AtomicBool::new(true),
            confirm: Mutex::new(ConfirmResult::Redirected),
            intents: Mutex::new(HashMap::new()),
        }
    }
}

impl ScriptedPaymentWidget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::Relaxed);
    }

    pub fn set_confirm_result(&self, result: ConfirmResult) {
        *self.confirm.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = result;
    }

    /// Status the gateway reports for the intent behind `client_secret`.
    pub fn set_intent_status(&self, client_secret: &str, status: PaymentStatus) {
        let id = client_secret.trim_end_matches("_secret").to_string();
        self.intents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(client_secret.to_string(), PaymentIntent { id, status });
    }
}

#[async_trait]
impl PaymentWidget for ScriptedPaymentWidget {
    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Relaxed)
    }

    async fn confirm_payment(&self, _client_secret: &str, _return_url: &str) -> ConfirmResult {
        self.confirm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn retrieve_payment_intent(&self, client_secret: &str) -> Option<PaymentIntent> {
        self.intents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(client_secret)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualClock;

    fn storefront() -> (InMemoryStorefront, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap());
        let storefront = InMemoryStorefront::new(Catalog::demo()).with_clock(Arc::new(clock.clone()));
        (storefront, clock)
    }

    #[test]
    fn malformed_amount_is_rejected() {
        assert_eq!(cents("45.00").unwrap(), 4500);
        assert!(matches!(cents("abc"), Err(ServiceError::Rejected(_))));
    }

    #[tokio::test]
    async fn totals_are_computed_by_the_storefront() {
        let (storefront, _) = storefront();
        let key = TicketKey::new("session-1", "general");

        let cart = storefront.create_cart_with_line(&key, 2).await.unwrap();

        assert_eq!(cart.cart_lines.len(), 1);
        assert_eq!(cart.subtotal, "90.00");
        assert_eq!(cart.booking_fees, "3.00");
        assert_eq!(cart.total, "93.00");
    }

    #[tokio::test]
    async fn zero_quantity_removes_the_line() {
        let (storefront, _) = storefront();
        let key = TicketKey::new("session-1", "general");
        let cart = storefront.create_cart_with_line(&key, 2).await.unwrap();

        let cart = storefront
            .set_cart_line(&SetCartLineInput::new(&cart.id, &key, 0))
            .await
            .unwrap();

        assert!(cart.cart_lines.is_empty());
        assert_eq!(cart.total, "0.00");
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let (storefront, _) = storefront();
        let vip = TicketKey::new("session-1", "vip");

        let err = storefront.create_cart_with_line(&vip, 11).await.unwrap_err();

        assert!(matches!(err, ServiceError::Rejected(_)));
    }

    #[tokio::test]
    async fn expired_carts_are_gone() {
        let (storefront, clock) = storefront();
        let key = TicketKey::new("session-2", "general");
        let cart = storefront.create_cart_with_line(&key, 1).await.unwrap();

        clock.advance(Duration::minutes(16));

        assert!(storefront.cart(&cart.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paid_cart_becomes_an_order() {
        let (storefront, _) = storefront();
        let key = TicketKey::new("session-1", "concession");
        let cart = storefront.create_cart_with_line(&key, 3).await.unwrap();
        let cart = storefront.create_payment_intent(&cart.id).await.unwrap();
        let secret = cart.payment_intent_client_secret.unwrap();
        let intent_id = secret.trim_end_matches("_secret");

        let order = storefront.complete_payment(intent_id).unwrap();
        let found = storefront.order_by_gateway_ref(intent_id).await.unwrap();

        assert_eq!(order.tickets.len(), 3);
        assert_eq!(found.map(|o| o.id), Some(order.id));
        assert!(storefront.cart(&cart.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_failure_hits_once() {
        let (storefront, _) = storefront();
        storefront.fail_next_call("boom");

        assert!(storefront.sessions().await.is_err());
        assert_eq!(storefront.sessions().await.unwrap().len(), 2);
    }
}
