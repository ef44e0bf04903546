//! checkout.rs
//!
//! Headless checkout flow: the stage machine, the cart snapshot, the form and
//! the expiry watch of one customer, wired to the remote collaborators.
//!
//! Remote cart calls run in two steps. `prepare_*` validates the request and
//! takes a sequence token; the returned request owns everything it needs, so
//! it can be sent without borrowing the flow. Its response is handed back to
//! [`CheckoutFlow::apply`], which drops it if a newer call of the same kind was
//! issued meanwhile or the cart was discarded. The `set_quantity` style
//! methods do all three steps in one go.
//!
//! Until the first cart exists, later quantity changes wait for the cart
//! being created and then update that cart instead of creating another one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allocator::{ticket_options, TicketOption};
use crate::error::{CheckoutError, CheckoutResult, ServiceError};
use crate::models::{Cart, ContactDetails, Session, SessionTicketType, TicketKey};
use crate::payment::{ConfirmResult, PaymentOutcome, PaymentWidget, MSG_PAYMENT_ERROR};
use crate::sequence::{RequestKind, RequestSequencer, RequestToken};
use crate::services::{CartService, InventoryService, SetCartLineInput};
use crate::stage::{CheckoutStage, StageMachine};
use crate::storage::{KeyValueStore, KeyValueStoreExt, CART_ID_KEY};
use crate::timer::{countdown, Clock, Countdown, ExpiryWatch};
use crate::validation::{CheckoutForm, FormErrors};
use crate::CheckoutContext;

pub const MSG_CREATE_CART: &str = "Unable to create cart.";
pub const MSG_UPDATE_CART: &str = "Unable to update cart.";
pub const MSG_LOAD_CART: &str = "Unable to load cart.";
pub const MSG_LOAD_SESSIONS: &str = "Unable to load sessions.";
pub const MSG_LOAD_TICKET_TYPES: &str = "Unable to load session ticket types.";
pub const MSG_INITIATE_PAYMENT: &str = "Unable to initiate payment.";
pub const MSG_SAVE_CONTACT: &str = "Unable to save contact details.";

/// Everything the flow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryService>,
    pub carts: Arc<dyn CartService>,
    pub payment: Arc<dyn PaymentWidget>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

/// A cart call ready to be sent.
pub struct CartRequest {
    token: RequestToken,
    carts: Arc<dyn CartService>,
    call: CartCall,
}

enum CartCall {
    Create {
        key: TicketKey,
        quantity: u32,
        created: watch::Sender<Option<String>>,
    },
    SetLine(SetCartLineInput),
    /// Sets a line on the cart an earlier `Create` is still creating.
    SetLineOnPending {
        key: TicketKey,
        quantity: u32,
        pending: watch::Receiver<Option<String>>,
    },
    Load { cart_id: String },
    PaymentIntent { cart_id: String },
}

/// Response to a [`CartRequest`], to be handed to [`CheckoutFlow::apply`].
pub struct CartResponse {
    token: RequestToken,
    /// The call created the cart, or waited for its creation.
    first_cart: bool,
    failure_message: &'static str,
    result: Result<Option<Cart>, ServiceError>,
}

impl CartRequest {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub async fn send(self) -> CartResponse {
        let (first_cart, failure_message, result) = match self.call {
            CartCall::Create {
                key,
                quantity,
                created,
            } => {
                let result = self.carts.create_cart_with_line(&key, quantity).await;
                if let Ok(cart) = &result {
                    created.send_replace(Some(cart.id.clone()));
                }
                (true, MSG_CREATE_CART, result.map(Some))
            }
            CartCall::SetLineOnPending {
                key,
                quantity,
                mut pending,
            } => {
                let cart_id = pending
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|id| id.clone());
                let result = match cart_id {
                    Some(cart_id) => {
                        let input = SetCartLineInput::new(&cart_id, &key, quantity);
                        self.carts.set_cart_line(&input).await.map(Some)
                    }
                    None => Err(ServiceError::Rejected("cart creation failed".to_string())),
                };
                (true, MSG_UPDATE_CART, result)
            }
            CartCall::SetLine(input) => (
                false,
                MSG_UPDATE_CART,
                self.carts.set_cart_line(&input).await.map(Some),
            ),
            CartCall::Load { cart_id } => (false, MSG_LOAD_CART, self.carts.cart(&cart_id).await),
            CartCall::PaymentIntent { cart_id } => (
                false,
                MSG_INITIATE_PAYMENT,
                self.carts.create_payment_intent(&cart_id).await.map(Some),
            ),
        };
        CartResponse {
            token: self.token,
            first_cart,
            failure_message,
            result,
        }
    }
}

/// How an applied response changed the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The cart snapshot was replaced.
    Updated,
    /// The persisted cart no longer exists; local cart state was reset.
    NotFound,
    /// A newer request superseded this one; nothing changed.
    Stale,
}

/// What the pay button led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The gateway took over; the customer comes back with a payment intent.
    Redirected,
    /// Immediate payment failure. The form accepts input again.
    Declined(String),
}

pub struct CheckoutFlow {
    context: CheckoutContext,
    deps: Collaborators,
    machine: StageMachine,
    cart: Cart,
    form: CheckoutForm,
    ticket_types: Vec<SessionTicketType>,
    sequencer: RequestSequencer,
    watch: Option<(DateTime<Utc>, ExpiryWatch, UnboundedReceiver<Countdown>)>,
    /// Id of the cart being created, once known.
    pending_cart: Option<watch::Receiver<Option<String>>>,
    countdown: Option<Countdown>,
    error: Option<String>,
    payment_error: Option<String>,
    payment_message: Option<String>,
    submitting: bool,
}

impl CheckoutFlow {
    pub fn new(context: CheckoutContext, deps: Collaborators) -> Self {
        let cart = Cart::empty(deps.clock.now());
        Self {
            context,
            deps,
            machine: StageMachine::new(),
            form: CheckoutForm::from_cart_lines(&cart.cart_lines),
            cart,
            ticket_types: Vec::new(),
            sequencer: RequestSequencer::new(),
            watch: None,
            pending_cart: None,
            countdown: None,
            error: None,
            payment_error: None,
            payment_message: None,
            submitting: false,
        }
    }

    pub fn context(&self) -> &CheckoutContext {
        &self.context
    }

    pub fn stage(&self) -> CheckoutStage {
        self.machine.stage()
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.machine.selected_session()
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn form(&self) -> &CheckoutForm {
        &self.form
    }

    pub fn ticket_types(&self) -> &[SessionTicketType] {
        &self.ticket_types
    }

    pub fn is_expired(&self) -> bool {
        self.machine.is_expired()
    }

    /// Expiry the running expiry watch counts down to.
    pub fn watched_expiry(&self) -> Option<DateTime<Utc>> {
        self.watch.as_ref().map(|(expiry, _, _)| *expiry)
    }

    /// Latest countdown status, once a cart exists.
    pub fn countdown(&self) -> Option<Countdown> {
        self.countdown
    }

    /// Last user-visible error of a remote call.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn payment_error(&self) -> Option<&str> {
        self.payment_error.as_deref()
    }

    pub fn payment_message(&self) -> Option<&str> {
        self.payment_message.as_deref()
    }

    fn ensure_live(&self) -> CheckoutResult<()> {
        if self.machine.is_expired() {
            Err(CheckoutError::Expired)
        } else {
            Ok(())
        }
    }

    fn persisted_cart_id(&self) -> CheckoutResult<Option<String>> {
        Ok(self
            .deps
            .store
            .get::<String>(CART_ID_KEY)?
            .filter(|id| !id.is_empty()))
    }

    fn remote_failure(&mut self, message: &'static str, source: ServiceError) -> CheckoutError {
        error!(error = %source, "{}", message);
        self.error = Some(message.to_string());
        CheckoutError::remote(message, source)
    }

    fn request(&mut self, kind: RequestKind, call: CartCall) -> CartRequest {
        CartRequest {
            token: self.sequencer.issue(kind),
            carts: Arc::clone(&self.deps.carts),
            call,
        }
    }

    /* ---------- cart snapshot ---------- */

    /// Picks up the cart persisted by an earlier visit, if any.
    pub async fn restore(&mut self) -> CheckoutResult<Applied> {
        let Some(cart_id) = self.persisted_cart_id()? else {
            return Ok(Applied::NotFound);
        };
        debug!(cart_id = %cart_id, "restoring persisted cart");
        let request = self.request(RequestKind::LoadCart, CartCall::Load { cart_id });
        let response = request.send().await;
        self.apply(response)
    }

    /// Applies a cart response unless it has been superseded.
    pub fn apply(&mut self, response: CartResponse) -> CheckoutResult<Applied> {
        // The id of a newly created cart is kept even when a newer response
        // supersedes this one; later changes are made on that cart.
        if response.first_cart && !self.machine.is_expired() {
            match &response.result {
                Ok(Some(cart)) => self.persist_cart_id(&cart.id)?,
                Ok(None) => {}
                Err(_) => {
                    // Creation failed: the next change creates a new cart.
                    let failed = self.pending_cart.as_ref().is_some_and(|pending| {
                        pending.has_changed().is_err() && pending.borrow().is_none()
                    });
                    if failed {
                        self.pending_cart = None;
                    }
                }
            }
        }

        if !self.sequencer.is_current(response.token) {
            debug!(kind = ?response.token.kind(), "discarding stale cart response");
            return Ok(Applied::Stale);
        }

        match response.result {
            Ok(Some(cart)) => {
                self.replace_cart(cart);
                self.error = None;
                Ok(Applied::Updated)
            }
            Ok(None) => {
                warn!("persisted cart not found, starting afresh");
                self.deps.store.remove(CART_ID_KEY);
                self.reset_cart();
                Ok(Applied::NotFound)
            }
            Err(e) => Err(self.remote_failure(response.failure_message, e)),
        }
    }

    fn persist_cart_id(&mut self, cart_id: &str) -> CheckoutResult<()> {
        if self.persisted_cart_id()?.as_deref() != Some(cart_id) {
            self.deps.store.set(CART_ID_KEY, &cart_id.to_string())?;
            info!(cart_id, "cart persisted");
        }
        self.pending_cart = None;
        Ok(())
    }

    fn replace_cart(&mut self, cart: Cart) {
        let mut form = CheckoutForm::from_cart_lines(&cart.cart_lines);
        form.first_name = std::mem::take(&mut self.form.first_name);
        form.last_name = std::mem::take(&mut self.form.last_name);
        form.email = std::mem::take(&mut self.form.email);
        form.phone = std::mem::take(&mut self.form.phone);
        form.accepts_marketing = self.form.accepts_marketing;
        form.payment_form_complete = self.form.payment_form_complete;
        self.form = form;
        self.cart = cart;
        self.arm_expiry_watch();
    }

    fn reset_cart(&mut self) {
        self.cart = Cart::empty(self.deps.clock.now());
        self.form = CheckoutForm::from_cart_lines(&[]);
        self.watch = None;
        self.pending_cart = None;
    }

    /* ---------- sessions & tickets ---------- */

    pub async fn sessions(&mut self) -> CheckoutResult<Vec<Session>> {
        let result = self.deps.inventory.sessions().await;
        match result {
            Ok(sessions) => Ok(sessions),
            Err(e) => Err(self.remote_failure(MSG_LOAD_SESSIONS, e)),
        }
    }

    /// Records the chosen session and loads its ticket types.
    pub async fn choose_session(&mut self, session: Session) -> CheckoutResult<()> {
        self.machine.choose_session(session.clone())?;
        self.ticket_types.clear();

        let token = self.sequencer.issue(RequestKind::TicketTypes);
        let result = self.deps.inventory.session_ticket_types(&session.id).await;
        if !self.sequencer.is_current(token) {
            debug!(session_id = %session.id, "discarding stale ticket types");
            return Ok(());
        }
        match result {
            Ok(ticket_types) => {
                self.ticket_types = ticket_types;
                Ok(())
            }
            Err(e) => Err(self.remote_failure(MSG_LOAD_TICKET_TYPES, e)),
        }
    }

    /// Selection rows for the chosen session, bounded by the allocator.
    pub fn ticket_options(&self) -> CheckoutResult<Vec<TicketOption>> {
        let session = self
            .machine
            .selected_session()
            .ok_or(CheckoutError::NoSessionSelected)?;
        Ok(ticket_options(session, &self.ticket_types, &self.cart.cart_lines))
    }

    pub fn back(&mut self) -> CheckoutResult<()> {
        let was = self.machine.stage();
        self.machine.back()?;
        if was == CheckoutStage::TicketSelect {
            self.ticket_types.clear();
        }
        Ok(())
    }

    /// Validates a quantity change and prepares the cart call for it.
    ///
    /// Quantities above zero are only accepted for ticket types of the chosen
    /// session, up to the allocator's maximum. Zero removes a line of any session.
    pub fn prepare_quantity_change(
        &mut self,
        key: &TicketKey,
        quantity: u32,
    ) -> CheckoutResult<CartRequest> {
        self.ensure_live()?;

        if quantity > 0 {
            let session = self
                .machine
                .selected_session()
                .filter(|session| session.id == key.session_id)
                .ok_or_else(|| CheckoutError::UnknownSession(key.session_id.clone()))?;
            let max = ticket_options(session, &self.ticket_types, &self.cart.cart_lines)
                .into_iter()
                .find(|option| option.ticket_type.key() == *key)
                .map(|option| option.max)
                .unwrap_or(0);
            if quantity > max {
                return Err(CheckoutError::QuantityOutOfRange {
                    key: key.to_string(),
                    requested: quantity,
                    max,
                });
            }
        }

        // The form follows the cart once the response is applied.
        let call = match (self.persisted_cart_id()?, &self.pending_cart) {
            (Some(cart_id), _) => CartCall::SetLine(SetCartLineInput::new(&cart_id, key, quantity)),
            (None, Some(pending)) => CartCall::SetLineOnPending {
                key: key.clone(),
                quantity,
                pending: pending.clone(),
            },
            (None, None) => {
                let (created, pending) = watch::channel(None);
                self.pending_cart = Some(pending);
                CartCall::Create {
                    key: key.clone(),
                    quantity,
                    created,
                }
            }
        };
        Ok(self.request(RequestKind::MutateCart, call))
    }

    pub async fn set_quantity(&mut self, key: &TicketKey, quantity: u32) -> CheckoutResult<Applied> {
        let request = self.prepare_quantity_change(key, quantity)?;
        let response = request.send().await;
        self.apply(response)
    }

    /// Removes a line from the cart summary.
    pub async fn remove_line(&mut self, key: &TicketKey) -> CheckoutResult<Applied> {
        self.set_quantity(key, 0).await
    }

    /* ---------- customer details & payment ---------- */

    /// Moves on to customer details and makes sure the cart has a payment intent.
    pub async fn checkout(&mut self) -> CheckoutResult<()> {
        self.machine.checkout(self.form.total_quantity())?;
        info!(cart_id = %self.cart.id, "entered customer details");

        if self.cart.payment_intent_client_secret.is_none() {
            let cart_id = self.cart.id.clone();
            let request = self.request(RequestKind::PaymentIntent, CartCall::PaymentIntent { cart_id });
            let response = request.send().await;
            self.apply(response)?;
        }
        Ok(())
    }

    pub fn set_contact(&mut self, contact: ContactDetails) {
        self.form.first_name = contact.first_name;
        self.form.last_name = contact.last_name;
        self.form.email = contact.email;
        self.form.phone = contact.phone;
        self.form.accepts_marketing = contact.accepts_marketing;
    }

    /// Current form errors for the active stage.
    pub fn form_errors(&self) -> FormErrors {
        let mut form = self.form.clone();
        form.payment_form_complete = self.deps.payment.is_complete();
        form.validate(self.machine.stage())
    }

    pub fn submit_enabled(&self) -> bool {
        self.machine
            .submit_enabled(&self.form_errors(), self.submitting)
    }

    /// Saves the contact details on the cart and asks the gateway to take the payment.
    pub async fn submit(&mut self) -> CheckoutResult<SubmitOutcome> {
        self.ensure_live()?;
        let errors = self.form_errors();
        if !errors.is_empty() {
            return Err(CheckoutError::Validation(errors));
        }
        if !self.machine.submit_enabled(&errors, self.submitting) {
            return Err(CheckoutError::InvalidTransition {
                action: "submit",
                stage: self.machine.stage(),
            });
        }
        let secret = self
            .cart
            .payment_intent_client_secret
            .clone()
            .ok_or(CheckoutError::InvalidTransition {
                action: "submit without a payment intent",
                stage: self.machine.stage(),
            })?;

        self.submitting = true;
        self.payment_error = None;

        let contact = self.form.contact();
        let result = self.deps.carts.update_contact(&self.cart.id, &contact).await;
        let cart = match result {
            Ok(cart) => cart,
            Err(e) => {
                self.submitting = false;
                self.payment_error = Some(MSG_SAVE_CONTACT.to_string());
                return Err(self.remote_failure(MSG_SAVE_CONTACT, e));
            }
        };
        self.replace_cart(cart);

        info!(cart_id = %self.cart.id, total = %self.cart.total, "confirming payment");
        let confirmation = self
            .deps
            .payment
            .confirm_payment(&secret, &self.context.payment.return_url)
            .await;
        match confirmation {
            ConfirmResult::Redirected => Ok(SubmitOutcome::Redirected),
            ConfirmResult::Error(message) => {
                let message = message.unwrap_or_else(|| MSG_PAYMENT_ERROR.to_string());
                warn!(%message, "payment confirmation failed");
                self.payment_error = Some(message.clone());
                self.submitting = false;
                Ok(SubmitOutcome::Declined(message))
            }
        }
    }

    /// Handles the customer coming back from the gateway with `client_secret`.
    pub async fn handle_payment_return(&mut self, client_secret: &str) -> PaymentOutcome {
        let intent = self.deps.payment.retrieve_payment_intent(client_secret).await;
        let outcome = PaymentOutcome::from_intent(intent.as_ref(), &self.context.payment.confirm_path);
        info!(?outcome, "payment return handled");

        match &outcome {
            PaymentOutcome::Failed { message } => self.error = Some(message.to_string()),
            other => self.payment_message = Some(other.message().to_string()),
        }
        if outcome.reenables_form() {
            self.submitting = false;
        }
        outcome
    }

    /* ---------- expiry ---------- */

    fn arm_expiry_watch(&mut self) {
        let Some(expiry) = self.cart.expiry() else {
            self.watch = None;
            return;
        };
        if self.watch.as_ref().is_some_and(|(armed, _, _)| *armed == expiry) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("no runtime, expiry is checked on tick only");
            self.watch = None;
            return;
        }
        let (watch, rx) = ExpiryWatch::spawn(
            expiry,
            Duration::from_millis(self.context.cart.countdown_interval_ms),
            self.context.cart.warning_minutes,
            Arc::clone(&self.deps.clock),
        );
        debug!(%expiry, "expiry watch armed");
        self.watch = Some((expiry, watch, rx));
    }

    /// Checks the cart against `now`, expiring the flow when its time is up.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Countdown> {
        let expiry = self.cart.expiry()?;
        let status = countdown(expiry, now, self.context.cart.warning_minutes);
        self.observe(status);
        Some(status)
    }

    /// Drains countdown events already delivered by the expiry watch.
    pub fn poll_expiry(&mut self) -> Option<Countdown> {
        let mut latest = None;
        while let Some((_, _, rx)) = self.watch.as_mut() {
            match rx.try_recv() {
                Ok(status) => {
                    latest = Some(status);
                    self.observe(status);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        latest
    }

    /// Waits for the next countdown event of the expiry watch.
    pub async fn next_countdown(&mut self) -> Option<Countdown> {
        let (_, _, rx) = self.watch.as_mut()?;
        let status = rx.recv().await?;
        self.observe(status);
        Some(status)
    }

    fn observe(&mut self, status: Countdown) {
        self.countdown = Some(status);
        if status.is_expired() && !self.machine.is_expired() {
            self.expire();
        }
    }

    /// Forced reset: back to session selection, every bit of local cart state
    /// discarded, and no further input accepted.
    pub fn expire(&mut self) {
        self.machine.expire();
        self.deps.store.remove(CART_ID_KEY);
        self.sequencer.invalidate_all();
        self.ticket_types.clear();
        self.reset_cart();
        self.countdown = Some(Countdown::Expired);
        self.submitting = false;
    }
}
