use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use ticket_checkout::checkout::{MSG_CREATE_CART, MSG_INITIATE_PAYMENT, MSG_SAVE_CONTACT};
use ticket_checkout::confirm::{confirm, ConfirmationState};
use ticket_checkout::models::{ContactDetails, TicketKey};
use ticket_checkout::payment::{
    ConfirmResult, PaymentOutcome, PaymentStatus, MSG_PAYMENT_ERROR, MSG_REQUIRES_METHOD,
};
use ticket_checkout::services::memory::Catalog;
use ticket_checkout::services::{InMemoryStorefront, ScriptedPaymentWidget};
use ticket_checkout::storage::{KeyValueStore, KeyValueStoreExt, MemoryStore, CART_ID_KEY};
use ticket_checkout::timer::{Clock, Countdown, ManualClock};
use ticket_checkout::validation::{FIELD_PAYMENT_FORM_COMPLETE, FIELD_TICKET_QUANTITY, MSG_NO_TICKETS};
use ticket_checkout::{
    Applied, CheckoutContext, CheckoutError, CheckoutFlow, CheckoutStage, Collaborators,
    SubmitOutcome,
};

struct Harness {
    storefront: InMemoryStorefront,
    widget: Arc<ScriptedPaymentWidget>,
    store: MemoryStore,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap());
        let storefront = InMemoryStorefront::new(Catalog::demo())
            .with_hold(Duration::minutes(15))
            .with_clock(Arc::new(clock.clone()));
        Self {
            storefront,
            widget: Arc::new(ScriptedPaymentWidget::new()),
            store: MemoryStore::new(),
            clock,
        }
    }

    fn flow(&self) -> CheckoutFlow {
        self.flow_with_store(&self.store)
    }

    /// A flow of another visitor, persisting its cart id in `store`.
    fn flow_with_store(&self, store: &MemoryStore) -> CheckoutFlow {
        CheckoutFlow::new(
            CheckoutContext::default(),
            Collaborators {
                inventory: Arc::new(self.storefront.clone()),
                carts: Arc::new(self.storefront.clone()),
                payment: self.widget.clone(),
                store: Arc::new(store.clone()),
                clock: Arc::new(self.clock.clone()),
            },
        )
    }
}

fn general() -> TicketKey {
    TicketKey::new("session-1", "general")
}

fn concession() -> TicketKey {
    TicketKey::new("session-1", "concession")
}

fn contact() -> ContactDetails {
    ContactDetails {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: "0400 000 000".to_string(),
        accepts_marketing: true,
    }
}

async fn flow_with_session(harness: &Harness) -> CheckoutFlow {
    choose_first_session(harness.flow()).await
}

async fn choose_first_session(mut flow: CheckoutFlow) -> CheckoutFlow {
    let sessions = flow.sessions().await.unwrap();
    flow.choose_session(sessions[0].clone()).await.unwrap();
    flow
}

#[tokio::test]
async fn purchase_runs_through_to_confirmation() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    assert_eq!(flow.restore().await.unwrap(), Applied::NotFound);

    let sessions = flow.sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    flow.choose_session(sessions[0].clone()).await.unwrap();
    assert_eq!(flow.stage(), CheckoutStage::TicketSelect);

    let options = flow.ticket_options().unwrap();
    let names: Vec<_> = options
        .iter()
        .map(|option| option.ticket_type.ticket_type.name.as_str())
        .collect();
    assert_eq!(names, vec!["General", "Concession", "VIP"]);
    assert_eq!(options[2].max, 10);

    assert_eq!(flow.set_quantity(&general(), 2).await.unwrap(), Applied::Updated);
    assert_eq!(
        harness.store.get::<String>(CART_ID_KEY).unwrap().as_deref(),
        Some(flow.cart().id.as_str())
    );
    assert_eq!(flow.cart().total, "93.00");
    assert_eq!(flow.ticket_options().unwrap()[0].selected, 2);

    flow.checkout().await.unwrap();
    assert_eq!(flow.stage(), CheckoutStage::CustomerDetails);
    let secret = flow.cart().payment_intent_client_secret.clone().unwrap();

    // Contact details still missing.
    assert!(!flow.submit_enabled());
    flow.set_contact(contact());
    assert!(flow.submit_enabled());

    assert_eq!(flow.submit().await.unwrap(), SubmitOutcome::Redirected);

    let intent_id = secret.trim_end_matches("_secret").to_string();
    harness.storefront.complete_payment(&intent_id).unwrap();
    harness
        .widget
        .set_intent_status(&secret, PaymentStatus::Succeeded);

    let outcome = flow.handle_payment_return(&secret).await;
    assert_eq!(
        outcome,
        PaymentOutcome::Redirect {
            message: "Payment succeeded!",
            location: format!("/confirm?ref={intent_id}"),
        }
    );

    let account = flow.context().account.clone();
    let ConfirmationState::Ready(confirmation) =
        confirm(Some(intent_id.as_str()), &harness.storefront, &account)
            .await
            .unwrap()
    else {
        panic!("order should exist");
    };
    assert_eq!(confirmation.tickets.len(), 2);
    assert_eq!(confirmation.contact.email, "ada@example.com");
    let labels: Vec<_> = confirmation.fees.iter().map(|fee| fee.label).collect();
    assert_eq!(labels, vec!["Subtotal", "Booking fees", "Total"]);
}

#[tokio::test]
async fn quantity_above_maximum_is_rejected_locally() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;

    let err = flow
        .set_quantity(&TicketKey::new("session-1", "vip"), 11)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::QuantityOutOfRange { requested: 11, max: 10, .. }
    ));
    assert!(harness.store.get_raw(CART_ID_KEY).is_none());
    assert!(flow.cart().is_placeholder());
}

#[tokio::test]
async fn quantity_for_another_session_needs_that_session() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;

    let err = flow
        .set_quantity(&TicketKey::new("session-2", "general"), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::UnknownSession(id) if id == "session-2"));
}

#[tokio::test]
async fn checkout_without_tickets_stays_on_ticket_selection() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;

    let err = flow.checkout().await.unwrap_err();

    let CheckoutError::Validation(errors) = err else {
        panic!("expected validation errors");
    };
    assert_eq!(errors.get(FIELD_TICKET_QUANTITY), Some(MSG_NO_TICKETS));
    assert_eq!(flow.stage(), CheckoutStage::TicketSelect);
}

#[tokio::test]
async fn superseded_cart_response_is_dropped() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();

    let first = flow.prepare_quantity_change(&general(), 2).unwrap();
    let second = flow.prepare_quantity_change(&general(), 3).unwrap();
    let first = first.send().await;
    let second = second.send().await;

    assert_eq!(flow.apply(second).unwrap(), Applied::Updated);
    assert_eq!(flow.apply(first).unwrap(), Applied::Stale);
    assert_eq!(flow.cart().line(&general()).unwrap().quantity, 3);
}

#[tokio::test]
async fn changes_made_while_the_cart_is_created_land_in_that_cart() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;

    let first = flow.prepare_quantity_change(&general(), 2).unwrap();
    let second = flow.prepare_quantity_change(&concession(), 1).unwrap();
    let (first, second) = tokio::join!(first.send(), second.send());

    assert_eq!(flow.apply(second).unwrap(), Applied::Updated);
    assert_eq!(flow.apply(first).unwrap(), Applied::Stale);
    assert_eq!(flow.cart().line(&general()).unwrap().quantity, 2);
    assert_eq!(flow.cart().line(&concession()).unwrap().quantity, 1);
    assert_eq!(flow.form().total_quantity(), 3);
    assert_eq!(
        harness.store.get::<String>(CART_ID_KEY).unwrap(),
        Some(flow.cart().id.clone())
    );

    // Every change after that updates the same cart.
    let cart_id = flow.cart().id.clone();
    flow.set_quantity(&general(), 1).await.unwrap();
    assert_eq!(flow.cart().id, cart_id);
}

#[tokio::test(start_paused = true)]
async fn expiry_watch_resets_the_flow_when_time_runs_out() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 2).await.unwrap();
    assert_eq!(flow.watched_expiry(), flow.cart().expiry());

    harness.clock.advance(Duration::minutes(16));

    assert_eq!(flow.next_countdown().await, Some(Countdown::Expired));
    assert!(flow.is_expired());
    assert_eq!(flow.stage(), CheckoutStage::SessionSelect);
    assert!(flow.cart().is_placeholder());
    assert!(harness.store.get_raw(CART_ID_KEY).is_none());
    assert_eq!(flow.watched_expiry(), None);
    assert_eq!(flow.next_countdown().await, None);
}

#[tokio::test(start_paused = true)]
async fn expiry_watch_follows_a_replaced_cart() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    let first_expiry = flow.cart().expiry();
    assert!(first_expiry.is_some());
    assert_eq!(flow.watched_expiry(), first_expiry);

    harness.clock.advance(Duration::minutes(2));
    let other_store = MemoryStore::new();
    let mut other = choose_first_session(harness.flow_with_store(&other_store)).await;
    other.set_quantity(&general(), 1).await.unwrap();
    let second_expiry = other.cart().expiry();
    assert_ne!(second_expiry, first_expiry);

    harness.store.set(CART_ID_KEY, &other.cart().id).unwrap();
    assert_eq!(flow.restore().await.unwrap(), Applied::Updated);

    assert_eq!(flow.watched_expiry(), second_expiry);
}

#[tokio::test]
async fn expiry_discards_the_cart_and_locks_the_flow() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 2).await.unwrap();
    let in_flight = flow.prepare_quantity_change(&general(), 3).unwrap();

    harness.clock.advance(Duration::minutes(10));
    assert!(matches!(
        flow.tick(harness.clock.now()),
        Some(Countdown::Remaining { minutes: 5, urgent: false, .. })
    ));

    harness.clock.advance(Duration::minutes(5));
    assert_eq!(flow.tick(harness.clock.now()), Some(Countdown::Expired));

    assert!(flow.is_expired());
    assert_eq!(flow.stage(), CheckoutStage::SessionSelect);
    assert!(flow.selected_session().is_none());
    assert!(flow.cart().is_placeholder());
    assert!(harness.store.get_raw(CART_ID_KEY).is_none());
    assert_eq!(flow.countdown(), Some(Countdown::Expired));

    let late = in_flight.send().await;
    assert_eq!(flow.apply(late).unwrap(), Applied::Stale);

    let sessions = flow.sessions().await.unwrap();
    assert!(matches!(
        flow.choose_session(sessions[0].clone()).await,
        Err(CheckoutError::Expired)
    ));
    assert!(matches!(
        flow.set_quantity(&general(), 1).await,
        Err(CheckoutError::Expired)
    ));
}

#[tokio::test]
async fn persisted_cart_is_restored_and_can_check_out() {
    let harness = Harness::new();
    let mut first = flow_with_session(&harness).await;
    first.set_quantity(&general(), 2).await.unwrap();
    let cart_id = first.cart().id.clone();

    let mut reloaded = harness.flow();
    assert_eq!(reloaded.restore().await.unwrap(), Applied::Updated);
    assert_eq!(reloaded.cart().id, cart_id);
    assert_eq!(reloaded.form().total_quantity(), 2);
    assert_eq!(reloaded.stage(), CheckoutStage::SessionSelect);

    reloaded.checkout().await.unwrap();
    assert_eq!(reloaded.stage(), CheckoutStage::CustomerDetails);

    // No session chosen since the reload, so back skips ticket selection.
    reloaded.back().unwrap();
    assert_eq!(reloaded.stage(), CheckoutStage::SessionSelect);
}

#[tokio::test]
async fn vanished_cart_clears_the_persisted_id() {
    let harness = Harness::new();
    harness.store.set(CART_ID_KEY, &"gone".to_string()).unwrap();
    let mut flow = harness.flow();

    assert_eq!(flow.restore().await.unwrap(), Applied::NotFound);
    assert!(harness.store.get_raw(CART_ID_KEY).is_none());
    assert!(flow.cart().is_placeholder());
}

#[tokio::test]
async fn failed_cart_creation_shows_generic_message() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    harness.storefront.fail_next_call("connection reset");

    let err = flow.set_quantity(&general(), 1).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Remote { message, .. } if message == MSG_CREATE_CART));
    assert_eq!(flow.error(), Some(MSG_CREATE_CART));
    assert!(harness.store.get_raw(CART_ID_KEY).is_none());
}

#[tokio::test]
async fn failed_cart_creation_leaves_nothing_to_check_out() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    harness.storefront.fail_next_call("connection reset");

    assert!(flow.set_quantity(&general(), 2).await.is_err());
    assert_eq!(flow.form().total_quantity(), 0);

    let err = flow.checkout().await.unwrap_err();
    let CheckoutError::Validation(errors) = err else {
        panic!("expected validation errors");
    };
    assert_eq!(errors.get(FIELD_TICKET_QUANTITY), Some(MSG_NO_TICKETS));
    assert_eq!(flow.stage(), CheckoutStage::TicketSelect);

    // The next change creates a cart afresh.
    assert_eq!(flow.set_quantity(&general(), 2).await.unwrap(), Applied::Updated);
    assert_eq!(flow.form().total_quantity(), 2);
    assert!(harness.store.get_raw(CART_ID_KEY).is_some());
}

#[tokio::test]
async fn failed_contact_save_shows_payment_error() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    flow.checkout().await.unwrap();
    flow.set_contact(contact());
    harness.storefront.fail_next_call("connection reset");

    let err = flow.submit().await.unwrap_err();

    assert!(matches!(err, CheckoutError::Remote { message, .. } if message == MSG_SAVE_CONTACT));
    assert_eq!(flow.payment_error(), Some(MSG_SAVE_CONTACT));
    assert!(flow.submit_enabled());
}

#[tokio::test]
async fn failed_payment_intent_keeps_customer_details_stage() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    harness.storefront.fail_next_call("gateway down");

    let err = flow.checkout().await.unwrap_err();

    assert!(matches!(err, CheckoutError::Remote { message, .. } if message == MSG_INITIATE_PAYMENT));
    assert_eq!(flow.stage(), CheckoutStage::CustomerDetails);
    assert!(flow.cart().payment_intent_client_secret.is_none());
}

#[tokio::test]
async fn declined_payment_reenables_the_form() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    flow.checkout().await.unwrap();
    flow.set_contact(contact());
    harness.widget.set_confirm_result(ConfirmResult::Error(None));

    let outcome = flow.submit().await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Declined(MSG_PAYMENT_ERROR.to_string()));
    assert_eq!(flow.payment_error(), Some(MSG_PAYMENT_ERROR));
    assert!(flow.submit_enabled());
}

#[tokio::test]
async fn incomplete_payment_form_blocks_submit() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    flow.checkout().await.unwrap();
    flow.set_contact(contact());
    harness.widget.set_complete(false);

    assert!(flow.form_errors().get(FIELD_PAYMENT_FORM_COMPLETE).is_some());
    assert!(!flow.submit_enabled());
    assert!(matches!(
        flow.submit().await,
        Err(CheckoutError::Validation(_))
    ));
}

#[tokio::test]
async fn unsuccessful_payment_asks_for_another_method() {
    let harness = Harness::new();
    let mut flow = flow_with_session(&harness).await;
    flow.set_quantity(&general(), 1).await.unwrap();
    flow.checkout().await.unwrap();
    let secret = flow.cart().payment_intent_client_secret.clone().unwrap();
    harness
        .widget
        .set_intent_status(&secret, PaymentStatus::RequiresPaymentMethod);

    let outcome = flow.handle_payment_return(&secret).await;

    assert_eq!(outcome, PaymentOutcome::Retry { message: MSG_REQUIRES_METHOD });
    assert_eq!(flow.payment_message(), Some(MSG_REQUIRES_METHOD));
}
