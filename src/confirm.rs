//! confirm.rs
//!
//! Post-payment confirmation.
//!
//! Key components:
//! 1.  **confirm**: looks up the order created for a payment gateway reference
//!     and builds the view-model. Without a reference nothing is looked up.
//! 2.  **Confirmation**: tickets in display order, fee breakdown, customer
//!     details and card summary.
//! 3.  **download_tickets**: fetches the PDF with every ticket of the order.

use tracing::{debug, info};

use crate::error::ConfirmError;
use crate::models::{parse_cents, Account, ContactDetails, Order, Ticket};
use crate::services::{OrderService, TicketDownload, TicketDownloader};
use crate::sort::sort_tickets;

pub const MSG_LOAD_ORDER: &str = "Unable to load order.";
pub const MSG_DOWNLOAD: &str = "Unable to download tickets.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeLine {
    pub label: &'static str,
    /// Amount with the account's currency symbol, e.g. `$ 91.50`.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSummary {
    pub network: String,
    /// `Ending in 4242`
    pub ending: Option<String>,
    /// `Expires 04 / 27`
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub order_id: String,
    pub public_id: String,
    pub tickets: Vec<Ticket>,
    pub fees: Vec<FeeLine>,
    pub contact: ContactDetails,
    pub card: Option<CardSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    /// The gateway has not reported back yet; the order does not exist so far.
    Pending,
    Ready(Box<Confirmation>),
}

fn is_positive(amount: &str) -> bool {
    parse_cents(amount).is_some_and(|cents| cents > 0)
}

fn money(account: &Account, amount: &str) -> String {
    format!("{} {}", account.currency_symbol, amount)
}

/// Subtotal, non-zero fees and total; only the total when no fee applies.
pub fn fee_breakdown(order: &Order, account: &Account) -> Vec<FeeLine> {
    let mut fees = Vec::new();
    if order.subtotal != order.total {
        fees.push(FeeLine {
            label: "Subtotal",
            amount: money(account, &order.subtotal),
        });
        if is_positive(&order.booking_fees) {
            fees.push(FeeLine {
                label: "Booking fees",
                amount: money(account, &order.booking_fees),
            });
        }
        if is_positive(&order.payment_fees) {
            fees.push(FeeLine {
                label: "Payment processing fee",
                amount: money(account, &order.payment_fees),
            });
        }
    }
    fees.push(FeeLine {
        label: "Total",
        amount: money(account, &order.total),
    });
    fees
}

pub fn card_summary(order: &Order) -> Option<CardSummary> {
    let network = order.card_network.clone().filter(|n| !n.is_empty())?;
    let expires = match (order.card_exp_month, order.card_exp_year) {
        (Some(month), Some(year)) => Some(format!("Expires {:02} / {:02}", month, year % 100)),
        _ => None,
    };
    Some(CardSummary {
        network,
        ending: order.card_last4.as_ref().map(|last4| format!("Ending in {last4}")),
        expires,
    })
}

impl Confirmation {
    pub fn from_order(order: Order, account: &Account) -> Self {
        let fees = fee_breakdown(&order, account);
        let card = card_summary(&order);
        Self {
            contact: ContactDetails {
                first_name: order.first_name,
                last_name: order.last_name,
                email: order.email,
                phone: order.phone,
                accepts_marketing: order.accepts_marketing,
            },
            tickets: sort_tickets(order.tickets),
            order_id: order.id,
            public_id: order.public_id,
            fees,
            card,
        }
    }
}

/// Confirmation for the gateway `reference` carried on the return URL.
pub async fn confirm(
    reference: Option<&str>,
    orders: &dyn OrderService,
    account: &Account,
) -> Result<ConfirmationState, ConfirmError> {
    let reference = reference
        .filter(|reference| !reference.is_empty())
        .ok_or(ConfirmError::MissingReference)?;

    let order = orders
        .order_by_gateway_ref(reference)
        .await
        .map_err(|source| ConfirmError::Remote {
            message: MSG_LOAD_ORDER,
            source,
        })?;

    match order {
        None => {
            debug!(reference, "order not created yet");
            Ok(ConfirmationState::Pending)
        }
        Some(order) => {
            info!(order_id = %order.id, tickets = order.tickets.len(), "order confirmed");
            Ok(ConfirmationState::Ready(Box::new(Confirmation::from_order(
                order, account,
            ))))
        }
    }
}

pub async fn download_tickets(
    downloader: &TicketDownloader,
    confirmation: &Confirmation,
) -> Result<TicketDownload, ConfirmError> {
    downloader
        .download(&confirmation.order_id)
        .await
        .map_err(|source| ConfirmError::Remote {
            message: MSG_DOWNLOAD,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(subtotal: &str, booking: &str, payment: &str, total: &str) -> Order {
        Order {
            id: "order-1".to_string(),
            public_id: "A1B2".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "0400000000".to_string(),
            accepts_marketing: false,
            subtotal: subtotal.to_string(),
            booking_fees: booking.to_string(),
            payment_fees: payment.to_string(),
            total: total.to_string(),
            processed: true,
            payment_status: "succeeded".to_string(),
            payment_intent_id: Some("pi_1".to_string()),
            card_network: Some("visa".to_string()),
            card_exp_month: Some(4),
            card_exp_year: Some(2027),
            card_last4: Some("4242".to_string()),
            tickets: Vec::new(),
        }
    }

    fn labels(fees: &[FeeLine]) -> Vec<&'static str> {
        fees.iter().map(|fee| fee.label).collect()
    }

    #[test]
    fn breakdown_skips_zero_fees() {
        let account = Account::default();
        let fees = fee_breakdown(&order("90.00", "3.00", "0.00", "93.00"), &account);

        assert_eq!(labels(&fees), vec!["Subtotal", "Booking fees", "Total"]);
        assert_eq!(fees[2].amount, "$ 93.00");
    }

    #[test]
    fn breakdown_is_total_only_without_fees() {
        let fees = fee_breakdown(&order("90.00", "0.00", "0.00", "90.00"), &Account::default());
        assert_eq!(labels(&fees), vec!["Total"]);
    }

    #[test]
    fn card_expiry_is_padded() {
        let card = card_summary(&order("1", "0", "0", "1")).unwrap();
        assert_eq!(card.ending.as_deref(), Some("Ending in 4242"));
        assert_eq!(card.expires.as_deref(), Some("Expires 04 / 27"));

        let mut no_card = order("1", "0", "0", "1");
        no_card.card_network = None;
        assert!(card_summary(&no_card).is_none());
    }

    #[tokio::test]
    async fn missing_reference_is_refused() {
        let store = crate::services::InMemoryStorefront::new(
            crate::services::memory::Catalog::demo(),
        );
        let err = confirm(None, &store, &Account::default()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::MissingReference));
        assert!(err.to_string().contains("cannot be reloaded"));
    }

    #[tokio::test]
    async fn unknown_reference_is_pending() {
        let store = crate::services::InMemoryStorefront::new(
            crate::services::memory::Catalog::demo(),
        );
        let state = confirm(Some("pi_unknown"), &store, &Account::default())
            .await
            .unwrap();
        assert_eq!(state, ConfirmationState::Pending);
    }
}
