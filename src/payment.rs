//! payment.rs
//!
//! Payment widget contract and the mapping of gateway payment statuses to
//! what the customer is shown next.
//!
//! The widget itself (card form, 3-D Secure, redirects) belongs to the
//! gateway. This module only decides, from the status the gateway reports,
//! whether to move on to the order confirmation or to re-enable the form.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status string reported by the gateway for a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    Other(String),
}

impl From<String> for PaymentStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "succeeded" => PaymentStatus::Succeeded,
            "processing" => PaymentStatus::Processing,
            "requires_payment_method" => PaymentStatus::RequiresPaymentMethod,
            _ => PaymentStatus::Other(status),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Succeeded => "succeeded".to_string(),
            PaymentStatus::Processing => "processing".to_string(),
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method".to_string(),
            PaymentStatus::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentStatus,
}

/// What happens after the gateway reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Leave the checkout for the confirmation view.
    Redirect { message: &'static str, location: String },
    /// Show the message and let the customer try again.
    Retry { message: &'static str },
    /// The gateway returned nothing usable.
    Failed { message: &'static str },
}

pub const MSG_SUCCEEDED: &str = "Payment succeeded!";
pub const MSG_PROCESSING: &str = "Your payment is processing.";
pub const MSG_REQUIRES_METHOD: &str = "Your payment was not successful, please try again.";
pub const MSG_SOMETHING_WRONG: &str = "Something went wrong.";
pub const MSG_RELOAD: &str = "Something went wrong – please reload the page.";
pub const MSG_PAYMENT_ERROR: &str = "A payment error occurred.";

#[derive(Serialize)]
struct ConfirmQuery<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
}

/// Location of the confirmation view for a gateway reference.
pub fn confirmation_location(confirm_path: &str, reference: &str) -> String {
    match serde_urlencoded::to_string(ConfirmQuery { reference }) {
        Ok(query) => format!("{confirm_path}?{query}"),
        // Encoding a single string field cannot fail.
        Err(_) => confirm_path.to_string(),
    }
}

impl PaymentOutcome {
    pub fn from_intent(intent: Option<&PaymentIntent>, confirm_path: &str) -> Self {
        let Some(intent) = intent else {
            return PaymentOutcome::Failed { message: MSG_RELOAD };
        };
        match intent.status {
            PaymentStatus::Succeeded => PaymentOutcome::Redirect {
                message: MSG_SUCCEEDED,
                location: confirmation_location(confirm_path, &intent.id),
            },
            PaymentStatus::Processing => PaymentOutcome::Redirect {
                message: MSG_PROCESSING,
                location: confirmation_location(confirm_path, &intent.id),
            },
            PaymentStatus::RequiresPaymentMethod => PaymentOutcome::Retry {
                message: MSG_REQUIRES_METHOD,
            },
            PaymentStatus::Other(_) => PaymentOutcome::Retry {
                message: MSG_SOMETHING_WRONG,
            },
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PaymentOutcome::Redirect { message, .. }
            | PaymentOutcome::Retry { message }
            | PaymentOutcome::Failed { message } => message,
        }
    }

    /// Whether the checkout form should accept input again.
    pub fn reenables_form(&self) -> bool {
        matches!(self, PaymentOutcome::Retry { .. })
    }
}

/// Result of asking the widget to confirm a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmResult {
    /// The gateway took over and will send the customer to `return_url`.
    Redirected,
    /// Immediate failure, e.g. a declined card. The message may be absent.
    Error(Option<String>),
}

/// Embedded payment form provided by the gateway.
#[async_trait]
pub trait PaymentWidget: Send + Sync {
    /// Whether the customer has filled in the card form.
    fn is_complete(&self) -> bool;

    async fn confirm_payment(&self, client_secret: &str, return_url: &str) -> ConfirmResult;

    /// Looks up the intent the gateway redirected back with.
    async fn retrieve_payment_intent(&self, client_secret: &str) -> Option<PaymentIntent>;
}
