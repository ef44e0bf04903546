//! validation.rs
//!
//! Checkout form state and its validation rules.
//!
//! Two layers run together: the field schema (minimum lengths, email shape)
//! checked with `validator` on every non-empty value, and the stage rules
//! (at least one ticket, required contact fields and a complete payment form
//! at the customer details stage). Stage rule messages win over schema ones.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{CartLine, ContactDetails};
use crate::stage::CheckoutStage;

pub const FIELD_TICKET_QUANTITY: &str = "ticketQuantity";
pub const FIELD_FIRST_NAME: &str = "firstName";
pub const FIELD_LAST_NAME: &str = "lastName";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_PHONE: &str = "phone";
pub const FIELD_PAYMENT_FORM_COMPLETE: &str = "paymentFormComplete";

pub const MSG_NO_TICKETS: &str = "You must select at least 1 ticket.";
pub const MSG_REQUIRED: &str = "Required.";
pub const MSG_PAYMENT_INCOMPLETE: &str = "Payment details incomplete.";

/// Field name -> message, one message per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormErrors(BTreeMap<String, String>);

impl FormErrors {
    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(field, message)| (field.as_str(), message.as_str()))
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Values held by the checkout form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub accepts_marketing: bool,
    pub payment_form_complete: bool,
    /// Session id -> ticket type id -> quantity.
    pub ticket_quantity: BTreeMap<String, BTreeMap<String, u32>>,
}

impl CheckoutForm {
    /// Initial form values for a cart: quantities from its lines, empty contact fields.
    pub fn from_cart_lines(lines: &[CartLine]) -> Self {
        let mut form = Self {
            payment_form_complete: true,
            ..Self::default()
        };
        for line in lines {
            form.set_quantity(
                &line.session_ticket_type.session_id,
                &line.session_ticket_type.ticket_type_id,
                line.quantity,
            );
        }
        form
    }

    pub fn set_quantity(&mut self, session_id: &str, ticket_type_id: &str, quantity: u32) {
        self.ticket_quantity
            .entry(session_id.to_string())
            .or_default()
            .insert(ticket_type_id.to_string(), quantity);
    }

    /// Tickets selected across every session.
    pub fn total_quantity(&self) -> u32 {
        self.ticket_quantity
            .values()
            .flat_map(BTreeMap::values)
            .sum()
    }

    pub fn contact(&self) -> ContactDetails {
        ContactDetails {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            accepts_marketing: self.accepts_marketing,
        }
    }

    /// Runs the schema and the rules of `stage`.
    pub fn validate(&self, stage: CheckoutStage) -> FormErrors {
        let mut errors = self.schema_errors();

        if self.total_quantity() < 1 {
            errors.insert(FIELD_TICKET_QUANTITY, MSG_NO_TICKETS);
        }

        if stage == CheckoutStage::CustomerDetails {
            let required = [
                (FIELD_FIRST_NAME, &self.first_name),
                (FIELD_LAST_NAME, &self.last_name),
                (FIELD_EMAIL, &self.email),
                (FIELD_PHONE, &self.phone),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    errors.insert(field, MSG_REQUIRED);
                }
            }
            if !self.payment_form_complete {
                errors.insert(FIELD_PAYMENT_FORM_COMPLETE, MSG_PAYMENT_INCOMPLETE);
            }
        }

        errors
    }

    fn schema_errors(&self) -> FormErrors {
        let schema = ContactSchema {
            first_name: non_empty(&self.first_name),
            last_name: non_empty(&self.last_name),
            email: non_empty(&self.email),
            phone: non_empty(&self.phone),
        };

        let mut errors = FormErrors::default();
        if let Err(failures) = schema.validate() {
            for (field, failures) in failures.field_errors() {
                let message = failures
                    .iter()
                    .find_map(|failure| failure.message.as_ref())
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| "Invalid.".to_string());
                errors.insert(form_field_name(&field), message);
            }
        }
        errors
    }
}

/// Empty values are treated as absent, so the schema only judges what was typed.
fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn form_field_name(field: &str) -> &'static str {
    match field {
        "first_name" => FIELD_FIRST_NAME,
        "last_name" => FIELD_LAST_NAME,
        "email" => FIELD_EMAIL,
        _ => FIELD_PHONE,
    }
}

#[derive(Debug, Validate)]
struct ContactSchema {
    #[validate(length(min = 2, message = "Too short."))]
    first_name: Option<String>,
    #[validate(length(min = 2, message = "Too short."))]
    last_name: Option<String>,
    #[validate(email(message = "Invalid email."))]
    email: Option<String>,
    #[validate(length(min = 5, message = "Too short."))]
    phone: Option<String>,
}
