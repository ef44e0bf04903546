//! stage.rs
//!
//! Linear checkout stage machine:
//! `SessionSelect -> TicketSelect -> CustomerDetails`, with "back" actions
//! and a forced reset to `SessionSelect` when the cart expires.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CheckoutError, CheckoutResult};
use crate::models::Session;
use crate::validation::{FormErrors, FIELD_TICKET_QUANTITY, MSG_NO_TICKETS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStage {
    SessionSelect,
    TicketSelect,
    CustomerDetails,
}

/// Current stage plus the session chosen at `SessionSelect`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageMachine {
    stage: CheckoutStage,
    selected_session: Option<Session>,
    expired: bool,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            stage: CheckoutStage::SessionSelect,
            selected_session: None,
            expired: false,
        }
    }

    pub fn stage(&self) -> CheckoutStage {
        self.stage
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.selected_session.as_ref()
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    fn ensure_live(&self) -> CheckoutResult<()> {
        if self.expired {
            Err(CheckoutError::Expired)
        } else {
            Ok(())
        }
    }

    /// Records `session` and moves on to ticket selection.
    ///
    /// Allowed from `SessionSelect`, and from `TicketSelect` where it replaces
    /// the current choice.
    pub fn choose_session(&mut self, session: Session) -> CheckoutResult<()> {
        self.ensure_live()?;
        match self.stage {
            CheckoutStage::SessionSelect | CheckoutStage::TicketSelect => {
                debug!(session_id = %session.id, "session chosen");
                self.selected_session = Some(session);
                self.stage = CheckoutStage::TicketSelect;
                Ok(())
            }
            stage => Err(CheckoutError::InvalidTransition {
                action: "choose a session",
                stage,
            }),
        }
    }

    /// Steps back one stage.
    ///
    /// From `TicketSelect` the chosen session is cleared. From
    /// `CustomerDetails` the flow returns to ticket selection when a session
    /// is still chosen (tickets may have been added across sessions).
    pub fn back(&mut self) -> CheckoutResult<()> {
        self.ensure_live()?;
        self.stage = match self.stage {
            CheckoutStage::SessionSelect => CheckoutStage::SessionSelect,
            CheckoutStage::TicketSelect => {
                self.selected_session = None;
                CheckoutStage::SessionSelect
            }
            CheckoutStage::CustomerDetails if self.selected_session.is_some() => {
                CheckoutStage::TicketSelect
            }
            CheckoutStage::CustomerDetails => CheckoutStage::SessionSelect,
        };
        Ok(())
    }

    /// Moves on to customer details.
    ///
    /// Rejected, leaving the stage unchanged, unless at least one ticket is
    /// selected across all sessions. A cart restored after a reload can be
    /// checked out straight from `SessionSelect`.
    pub fn checkout(&mut self, total_quantity: u32) -> CheckoutResult<()> {
        self.ensure_live()?;
        if self.stage == CheckoutStage::CustomerDetails {
            return Err(CheckoutError::InvalidTransition {
                action: "check out",
                stage: self.stage,
            });
        }
        if total_quantity < 1 {
            let mut errors = FormErrors::default();
            errors.insert(FIELD_TICKET_QUANTITY, MSG_NO_TICKETS);
            return Err(CheckoutError::Validation(errors));
        }
        self.stage = CheckoutStage::CustomerDetails;
        Ok(())
    }

    /// Forced reset on cart expiry. Valid from every stage; afterwards every
    /// other transition is refused.
    pub fn expire(&mut self) {
        if !self.expired {
            info!(from = ?self.stage, "cart expired, resetting checkout");
        }
        self.stage = CheckoutStage::SessionSelect;
        self.selected_session = None;
        self.expired = true;
    }

    /// Whether the pay button may be pressed.
    pub fn submit_enabled(&self, form_errors: &FormErrors, busy: bool) -> bool {
        !self.expired
            && !busy
            && self.stage == CheckoutStage::CustomerDetails
            && form_errors.is_empty()
    }
}
