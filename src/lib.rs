pub mod allocator;
pub mod checkout;
pub mod config;
pub mod confirm;
pub mod error;
pub mod models;
pub mod payment;
pub mod sequence;
pub mod services;
pub mod sort;
pub mod stage;
pub mod storage;
pub mod telemetry;
pub mod timer;
pub mod validation;

pub use checkout::{Applied, CheckoutFlow, Collaborators, SubmitOutcome};
pub use error::{CheckoutError, CheckoutResult, ConfirmError, ServiceError};
pub use stage::CheckoutStage;

use config::{CartConfig, Config, PaymentConfig};
use models::Account;

// Explicit context passed to the checkout flow instead of ambient globals
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub account: Account,
    pub cart: CartConfig,
    pub payment: PaymentConfig,
}

impl CheckoutContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            account: config.account.clone(),
            cart: config.cart.clone(),
            payment: config.payment.clone(),
        }
    }
}

impl Default for CheckoutContext {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
