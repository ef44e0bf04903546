use serde::{Deserialize, Serialize};

/// Storefront account details shown around the checkout.
///
/// Threaded explicitly through the flow via [`crate::CheckoutContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub url: String,
    pub currency: String,
    pub locale: String,
    pub currency_symbol: String,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            name: "Box Office".to_string(),
            url: "localhost".to_string(),
            currency: "usd".to_string(),
            locale: "en-US".to_string(),
            currency_symbol: "$".to_string(),
        }
    }
}
