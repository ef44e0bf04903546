use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::models::Account;

// Top-level configuration, one group per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub account: Account,
    pub cart: CartConfig,
    pub payment: PaymentConfig,
    pub download: DownloadConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Process-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub rust_log: String,
    /// `json` switches log output to JSON lines.
    pub log_format: String,
    /// Catalog fixture for the simulator; a built-in catalog is used when unset.
    pub catalog_path: Option<String>,
}

// Cart hold and countdown
#[derive(Debug, Clone, Deserialize)]
pub struct CartConfig {
    pub countdown_interval_ms: u64,
    pub warning_minutes: i64,
    /// How long the in-memory storefront holds a cart.
    pub hold_minutes: i64,
}

// Where the payment gateway sends the customer back to
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub return_url: String,
    pub confirm_path: String,
}

// Ticket download endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Storefront domain; when set the endpoint is `https://{domain}{path}`.
    pub storefront_domain: Option<String>,
    /// Base URL used when no storefront domain is configured.
    pub base_url: String,
    pub path: String,
    pub timeout_seconds: u64,
}

impl DownloadConfig {
    pub fn endpoint(&self) -> String {
        match self.storefront_domain.as_deref() {
            Some(domain) if !domain.is_empty() => format!("https://{}{}", domain, self.path),
            _ => format!("{}{}", self.base_url.trim_end_matches('/'), self.path),
        }
    }
}

// Circuit breaker for HTTP collaborators
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                environment: "development".to_string(),
                rust_log: "ticket_checkout=debug,checkout_sim=debug".to_string(),
                log_format: "pretty".to_string(),
                catalog_path: None,
            },
            account: Account::default(),
            cart: CartConfig {
                countdown_interval_ms: 1000,
                warning_minutes: 3,
                hold_minutes: 15,
            },
            payment: PaymentConfig {
                return_url: "http://localhost:3000/".to_string(),
                confirm_path: "/confirm".to_string(),
            },
            download: DownloadConfig {
                storefront_domain: None,
                base_url: "http://localhost:3000".to_string(),
                path: "/customer-api/orders/download".to_string(),
                timeout_seconds: 30,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parsed_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Reads the configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            app: AppConfig {
                environment: var_or("ENVIRONMENT", defaults.app.environment),
                rust_log: var_or("RUST_LOG", defaults.app.rust_log),
                log_format: var_or("LOG_FORMAT", defaults.app.log_format),
                catalog_path: optional_var("CATALOG_PATH"),
            },
            account: Account {
                name: var_or("ACCOUNT_NAME", defaults.account.name),
                url: var_or("ACCOUNT_URL", defaults.account.url),
                currency: var_or("ACCOUNT_CURRENCY", defaults.account.currency),
                locale: var_or("ACCOUNT_LOCALE", defaults.account.locale),
                currency_symbol: var_or(
                    "ACCOUNT_CURRENCY_SYMBOL",
                    defaults.account.currency_symbol,
                ),
            },
            cart: CartConfig {
                countdown_interval_ms: parsed_var(
                    "CART_COUNTDOWN_INTERVAL_MS",
                    defaults.cart.countdown_interval_ms,
                )?,
                warning_minutes: parsed_var("CART_WARNING_MINUTES", defaults.cart.warning_minutes)?,
                hold_minutes: parsed_var("CART_HOLD_MINUTES", defaults.cart.hold_minutes)?,
            },
            payment: PaymentConfig {
                return_url: var_or("PAYMENT_RETURN_URL", defaults.payment.return_url),
                confirm_path: var_or("CONFIRM_PATH", defaults.payment.confirm_path),
            },
            download: DownloadConfig {
                storefront_domain: optional_var("STOREFRONT_DOMAIN"),
                base_url: var_or("DOWNLOAD_BASE_URL", defaults.download.base_url),
                path: var_or("DOWNLOAD_PATH", defaults.download.path),
                timeout_seconds: parsed_var(
                    "HTTP_TIMEOUT_SECONDS",
                    defaults.download.timeout_seconds,
                )?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed_var(
                    "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                    defaults.circuit_breaker.failure_threshold,
                )?,
                timeout_seconds: parsed_var(
                    "CIRCUIT_BREAKER_TIMEOUT_SECONDS",
                    defaults.circuit_breaker.timeout_seconds,
                )?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_endpoint_prefers_storefront_domain() {
        let mut download = Config::default().download;
        assert_eq!(
            download.endpoint(),
            "http://localhost:3000/customer-api/orders/download"
        );

        download.storefront_domain = Some("tickets.example.com".to_string());
        assert_eq!(
            download.endpoint(),
            "https://tickets.example.com/customer-api/orders/download"
        );
    }

    #[test]
    fn malformed_numbers_are_reported() {
        // Unique variable name so parallel tests do not interfere.
        env::set_var("TICKET_CHECKOUT_TEST_NUMBER", "ten");

        let err = parsed_var::<u64>("TICKET_CHECKOUT_TEST_NUMBER", 1).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "TICKET_CHECKOUT_TEST_NUMBER", .. }
        ));
        env::remove_var("TICKET_CHECKOUT_TEST_NUMBER");
    }

    #[test]
    fn unset_numbers_fall_back() {
        assert_eq!(parsed_var("TICKET_CHECKOUT_TEST_UNSET", 42u32).unwrap(), 42);
    }
}
