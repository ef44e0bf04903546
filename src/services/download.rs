//! download.rs
//!
//! HTTP client for downloading the tickets of a confirmed order as a PDF.
//!
//! Key components:
//! 1.  **CircuitBreaker**: stops hammering the download endpoint once it keeps
//!     failing, and lets a single trial request through after a cool-down.
//! 2.  **TicketDownloader**: posts `{"order": "<id>"}` to the download endpoint
//!     and hands back the PDF bytes. Every call goes through the breaker.
//!     Failed downloads are never retried automatically.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, DownloadConfig};
use crate::error::ServiceError;

/// File name offered to the customer for the downloaded tickets.
pub const TICKETS_FILE_NAME: &str = "Tickets.pdf";

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests go through.
    Closed,
    /// Requests are refused until the cool-down has passed.
    Open,
    /// One trial request is allowed to test whether the service recovered.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    last_failure: Option<Instant>,
}

/// Guards a remote endpoint against repeated failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    /// Consecutive failures.
    failure_count: AtomicU32,
    /// Failures after which the breaker opens.
    failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial request.
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                last_failure: None,
            }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.timeout_seconds)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the next request may be sent.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.timeout_duration);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("Circuit breaker trial request failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    order: &'a str,
}

/// Downloaded ticket file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketDownload {
    pub file_name: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct TicketDownloader {
    endpoint: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl TicketDownloader {
    pub fn from_config(
        config: &DownloadConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint(),
            http_client,
            circuit_breaker: CircuitBreaker::from_config(breaker),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Fetches the PDF with every ticket of `order_id`.
    pub async fn download(&self, order_id: &str) -> Result<TicketDownload, ServiceError> {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking ticket download request");
            return Err(ServiceError::CircuitOpen);
        }

        info!(order_id, "downloading tickets");
        match self.fetch(order_id).await {
            Ok(bytes) => {
                self.circuit_breaker.record_success();
                Ok(TicketDownload {
                    file_name: TICKETS_FILE_NAME,
                    bytes,
                })
            }
            Err(e) => {
                error!("Ticket download failed: {}", e);
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn fetch(&self, order_id: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&DownloadRequest { order: order_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
