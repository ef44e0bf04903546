//! timer.rs
//!
//! Cart countdown. The cart is held for a server-set time; a periodic check
//! compares "now" with the expiry and reports the remaining time, or the
//! expiry itself, to the owner of the checkout flow.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Source of "now", injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Remaining {
        minutes: i64,
        seconds: i64,
        /// Little time left; the notice should stand out.
        urgent: bool,
    },
    Expired,
}

impl Countdown {
    pub fn is_expired(&self) -> bool {
        matches!(self, Countdown::Expired)
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Remaining {
                minutes, seconds, ..
            } => write!(f, "Time remaining {minutes}:{seconds:02}"),
            Countdown::Expired => f.write_str("Sorry, your cart has expired."),
        }
    }
}

/// Time left until `expiry`. Expired once `now` reaches it.
pub fn countdown(expiry: DateTime<Utc>, now: DateTime<Utc>, warning_minutes: i64) -> Countdown {
    let remaining = expiry - now;
    if remaining <= chrono::Duration::zero() {
        return Countdown::Expired;
    }
    let minutes = remaining.num_minutes();
    Countdown::Remaining {
        minutes,
        seconds: remaining.num_seconds() % 60,
        urgent: minutes <= warning_minutes,
    }
}

/// Periodic expiry check tied to one cart's lifetime.
///
/// Ticks are delivered on the returned channel; the last event is
/// [`Countdown::Expired`], after which the task ends. Dropping or cancelling
/// the watch stops the task.
#[derive(Debug)]
pub struct ExpiryWatch {
    handle: JoinHandle<()>,
}

impl ExpiryWatch {
    pub fn spawn(
        expiry: DateTime<Utc>,
        period: Duration,
        warning_minutes: i64,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<Countdown>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick of a tokio interval fires immediately; the countdown
            // starts reporting one period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                let status = countdown(expiry, clock.now(), warning_minutes);
                if tx.send(status).is_err() {
                    debug!("expiry watch receiver dropped");
                    break;
                }
                if status.is_expired() {
                    info!(%expiry, "cart expiry reached");
                    break;
                }
            }
        });
        (Self { handle }, rx)
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ExpiryWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, 1, 19, minute, second).unwrap()
    }

    #[test]
    fn formats_remaining_time() {
        let status = countdown(at(15, 0), at(4, 55), 3);

        assert_eq!(
            status,
            Countdown::Remaining {
                minutes: 10,
                seconds: 5,
                urgent: false
            }
        );
        assert_eq!(status.to_string(), "Time remaining 10:05");
    }

    #[test]
    fn last_minutes_are_urgent() {
        let status = countdown(at(15, 0), at(12, 30), 3);

        assert!(matches!(status, Countdown::Remaining { urgent: true, .. }));
    }

    #[test]
    fn expires_at_the_deadline() {
        assert_eq!(countdown(at(15, 0), at(15, 0), 3), Countdown::Expired);
        assert_eq!(countdown(at(15, 0), at(15, 1), 3), Countdown::Expired);
        assert_eq!(
            Countdown::Expired.to_string(),
            "Sorry, your cart has expired."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watch_reports_expiry_then_stops() {
        let clock = ManualClock::new(at(14, 58));
        let (watch, mut rx) =
            ExpiryWatch::spawn(at(15, 0), Duration::from_secs(1), 3, Arc::new(clock.clone()));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Countdown::Remaining { minutes: 0, seconds: 2, .. }));

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(rx.recv().await, Some(Countdown::Expired));
        assert_eq!(rx.recv().await, None);
        drop(watch);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watch_goes_quiet() {
        let clock = ManualClock::new(at(0, 0));
        let (watch, mut rx) =
            ExpiryWatch::spawn(at(15, 0), Duration::from_secs(1), 3, Arc::new(clock));

        watch.cancel();

        assert_eq!(rx.recv().await, None);
    }
}
