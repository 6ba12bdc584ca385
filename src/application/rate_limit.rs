use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::domain::visit::ClientVisit;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);

/// Sliding-window admission control keyed by client address.
///
/// Visits are kept in arrival order. Each call prunes expired visits from the
/// head of the list, then inspects the first live visit only: a request is
/// denied when that visit belongs to the same address, and the scan stops at
/// the first live visit either way. Live visits further back in the list are
/// not consulted on this call.
///
/// The list is only touched from the dispatcher runtime; the mutex exists so
/// the limiter can live in `Send + Sync` router state and is never contended.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    visits: Mutex<VecDeque<ClientVisit>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            visits: Mutex::new(VecDeque::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, address: &str) -> bool {
        self.admit_at(address, Instant::now())
    }

    pub fn admit_at(&self, address: &str, now: Instant) -> bool {
        let threshold = now.checked_sub(self.window);
        let mut visits = self.visits.lock().unwrap_or_else(PoisonError::into_inner);

        let mut admitted = true;
        while let Some(visit) = visits.front() {
            if visit.is_expired(threshold) {
                visits.pop_front();
                continue;
            }
            if visit.address == address {
                admitted = false;
            }
            break;
        }

        if admitted {
            visits.push_back(ClientVisit::new(address, now));
        }
        admitted
    }

    /// Number of visits currently retained, expired or not.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
