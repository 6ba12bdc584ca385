use std::time::Instant;

/// One admitted request recorded by the rate limiter's window list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVisit {
    pub timestamp: Instant,
    pub address: String,
}

impl ClientVisit {
    pub fn new(address: impl Into<String>, timestamp: Instant) -> Self {
        Self {
            timestamp,
            address: address.into(),
        }
    }

    /// A visit strictly older than `threshold` no longer counts against its address.
    pub fn is_expired(&self, threshold: Option<Instant>) -> bool {
        threshold.is_some_and(|threshold| self.timestamp < threshold)
    }
}
