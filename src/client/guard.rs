use tokio::time::{Duration, Instant};

pub const MIN_TIMEOUT: Duration = Duration::from_millis(1_000);
pub const MAX_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Marks the window after a programmatic seek in which local position
/// reports are echoes of our own correction.
#[derive(Debug, Clone)]
pub struct SyncGuard {
    timeout: Duration,
    until: Option<Instant>,
}

impl SyncGuard {
    pub fn new(timeout: Duration) -> Self {
        SyncGuard { timeout: timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT), until: None }
    }

    pub fn timeout(&self) -> Duration { self.timeout }

    pub fn engage(&mut self, now: Instant) -> Instant {
        let until = now + self.timeout;
        self.until = Some(until);
        until
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|t| now < t)
    }

    /// Clears an expired guard; true if it just expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.until {
            Some(t) if now >= t => {
                self.until = None;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self) {
        self.until = None;
    }

    pub fn expires_at(&self) -> Option<Instant> { self.until }
}
