//! Activity-notification tracking for the active scope.
//!
//! Out-of-band notifications never rewrite the collection; they only raise
//! a pending-updates count the caller can surface as a badge. The user's
//! own reload is what actually pulls the new data, which keeps scroll
//! position and selection stable until they ask for a refresh.

#[derive(Debug, Default)]
pub struct UpdateTracker {
    pending: u64,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest announced count of new/updated threads. Counts are
    /// absolute per notification, not deltas, so the newest one wins.
    pub fn record(&mut self, count: u64) {
        self.pending = count;
    }

    /// Clear the badge, typically on reload. Returns the cleared count.
    pub fn acknowledge(&mut self) -> u64 {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }
}
