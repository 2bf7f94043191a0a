//! Monotonic tickets for discarding async completions that lost a race.

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues increasing tickets and remembers the newest one committed.
#[derive(Debug, Default)]
pub struct Generation {
    issued: AtomicU64,
    committed: AtomicU64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a fresh ticket. Every earlier ticket stops being current.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.current() == ticket
    }

    /// Record `ticket` as applied unless a newer ticket was applied first.
    pub fn try_commit(&self, ticket: u64) -> bool {
        self.committed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (ticket > last).then_some(ticket)
            })
            .is_ok()
    }
}

/// What happened to a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response replaced the cached data.
    Applied,
    /// The request failed; the error was published.
    Failed,
    /// A newer request or a context switch made the response obsolete.
    Stale,
    /// Nothing to load (no client or no selection).
    Skipped,
}
