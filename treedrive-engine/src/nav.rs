use std::sync::atomic::{AtomicU64, Ordering};

/// "Latest navigation wins": each pane navigation takes a ticket, and a
/// response is only painted if its ticket is still current after the await.
/// There is no cancellation primitive; stale responses are simply discarded.
#[derive(Debug, Default)]
pub struct NavSequence {
    current: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavTicket(u64);

impl NavSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> NavTicket {
        NavTicket(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: NavTicket) -> bool {
        self.current.load(Ordering::SeqCst) == ticket.0
    }
}
