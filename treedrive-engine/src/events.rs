use tokio::sync::broadcast;
use treedrive_core::{JobMode, JobState};

/// Notifications the renderer subscribes to. The renderer never mutates
/// cache state; it re-reads the caches when one of these arrives.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The named folders were invalidated and should be re-read.
    Invalidated {
        folders: Vec<String>,
        source_id: String,
    },
    /// The active view pointed at a moved or renamed node; the view path
    /// was rewritten and the file list should reload once.
    ActivePathMoved { old: String, new: String },
    /// A background job reached a terminal state.
    JobFinished {
        folder: String,
        mode: JobMode,
        state: JobState,
    },
}

pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.sender.send(event);
    }
}
