//! Pick-and-resolve flow for replacing an attachment's content.
//!
//! A user-initiated selection moves through `Idle -> Loading -> Success |
//! Failed`. Starting a new selection supersedes the pending one: the stale
//! load's result is discarded when its ticket no longer matches the current
//! selection.

use std::sync::Arc;

use tokio::sync::Mutex;

/// Observable state of the current selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Idle,
    Loading { progress: f32 },
    Success(Vec<u8>),
    Failed(String),
}

/// Proof of which selection a load belongs to. Stale tickets are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket(u64);

#[derive(Debug)]
struct PickerInner {
    state: SelectionState,
    current: u64,
}

/// Small state machine driving one attachment replacement at a time.
#[derive(Debug, Clone)]
pub struct ImagePicker {
    inner: Arc<Mutex<PickerInner>>,
}

impl ImagePicker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PickerInner {
                state: SelectionState::Idle,
                current: 0,
            })),
        }
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> SelectionState {
        self.inner.lock().await.state.clone()
    }

    /// Start a new selection, superseding any pending one.
    pub async fn begin(&self) -> SelectionTicket {
        let mut inner = self.inner.lock().await;
        inner.current += 1;
        inner.state = SelectionState::Loading { progress: 0.0 };
        SelectionTicket(inner.current)
    }

    /// Whether the ticket still belongs to the current selection.
    ///
    /// Loads must re-check this before committing their result anywhere
    /// outside the picker; a superseded load's bytes are discarded.
    pub async fn is_current(&self, ticket: SelectionTicket) -> bool {
        self.inner.lock().await.current == ticket.0
    }

    /// Report load progress. Returns `false` (and changes nothing) when the
    /// ticket was superseded.
    pub async fn report_progress(&self, ticket: SelectionTicket, progress: f32) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current != ticket.0 {
            return false;
        }
        inner.state = SelectionState::Loading {
            progress: progress.clamp(0.0, 1.0),
        };
        true
    }

    /// Complete the selection's load. A stale ticket's result is discarded;
    /// returns whether the result was accepted.
    pub async fn complete(
        &self,
        ticket: SelectionTicket,
        result: std::result::Result<Vec<u8>, String>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current != ticket.0 {
            tracing::debug!("Discarding load result for superseded selection");
            return false;
        }
        inner.state = match result {
            Ok(bytes) => SelectionState::Success(bytes),
            Err(message) => SelectionState::Failed(message),
        };
        true
    }

    /// Return to idle, invalidating any pending selection.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.current += 1;
        inner.state = SelectionState::Idle;
    }
}

impl Default for ImagePicker {
    fn default() -> Self {
        Self::new()
    }
}
