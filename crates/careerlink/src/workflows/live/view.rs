use serde::de::DeserializeOwned;

use crate::workflows::error::WorkflowError;
use crate::workflows::store::records::decode_all;
use crate::workflows::store::{SnapshotEvent, StoredDocument};

/// What a dashboard renders for one live query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub documents: Vec<StoredDocument>,
    /// Set after an error event; the documents are the last good snapshot.
    pub stale: bool,
    pub last_error: Option<String>,
    /// Bumped on every accepted replacement.
    pub revision: u64,
    /// False until the first snapshot or refresh lands.
    pub loaded: bool,
}

impl ViewState {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, WorkflowError> {
        Ok(decode_all(self.documents.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Replaced,
    Ignored,
    MarkedStale,
}

/// No-flicker reconciliation for a single query.
///
/// Listener events are untrusted: an empty snapshot never wipes documents already on screen
/// and an error only flags the view as stale. A non-empty snapshot replaces everything.
/// `refresh` is the explicit user action and is applied as-is, empty or not.
#[derive(Debug, Clone, Default)]
pub struct QueryView {
    state: ViewState,
}

impl QueryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn on_snapshot(&mut self, event: SnapshotEvent) -> ViewChange {
        match event {
            SnapshotEvent::Snapshot(documents) if documents.is_empty() => {
                if self.state.documents.is_empty() {
                    self.replace(documents);
                    ViewChange::Replaced
                } else {
                    ViewChange::Ignored
                }
            }
            SnapshotEvent::Snapshot(documents) => {
                self.replace(documents);
                ViewChange::Replaced
            }
            SnapshotEvent::Error(err) => {
                self.state.stale = true;
                self.state.last_error = Some(err.to_string());
                ViewChange::MarkedStale
            }
        }
    }

    pub fn refresh(&mut self, documents: Vec<StoredDocument>) {
        self.replace(documents);
    }

    fn replace(&mut self, documents: Vec<StoredDocument>) {
        self.state.documents = documents;
        self.state.stale = false;
        self.state.last_error = None;
        self.state.loaded = true;
        self.state.revision += 1;
    }
}
