use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Collection, Document, DocumentId, EntityStore, Query, SnapshotEvent, StoreError,
    StoredDocument, Subscription, SubscriptionHandle,
};

/// Process-local document store with live queries.
///
/// Every mutation re-evaluates the live queries on the touched collection and pushes a fresh
/// snapshot to each of them. Listeners whose receiver was dropped are pruned on the next push.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    offline: AtomicBool,
}

#[derive(Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<DocumentId, Document>>,
    listeners: BTreeMap<u64, Listener>,
    next_listener: u64,
    next_document: u64,
}

struct Listener {
    query: Query,
    sender: mpsc::UnboundedSender<SnapshotEvent>,
}

impl State {
    fn documents(&self, collection: Collection) -> Vec<StoredDocument> {
        self.collections
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, data)| StoredDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn document_mut(
        &mut self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<&mut Document, StoreError> {
        self.collections
            .get_mut(&collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or(StoreError::NotFound)
    }

    fn notify(&mut self, collection: Collection) {
        let snapshot = self.documents(collection);
        self.listeners.retain(|id, listener| {
            if listener.query.collection != collection {
                return true;
            }
            let event = SnapshotEvent::Snapshot(listener.query.apply(snapshot.clone()));
            let delivered = listener.sender.send(event).is_ok();
            if !delivered {
                debug!(listener = id, %collection, "pruning closed listener");
            }
            delivered
        });
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Pushes an error event to every live query on `collection`.
    pub fn emit_error(&self, collection: Collection, message: &str) {
        self.broadcast(
            collection,
            SnapshotEvent::Error(StoreError::Unavailable(message.to_string())),
        );
    }

    /// Pushes an empty snapshot to every live query on `collection`, as a flaky backend might.
    pub fn emit_empty(&self, collection: Collection) {
        self.broadcast(collection, SnapshotEvent::Snapshot(Vec::new()));
    }

    pub fn listener_count(&self) -> usize {
        self.lock().map(|state| state.listeners.len()).unwrap_or(0)
    }

    fn broadcast(&self, collection: Collection, event: SnapshotEvent) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.listeners.retain(|_, listener| {
                listener.query.collection != collection
                    || listener.sender.send(event.clone()).is_ok()
            });
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        self.inner
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store state poisoned".to_string()))
    }
}

impl EntityStore for InMemoryStore {
    fn get(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(&collection)
            .and_then(|documents| documents.get(id))
            .map(|data| StoredDocument {
                id: id.clone(),
                data: data.clone(),
            }))
    }

    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let state = self.lock()?;
        Ok(query.apply(state.documents(query.collection)))
    }

    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let mut state = self.lock()?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let initial = query.apply(state.documents(query.collection));
        // The receiver is alive in this scope, so the first send cannot fail.
        let _ = sender.send(SnapshotEvent::Snapshot(initial));

        state.next_listener += 1;
        let listener_id = state.next_listener;
        state.listeners.insert(listener_id, Listener { query, sender });

        let weak = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(
            listener_id,
            Arc::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut state) = inner.state.lock() {
                        state.listeners.remove(&id);
                    }
                }
            }),
        );

        Ok(Subscription::new(receiver, handle))
    }

    fn create(&self, collection: Collection, data: Document) -> Result<DocumentId, StoreError> {
        let mut state = self.lock()?;
        state.next_document += 1;
        let id = DocumentId(format!(
            "{}-{:06}",
            collection.id_prefix(),
            state.next_document
        ));
        state
            .collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), data);
        state.notify(collection);
        Ok(id)
    }

    fn put(
        &self,
        collection: Collection,
        id: &DocumentId,
        data: Document,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), data);
        state.notify(collection);
        Ok(())
    }

    fn update(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: Document,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let document = state.document_mut(collection, id)?;
        for (field, value) in patch {
            document.insert(field, value);
        }
        state.notify(collection);
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &DocumentId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let removed = state
            .collections
            .get_mut(&collection)
            .and_then(|documents| documents.remove(id));
        if removed.is_none() {
            return Err(StoreError::NotFound);
        }
        state.notify(collection);
        Ok(())
    }

    fn atomic_increment(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let mut state = self.lock()?;
        let document = state.document_mut(collection, id)?;
        let current = match document.get(field) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                StoreError::Malformed(format!("{id}: field {field} is not an integer"))
            })?,
        };
        let next = current + delta;
        document.insert(field.to_string(), Value::from(next));
        state.notify(collection);
        Ok(next)
    }

    fn compare_and_set(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        expected: &Value,
        new: Value,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let document = state.document_mut(collection, id)?;
        if document.get(field).unwrap_or(&Value::Null) != expected {
            return Ok(false);
        }
        document.insert(field.to_string(), new);
        state.notify(collection);
        Ok(true)
    }
}
