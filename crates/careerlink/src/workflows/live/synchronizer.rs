use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::view::{QueryView, ViewChange, ViewState};
use crate::config::EngineConfig;
use crate::workflows::error::WorkflowError;
use crate::workflows::store::{EntityStore, Query, SnapshotEvent, Subscription, SubscriptionHandle};

/// Dashboard-chosen name for one live query, e.g. `"org-12/applications"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewKey(pub String);

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What happens to a listener when its dashboard is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerPolicy {
    /// Survives `detach_transient`; only an explicit `unwatch` closes it.
    KeepAlive,
    DetachOnTeardown,
}

struct Shared {
    view: Mutex<QueryView>,
    sender: watch::Sender<ViewState>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl Shared {
    fn view(&self) -> MutexGuard<'_, QueryView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, key: &ViewKey, event: SnapshotEvent) {
        let mut view = self.view();
        match view.on_snapshot(event) {
            ViewChange::Replaced => {
                self.sender.send_replace(view.state().clone());
            }
            ViewChange::MarkedStale => {
                warn!(view = %key, error = ?view.state().last_error, "live view stale");
                self.sender.send_replace(view.state().clone());
            }
            ViewChange::Ignored => {
                debug!(view = %key, "ignoring empty snapshot over rendered documents");
            }
        }
    }

    fn set_handle(&self, handle: Option<SubscriptionHandle>) {
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = handle;
    }

    fn cancel(&self) {
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.unsubscribe();
        }
    }
}

struct Registration {
    query: Query,
    policy: ListenerPolicy,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Registration {
    fn close(self) {
        self.task.abort();
        self.shared.cancel();
    }
}

/// Keeps one stable [`ViewState`] per watched query.
///
/// Each watch runs a pump task that feeds store events through a [`QueryView`] and publishes
/// the result on a `tokio::sync::watch` channel. After an error event the pump drops its
/// listener and subscribes again from scratch. Must be used from within a tokio runtime.
pub struct LiveViewSynchronizer<S> {
    store: Arc<S>,
    resubscribe_delay: Duration,
    views: Mutex<HashMap<ViewKey, Registration>>,
}

impl<S> LiveViewSynchronizer<S>
where
    S: EntityStore + 'static,
{
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            resubscribe_delay: config.resubscribe_delay,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the live query behind `key`.
    pub fn watch(
        &self,
        key: ViewKey,
        query: Query,
        policy: ListenerPolicy,
    ) -> Result<watch::Receiver<ViewState>, WorkflowError> {
        let subscription = self.store.subscribe(query.clone())?;
        let (sender, receiver) = watch::channel(ViewState::default());
        let shared = Arc::new(Shared {
            view: Mutex::new(QueryView::new()),
            sender,
            handle: Mutex::new(Some(subscription.handle())),
        });

        let task = tokio::spawn(pump(
            self.store.clone(),
            key.clone(),
            query.clone(),
            subscription,
            shared.clone(),
            self.resubscribe_delay,
        ));

        let previous = self.views().insert(
            key.clone(),
            Registration {
                query,
                policy,
                shared,
                task,
            },
        );
        if let Some(previous) = previous {
            debug!(view = %key, "replacing existing live view");
            previous.close();
        }
        info!(view = %key, ?policy, "live view started");
        Ok(receiver)
    }

    /// Another receiver for an already watched view.
    pub fn receiver(&self, key: &ViewKey) -> Option<watch::Receiver<ViewState>> {
        self.views()
            .get(key)
            .map(|registration| registration.shared.sender.subscribe())
    }

    pub fn view(&self, key: &ViewKey) -> Option<ViewState> {
        let shared = self.views().get(key).map(|registration| registration.shared.clone())?;
        let state = shared.view().state().clone();
        Some(state)
    }

    /// One-shot re-read that replaces the view unconditionally. Store failures surface to the
    /// caller and leave the view untouched.
    pub fn refresh(&self, key: &ViewKey) -> Result<ViewState, WorkflowError> {
        let (query, shared) = self
            .views()
            .get(key)
            .map(|registration| (registration.query.clone(), registration.shared.clone()))
            .ok_or_else(|| WorkflowError::not_found("view", key))?;

        let documents = self.store.query(&query)?;
        let mut view = shared.view();
        view.refresh(documents);
        let state = view.state().clone();
        shared.sender.send_replace(state.clone());
        debug!(view = %key, documents = state.documents.len(), "live view refreshed");
        Ok(state)
    }

    /// Explicit teardown; closes the listener regardless of its policy.
    pub fn unwatch(&self, key: &ViewKey) -> bool {
        let removed = self.views().remove(key);
        match removed {
            Some(registration) => {
                registration.close();
                info!(view = %key, "live view closed");
                true
            }
            None => false,
        }
    }

    /// Dashboard teardown: closes `DetachOnTeardown` listeners and leaves `KeepAlive` ones
    /// running. Returns how many were closed.
    pub fn detach_transient(&self) -> usize {
        let closing: Vec<Registration> = {
            let mut views = self.views();
            let keys: Vec<ViewKey> = views
                .iter()
                .filter(|(_, registration)| registration.policy == ListenerPolicy::DetachOnTeardown)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| views.remove(key)).collect()
        };
        let closed = closing.len();
        for registration in closing {
            registration.close();
        }
        info!(closed, "transient live views detached");
        closed
    }

    pub fn watched(&self) -> Vec<ViewKey> {
        let mut keys: Vec<ViewKey> = self.views().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn views(&self) -> MutexGuard<'_, HashMap<ViewKey, Registration>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Drop for LiveViewSynchronizer<S> {
    fn drop(&mut self) {
        let views = self.views.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, registration) in views.drain() {
            registration.close();
        }
    }
}

async fn pump<S>(
    store: Arc<S>,
    key: ViewKey,
    query: Query,
    mut subscription: Subscription,
    shared: Arc<Shared>,
    delay: Duration,
) where
    S: EntityStore + 'static,
{
    loop {
        let Some(event) = subscription.next().await else {
            debug!(view = %key, "live feed closed");
            return;
        };
        let failed = matches!(event, SnapshotEvent::Error(_));
        shared.apply(&key, event);
        if failed {
            shared.set_handle(None);
            subscription.unsubscribe();
            subscription = resubscribe(store.as_ref(), &key, &query, &shared, delay).await;
        }
    }
}

async fn resubscribe<S>(
    store: &S,
    key: &ViewKey,
    query: &Query,
    shared: &Shared,
    delay: Duration,
) -> Subscription
where
    S: EntityStore,
{
    let mut attempt: u32 = 0;
    loop {
        tokio::time::sleep(delay).await;
        attempt += 1;
        match store.subscribe(query.clone()) {
            Ok(subscription) => {
                shared.set_handle(Some(subscription.handle()));
                info!(view = %key, attempt, "live view re-subscribed");
                return subscription;
            }
            Err(err) => {
                warn!(view = %key, attempt, error = %err, "re-subscribe failed");
                shared.apply(key, SnapshotEvent::Error(err));
            }
        }
    }
}
