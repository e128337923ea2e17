//! Interface to the external document store.
//!
//! The engine only talks to storage through [`EntityStore`]: id-based CRUD, equality-filtered
//! queries, live subscriptions that yield whole-result snapshots, and the two counter
//! primitives (`atomic_increment`, `compare_and_set`) the opportunity counter relies on.

mod memory;
pub(crate) mod records;

pub use memory::InMemoryStore;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Collections consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Candidates,
    Organizations,
    Opportunities,
    Applications,
    AdmissionPublications,
}

impl Collection {
    pub const fn name(self) -> &'static str {
        match self {
            Collection::Candidates => "candidates",
            Collection::Organizations => "organizations",
            Collection::Opportunities => "opportunities",
            Collection::Applications => "applications",
            Collection::AdmissionPublications => "admission_publications",
        }
    }

    pub(crate) const fn id_prefix(self) -> &'static str {
        match self {
            Collection::Candidates => "cand",
            Collection::Organizations => "org",
            Collection::Opportunities => "opp",
            Collection::Applications => "app",
            Collection::AdmissionPublications => "pub",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field map of a stored document. The id lives beside it, never inside it.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub data: Document,
}

impl StoredDocument {
    /// Reads a field; `"id"` resolves to the document id.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::String(self.id.0.clone()));
        }
        self.data.get(name).cloned()
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &StoredDocument) -> bool {
        document.field(&self.field).as_ref() == Some(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Filtered, optionally ordered read over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(field, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, document: &StoredDocument) -> bool {
        self.filters.iter().all(|filter| filter.matches(document))
    }

    /// Filters and orders a candidate set the way a store-side query would.
    pub fn apply<I>(&self, documents: I) -> Vec<StoredDocument>
    where
        I: IntoIterator<Item = StoredDocument>,
    {
        let mut matched: Vec<StoredDocument> = documents
            .into_iter()
            .filter(|document| self.matches(document))
            .collect();

        if let Some(order) = &self.order_by {
            matched.sort_by(|left, right| {
                let ordering =
                    compare_values(left.field(&order.field), right.field(&order.field))
                        .then_with(|| left.id.cmp(&right.id));
                match order.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        matched
    }
}

fn compare_values(left: Option<Value>, right: Option<Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => {
            // RFC 3339 strings with differing fractional precision do not sort lexically.
            match (parse_timestamp(&a), parse_timestamp(&b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.cmp(&b),
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(&b),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// Storage abstraction so the workflow services can be exercised in isolation.
pub trait EntityStore: Send + Sync {
    fn get(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError>;
    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;
    /// Opens a live query. The current result set is delivered as the first event.
    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
    fn create(&self, collection: Collection, data: Document) -> Result<DocumentId, StoreError>;
    /// Creates or replaces the document stored under a caller-chosen id.
    fn put(&self, collection: Collection, id: &DocumentId, data: Document)
        -> Result<(), StoreError>;
    /// Merges top-level fields into an existing document.
    fn update(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: Document,
    ) -> Result<(), StoreError>;
    fn delete(&self, collection: Collection, id: &DocumentId) -> Result<(), StoreError>;
    /// Adds `delta` to an integer field (missing counts as zero) and returns the new value.
    fn atomic_increment(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;
    /// Writes `new` only when the field currently equals `expected`; a missing field equals `null`.
    fn compare_and_set(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        expected: &Value,
        new: Value,
    ) -> Result<bool, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("document already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// One delivery on a live query.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Snapshot(Vec<StoredDocument>),
    Error(StoreError),
}

type CancelFn = dyn Fn(u64) + Send + Sync;

/// Cancels a live query. Dropping the handle does not cancel anything.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    cancel: Arc<CancelFn>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, cancel: Arc<CancelFn>) -> Self {
        Self { id, cancel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(&self) {
        (self.cancel)(self.id);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Stream of snapshot events for one live query.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<SnapshotEvent>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// Waits for the next event; `None` once the store closed the feed.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<SnapshotEvent> {
        self.events.try_recv().ok()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}
