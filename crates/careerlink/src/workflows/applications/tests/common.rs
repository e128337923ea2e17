use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::workflows::catalog::NewOpportunity;
use crate::workflows::clock::FixedClock;
use crate::workflows::domain::{
    Actor, CandidateId, EducationLevel, Opportunity, OpportunityTerms, Organization,
    OrganizationKind,
};
use crate::workflows::notify::{Notification, NotificationError, NotificationPublisher};
use crate::workflows::onboarding::NewOrganization;
use crate::workflows::platform::Platform;
use crate::workflows::profiles::ProfileInput;
use crate::workflows::router::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use crate::workflows::store::{
    Collection, Document, DocumentId, EntityStore, InMemoryStore, Query, StoreError,
    StoredDocument, Subscription,
};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

type WriteHook = Box<dyn FnOnce() + Send>;

/// In-memory store with switchable write failures.
#[derive(Default)]
pub(super) struct FlakyStore {
    inner: InMemoryStore,
    fail_application_writes: AtomicBool,
    fail_counter_writes: AtomicBool,
    counter_writes: AtomicUsize,
    before_application_write: Mutex<Option<WriteHook>>,
}

impl FlakyStore {
    pub fn fail_application_writes(&self, fail: bool) {
        self.fail_application_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_counter_writes(&self, fail: bool) {
        self.fail_counter_writes.store(fail, Ordering::SeqCst);
    }

    /// Runs `hook` once, right before the next application document is created.
    pub fn before_next_application_write(&self, hook: impl FnOnce() + Send + 'static) {
        *self
            .before_application_write
            .lock()
            .expect("hook mutex poisoned") = Some(Box::new(hook));
    }

    pub fn counter_writes(&self) -> usize {
        self.counter_writes.load(Ordering::SeqCst)
    }

    fn check_counter(&self) -> Result<(), StoreError> {
        self.counter_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_counter_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("counter write timed out".to_string()));
        }
        Ok(())
    }
}

impl EntityStore for FlakyStore {
    fn get(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(collection, id)
    }

    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(query)
    }

    fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query)
    }

    fn create(&self, collection: Collection, data: Document) -> Result<DocumentId, StoreError> {
        if collection == Collection::Applications {
            let hook = self
                .before_application_write
                .lock()
                .expect("hook mutex poisoned")
                .take();
            if let Some(hook) = hook {
                hook();
            }
        }
        if collection == Collection::Applications
            && self.fail_application_writes.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("application write timed out".to_string()));
        }
        self.inner.create(collection, data)
    }

    fn put(
        &self,
        collection: Collection,
        id: &DocumentId,
        data: Document,
    ) -> Result<(), StoreError> {
        self.inner.put(collection, id, data)
    }

    fn update(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: Document,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, id, patch)
    }

    fn delete(&self, collection: Collection, id: &DocumentId) -> Result<(), StoreError> {
        self.inner.delete(collection, id)
    }

    fn atomic_increment(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.check_counter()?;
        self.inner.atomic_increment(collection, id, field, delta)
    }

    fn compare_and_set(
        &self,
        collection: Collection,
        id: &DocumentId,
        field: &str,
        expected: &Value,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.check_counter()?;
        self.inner.compare_and_set(collection, id, field, expected, new)
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    offline: AtomicBool,
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp relay down".to_string()));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct Fixture {
    pub platform: Arc<Platform<FlakyStore, MemoryNotifier>>,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub clock: Arc<FixedClock>,
}

pub(super) fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

pub(super) fn fixture_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(FlakyStore::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let clock = Arc::new(FixedClock::new(start()));
    let platform = Arc::new(Platform::with_clock(
        store.clone(),
        notifier.clone(),
        config,
        clock.clone(),
    ));
    Fixture {
        platform,
        store,
        notifier,
        clock,
    }
}

impl Fixture {
    pub fn organization(&self, kind: OrganizationKind, name: &str) -> Organization {
        let registered = self
            .platform
            .organizations
            .register(NewOrganization {
                kind,
                name: name.to_string(),
                contact_email: format!("office@{}.example", name.to_lowercase().replace(' ', "-")),
                contact_phone: None,
            })
            .expect("registers");
        self.platform
            .organizations
            .approve(&registered.id, &Actor::Admin)
            .expect("approves")
    }

    pub fn institution(&self, name: &str) -> Organization {
        self.organization(OrganizationKind::Institution, name)
    }

    pub fn company(&self, name: &str) -> Organization {
        self.organization(OrganizationKind::Company, name)
    }

    pub fn course(&self, organization: &Organization, title: &str, capacity: u32) -> Opportunity {
        self.platform
            .catalog
            .publish_opportunity(
                &Actor::Staff(organization.id.clone()),
                NewOpportunity {
                    organization_id: organization.id.clone(),
                    title: title.to_string(),
                    required_skills: BTreeSet::new(),
                    terms: OpportunityTerms::Course {
                        capacity,
                        prerequisites: None,
                        intake_period: "2025-fall".to_string(),
                    },
                    deadline: None,
                },
            )
            .expect("publishes course")
    }

    pub fn job(&self, organization: &Organization, title: &str, skills: &[&str]) -> Opportunity {
        self.platform
            .catalog
            .publish_opportunity(
                &Actor::Staff(organization.id.clone()),
                NewOpportunity {
                    organization_id: organization.id.clone(),
                    title: title.to_string(),
                    required_skills: skills.iter().map(|skill| skill.to_string()).collect(),
                    terms: OpportunityTerms::Job {
                        minimum_education: EducationLevel::Bachelors,
                    },
                    deadline: None,
                },
            )
            .expect("publishes job")
    }

    pub fn candidate(&self, uid: &str, skills: &[&str], academic: Option<u8>) -> CandidateId {
        let id = CandidateId::from(uid);
        self.platform
            .candidates
            .save_profile(
                &id,
                ProfileInput {
                    email: format!("{uid}@student.example"),
                    display_name: uid.to_string(),
                    education_level: Some(EducationLevel::Bachelors),
                    skills: skills.iter().map(|skill| skill.to_string()).collect(),
                    certificate_count: 0,
                    experience_years: 0,
                    academic_performance: academic,
                },
                &Actor::Candidate(id.clone()),
            )
            .expect("saves profile");
        id
    }

    pub fn stored_count(&self, opportunity: &Opportunity) -> u32 {
        self.platform
            .catalog
            .opportunity(&opportunity.id)
            .expect("opportunity stored")
            .application_count
    }
}

pub(super) fn request(
    method: Method,
    uri: &str,
    actor: Option<(&str, &str)>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((role, id)) = actor {
        builder = builder
            .header(ACTOR_ROLE_HEADER, role)
            .header(ACTOR_ID_HEADER, id);
    }
    match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).expect("serialize body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
