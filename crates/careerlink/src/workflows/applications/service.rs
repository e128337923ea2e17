use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::eligibility::{EligibilityDecision, EligibilityPolicy, IneligibleReason};
use super::transitions::{classify, TransitionKind};
use crate::config::EngineConfig;
use crate::workflows::clock::{Clock, SystemClock};
use crate::workflows::domain::{
    Actor, AdmissionPublication, Application, ApplicationId, ApplicationStatus, Candidate,
    CandidateId, CourseStatus, Opportunity, OpportunityId, Organization, OrganizationId, Track,
    APPLICATION_COUNT_FIELD,
};
use crate::workflows::error::WorkflowError;
use crate::workflows::lookup::{fetch, fetch_all, missing_as};
use crate::workflows::notify::{Notification, NotificationPublisher};
use crate::workflows::store::records::{decode, encode, patch, to_value};
use crate::workflows::store::{
    Collection, DocumentId, EntityStore, Query, SortDirection, StoreError,
};

/// Owns application state changes and the opportunity counter.
///
/// Submissions from one candidate are serialized in-process so the duplicate and
/// per-organization checks see every earlier submission. Counter writes on one opportunity
/// (seat reservation plus the application write, withdrawal, reconciliation) are serialized
/// too, so a recount never erases a seat whose application is still being written. Seats are
/// reserved with a compare-and-set loop on the opportunity counter, so writers outside this
/// process can never push the counter past capacity either.
pub struct ApplicationLifecycleManager<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    policy: EligibilityPolicy,
    counter_retries: u32,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl<S, N> ApplicationLifecycleManager<S, N>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: &EngineConfig) -> Self {
        Self::with_clock(store, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy: EligibilityPolicy::new(config.organization_application_limit),
            counter_retries: config.counter_retries.max(1),
            clock,
            locks: KeyedLocks::default(),
        }
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// Checks eligibility against what is stored right now, without writing anything.
    pub fn check_eligibility(
        &self,
        candidate_id: &CandidateId,
        opportunity_id: &OpportunityId,
    ) -> Result<EligibilityDecision, WorkflowError> {
        let opportunity = self.visible_opportunity(opportunity_id)?;
        let existing = self.applications_for_candidate(candidate_id)?;
        Ok(self
            .policy
            .evaluate(candidate_id, &opportunity, &existing, self.clock.now()))
    }

    /// Files a new application in its initial status and counts it on the opportunity.
    pub fn submit_application(
        &self,
        candidate_id: &CandidateId,
        opportunity_id: &OpportunityId,
    ) -> Result<Application, WorkflowError> {
        let candidate_slot = self.locks.slot(format!("candidate:{candidate_id}"));
        let _candidate = candidate_slot.lock();

        let candidate: Candidate = fetch(
            self.store.as_ref(),
            Collection::Candidates,
            &candidate_id.document_id(),
            "candidate",
        )?;
        let opportunity = self.visible_opportunity(opportunity_id)?;
        let organization: Organization = fetch(
            self.store.as_ref(),
            Collection::Organizations,
            &opportunity.organization_id.document_id(),
            "organization",
        )?;
        let existing = self.applications_for_candidate(candidate_id)?;

        let now = self.clock.now();
        if let EligibilityDecision::Refused(reason) =
            self.policy.evaluate(candidate_id, &opportunity, &existing, now)
        {
            warn!(%candidate_id, %opportunity_id, reason = reason.code(), "application refused");
            return Err(WorkflowError::Ineligible(reason));
        }

        let track = opportunity.track();
        let mut application = Application {
            id: ApplicationId(String::new()),
            candidate_id: candidate_id.clone(),
            opportunity_id: opportunity_id.clone(),
            organization_id: opportunity.organization_id.clone(),
            status: ApplicationStatus::initial(track),
            intake_period: opportunity.intake_period().map(str::to_string),
            submitted_at: now,
            updated_at: now,
            candidate_name: candidate.display_name.clone(),
            candidate_email: candidate.email.clone(),
            opportunity_title: opportunity.title.clone(),
            organization_name: organization.name.clone(),
        };
        let body = encode(&application)?;

        let opportunity_doc = opportunity_id.document_id();
        let counter_slot = self.locks.slot(counter_key(opportunity_id));
        let _counter = counter_slot.lock();
        match track {
            Track::Course => {
                let count = self.reserve_seat(&opportunity)?;
                match self.store.create(Collection::Applications, body) {
                    Ok(id) => {
                        application.id = id.into();
                        info!(
                            application_id = %application.id,
                            %candidate_id,
                            %opportunity_id,
                            application_count = count,
                            "course application submitted"
                        );
                    }
                    Err(err) => {
                        warn!(%opportunity_id, error = %err, "application write failed, releasing seat");
                        self.adjust_counter(&opportunity_doc, -1);
                        return Err(err.into());
                    }
                }
            }
            Track::Job => {
                let id = self.store.create(Collection::Applications, body)?;
                application.id = id.into();
                if let Err(err) = self.store.atomic_increment(
                    Collection::Opportunities,
                    &opportunity_doc,
                    APPLICATION_COUNT_FIELD,
                    1,
                ) {
                    warn!(%opportunity_id, error = %err, "counter increment failed, reconciling");
                    if self.recount(opportunity_id).is_err() {
                        self.discard(&application.id);
                        return Err(err.into());
                    }
                }
                info!(
                    application_id = %application.id,
                    %candidate_id,
                    %opportunity_id,
                    "job application submitted"
                );
            }
        }

        Ok(application)
    }

    /// Moves an application along its track's state machine.
    ///
    /// Organization staff and admins drive review decisions. A candidate may only ask for
    /// `withdrawn`, which is handled as [`Self::withdraw`]. A target the track's table does not
    /// allow is an `InvalidTransition` whoever asks; permission is checked after that. The last
    /// write wins when two reviewers race on the same application.
    pub fn transition_status(
        &self,
        application_id: &ApplicationId,
        target: ApplicationStatus,
        actor: &Actor,
    ) -> Result<Application, WorkflowError> {
        let mut application = self.application(application_id)?;

        if let Actor::Candidate(candidate_id) = actor {
            if target == ApplicationStatus::Course(CourseStatus::Withdrawn) {
                return self.withdraw(application_id, candidate_id);
            }
        }

        let from = application.status;
        let invalid = || WorkflowError::InvalidTransition {
            track: from.track().label(),
            from: from.label(),
            to: target.label(),
        };
        let kind = classify(from, target).ok_or_else(invalid)?;

        if matches!(actor, Actor::Candidate(_)) {
            return Err(WorkflowError::Forbidden(
                "candidates cannot review applications".to_string(),
            ));
        }
        if !actor.manages(&application.organization_id) {
            return Err(WorkflowError::Forbidden(format!(
                "{} does not manage {}",
                actor.describe(),
                application.organization_id
            )));
        }

        match kind {
            TransitionKind::Review => {}
            TransitionKind::Withdrawal => {
                return Err(WorkflowError::Forbidden(
                    "only the applicant can withdraw an application".to_string(),
                ));
            }
            TransitionKind::Revisit => {
                if let Some(period) = application.intake_period.as_deref() {
                    if self.is_published(&application.organization_id, period)? {
                        return Err(invalid());
                    }
                }
            }
        }

        let now = self.clock.now();
        let document_id = application_id.document_id();
        self.store
            .update(
                Collection::Applications,
                &document_id,
                patch([("status", to_value(&target)?), ("updated_at", to_value(&now)?)]),
            )
            .map_err(missing_as("application", &document_id))?;

        application.status = target;
        application.updated_at = now;
        info!(
            %application_id,
            actor = %actor.describe(),
            from = from.label(),
            to = target.label(),
            "application status changed"
        );
        Ok(application)
    }

    /// Removes a pending course application on behalf of its candidate and releases its count.
    ///
    /// Once the record is deleted the withdrawal has happened: a counter that could not be
    /// released or recounted is logged and left for [`Self::reconcile_counter`].
    pub fn withdraw(
        &self,
        application_id: &ApplicationId,
        candidate_id: &CandidateId,
    ) -> Result<Application, WorkflowError> {
        let mut application = self.application(application_id)?;

        if &application.candidate_id != candidate_id {
            return Err(WorkflowError::Forbidden(
                "only the applicant can withdraw an application".to_string(),
            ));
        }
        match application.status {
            ApplicationStatus::Course(CourseStatus::Pending) => {}
            ApplicationStatus::Job(_) => {
                return Err(WorkflowError::Forbidden(
                    "job applications cannot be withdrawn".to_string(),
                ));
            }
            other => {
                return Err(WorkflowError::Forbidden(format!(
                    "cannot withdraw an application that is {}",
                    other.label()
                )));
            }
        }

        let opportunity_id = application.opportunity_id.clone();
        let counter_slot = self.locks.slot(counter_key(&opportunity_id));
        let _counter = counter_slot.lock();

        let document_id = application_id.document_id();
        self.store
            .delete(Collection::Applications, &document_id)
            .map_err(missing_as("application", &document_id))?;

        match self.store.atomic_increment(
            Collection::Opportunities,
            &opportunity_id.document_id(),
            APPLICATION_COUNT_FIELD,
            -1,
        ) {
            Ok(count) if count >= 0 => {}
            Ok(count) => {
                warn!(%opportunity_id, count, "counter went negative, reconciling");
                self.recount_or_log(&opportunity_id);
            }
            Err(StoreError::NotFound) => {
                debug!(%opportunity_id, "opportunity gone, nothing to release");
            }
            Err(err) => {
                warn!(%opportunity_id, error = %err, "counter decrement failed, reconciling");
                self.recount_or_log(&opportunity_id);
            }
        }

        application.status = ApplicationStatus::Course(CourseStatus::Withdrawn);
        application.updated_at = self.clock.now();
        info!(%application_id, %candidate_id, "application withdrawn");
        Ok(application)
    }

    /// Records that an organization finished reviewing `period` and tells the notifier.
    ///
    /// Individual statuses are left as they are. Publishing the same period twice is a
    /// conflict.
    pub fn publish_admissions(
        &self,
        organization_id: &OrganizationId,
        period: &str,
        actor: &Actor,
    ) -> Result<AdmissionPublication, WorkflowError> {
        let period = period.trim();
        if period.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "admission period must not be empty".to_string(),
            ));
        }
        if !actor.manages(organization_id) {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot publish admissions for {organization_id}",
                actor.describe()
            )));
        }
        let organization: Organization = fetch(
            self.store.as_ref(),
            Collection::Organizations,
            &organization_id.document_id(),
            "organization",
        )?;

        let marker_id = AdmissionPublication::marker_id(organization_id, period);
        let publication_slot = self.locks.slot(format!("publication:{marker_id}"));
        let _publication = publication_slot.lock();

        if self
            .store
            .get(Collection::AdmissionPublications, &marker_id)?
            .is_some()
        {
            return Err(WorkflowError::Conflict(format!(
                "admissions for {period} were already published"
            )));
        }

        let applications: Vec<Application> = fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Applications)
                .filter("organization_id", organization_id.as_str())
                .filter("intake_period", period),
        )?;
        let tally = |status: CourseStatus| {
            applications
                .iter()
                .filter(|application| application.status == ApplicationStatus::Course(status))
                .count() as u32
        };

        let publication = AdmissionPublication {
            id: marker_id.0.clone(),
            organization_id: organization_id.clone(),
            period: period.to_string(),
            published_at: self.clock.now(),
            published_by: actor.describe(),
            admitted: tally(CourseStatus::Admitted),
            rejected: tally(CourseStatus::Rejected),
            pending: tally(CourseStatus::Pending),
        };
        self.store.put(
            Collection::AdmissionPublications,
            &marker_id,
            encode(&publication)?,
        )?;
        info!(
            %organization_id,
            period,
            admitted = publication.admitted,
            rejected = publication.rejected,
            pending = publication.pending,
            "admissions published"
        );

        let mut details = BTreeMap::new();
        details.insert("organization_name".to_string(), organization.name);
        details.insert("period".to_string(), publication.period.clone());
        details.insert("admitted".to_string(), publication.admitted.to_string());
        details.insert("rejected".to_string(), publication.rejected.to_string());
        if let Err(err) = self.notifier.publish(Notification {
            template: "admissions_published".to_string(),
            subject_id: organization_id.to_string(),
            details,
        }) {
            // Drop the marker so the publication can be retried once the notifier recovers.
            warn!(%organization_id, period, error = %err, "notification failed, reverting publication");
            if let Err(store_err) = self
                .store
                .delete(Collection::AdmissionPublications, &marker_id)
            {
                error!(%organization_id, period, error = %store_err, "publication marker left behind");
            }
            return Err(err.into());
        }

        Ok(publication)
    }

    pub fn is_published(
        &self,
        organization_id: &OrganizationId,
        period: &str,
    ) -> Result<bool, WorkflowError> {
        let marker_id = AdmissionPublication::marker_id(organization_id, period);
        Ok(self
            .store
            .get(Collection::AdmissionPublications, &marker_id)?
            .is_some())
    }

    /// Rewrites the opportunity counter from the applications actually stored.
    pub fn reconcile_counter(&self, opportunity_id: &OpportunityId) -> Result<u32, WorkflowError> {
        let counter_slot = self.locks.slot(counter_key(opportunity_id));
        let _counter = counter_slot.lock();
        self.recount(opportunity_id)
    }

    /// Recount body of [`Self::reconcile_counter`]; the caller holds the opportunity's counter
    /// slot.
    fn recount(&self, opportunity_id: &OpportunityId) -> Result<u32, WorkflowError> {
        let document_id = opportunity_id.document_id();
        for attempt in 1..=self.counter_retries {
            let observed = self.stored_count(&document_id)?;
            let actual = self
                .store
                .query(
                    &Query::new(Collection::Applications)
                        .filter("opportunity_id", opportunity_id.as_str()),
                )?
                .len() as u64;
            if observed == Value::from(actual) {
                return Ok(actual as u32);
            }
            if self.store.compare_and_set(
                Collection::Opportunities,
                &document_id,
                APPLICATION_COUNT_FIELD,
                &observed,
                Value::from(actual),
            )? {
                info!(%opportunity_id, %observed, actual, "opportunity counter reconciled");
                return Ok(actual as u32);
            }
            debug!(%opportunity_id, attempt, "counter moved during reconciliation");
        }
        Err(WorkflowError::Conflict(format!(
            "counter for {opportunity_id} kept changing during reconciliation"
        )))
    }

    pub fn application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Application, WorkflowError> {
        fetch(
            self.store.as_ref(),
            Collection::Applications,
            &application_id.document_id(),
            "application",
        )
    }

    pub fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
    ) -> Result<Vec<Application>, WorkflowError> {
        fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Applications)
                .filter("candidate_id", candidate_id.as_str())
                .order_by("submitted_at", SortDirection::Ascending),
        )
    }

    pub fn applications_for_opportunity(
        &self,
        opportunity_id: &OpportunityId,
    ) -> Result<Vec<Application>, WorkflowError> {
        fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Applications)
                .filter("opportunity_id", opportunity_id.as_str())
                .order_by("submitted_at", SortDirection::Ascending),
        )
    }

    pub fn applications_for_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<Application>, WorkflowError> {
        fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Applications)
                .filter("organization_id", organization_id.as_str())
                .order_by("submitted_at", SortDirection::Descending),
        )
    }

    /// Loads an opportunity as a candidate would see it; hidden organizations read as absent.
    fn visible_opportunity(
        &self,
        opportunity_id: &OpportunityId,
    ) -> Result<Opportunity, WorkflowError> {
        let opportunity: Opportunity = fetch(
            self.store.as_ref(),
            Collection::Opportunities,
            &opportunity_id.document_id(),
            "opportunity",
        )?;
        let organization: Option<Organization> = self
            .store
            .get(
                Collection::Organizations,
                &opportunity.organization_id.document_id(),
            )?
            .map(decode)
            .transpose()?;
        match organization {
            Some(organization) if organization.is_visible() => Ok(opportunity),
            _ => Err(WorkflowError::not_found("opportunity", opportunity_id)),
        }
    }

    /// Claims one seat, re-reading the counter whenever another writer got there first.
    fn reserve_seat(&self, opportunity: &Opportunity) -> Result<u32, WorkflowError> {
        let capacity = opportunity.capacity().unwrap_or(u32::MAX);
        let document_id = opportunity.id.document_id();
        let mut observed = self.stored_count(&document_id)?;

        for attempt in 1..=self.counter_retries {
            let count = observed.as_u64().unwrap_or(0);
            if count >= u64::from(capacity) {
                warn!(opportunity_id = %opportunity.id, capacity, "course is full");
                return Err(WorkflowError::Ineligible(IneligibleReason::OpportunityFull));
            }
            if self.store.compare_and_set(
                Collection::Opportunities,
                &document_id,
                APPLICATION_COUNT_FIELD,
                &observed,
                Value::from(count + 1),
            )? {
                return Ok((count + 1) as u32);
            }
            debug!(opportunity_id = %opportunity.id, attempt, "seat counter moved, retrying");
            observed = self.stored_count(&document_id)?;
        }

        Err(WorkflowError::Conflict(format!(
            "could not reserve a seat on {} after {} attempts",
            opportunity.id, self.counter_retries
        )))
    }

    fn stored_count(&self, document_id: &DocumentId) -> Result<Value, WorkflowError> {
        let document = self
            .store
            .get(Collection::Opportunities, document_id)?
            .ok_or_else(|| WorkflowError::not_found("opportunity", document_id))?;
        Ok(document
            .data
            .get(APPLICATION_COUNT_FIELD)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Best-effort counter correction on a failure path; falls back to a full recount.
    fn adjust_counter(&self, document_id: &DocumentId, delta: i64) {
        if let Err(err) = self.store.atomic_increment(
            Collection::Opportunities,
            document_id,
            APPLICATION_COUNT_FIELD,
            delta,
        ) {
            warn!(opportunity_id = %document_id, error = %err, "counter correction failed, reconciling");
            self.recount_or_log(&OpportunityId(document_id.0.clone()));
        }
    }

    fn recount_or_log(&self, opportunity_id: &OpportunityId) {
        if let Err(err) = self.recount(opportunity_id) {
            error!(%opportunity_id, error = %err, "opportunity counter left inconsistent");
        }
    }

    fn discard(&self, application_id: &ApplicationId) {
        if let Err(err) = self
            .store
            .delete(Collection::Applications, &application_id.document_id())
        {
            error!(%application_id, error = %err, "could not roll back application write");
        }
    }
}

fn counter_key(opportunity_id: &OpportunityId) -> String {
    format!("opportunity:{opportunity_id}")
}

/// Per-key mutexes handed out on demand. A key's entry is dropped once nobody holds or waits
/// on it.
#[derive(Default)]
struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn slot(&self, key: String) -> KeyedSlot<'_> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(key.clone()).or_default().clone();
        KeyedSlot {
            locks: self,
            key,
            slot,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct KeyedSlot<'a> {
    locks: &'a KeyedLocks,
    key: String,
    slot: Arc<Mutex<()>>,
}

impl KeyedSlot<'_> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for KeyedSlot<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Handles are only cloned under the map lock, so two owners means the map and us.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
