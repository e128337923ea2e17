use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::domain::{
    Actor, Opportunity, OpportunityId, OpportunityStatus, OpportunityTerms, Organization,
    OrganizationId, OrganizationKind, Track,
};
use super::error::WorkflowError;
use super::lookup::{fetch, fetch_all, missing_as};
use super::store::records::{decode, encode, patch, to_value};
use super::store::{Collection, EntityStore, Query, SortDirection};

/// Posting request from organization staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub organization_id: OrganizationId,
    pub title: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    pub terms: OpportunityTerms,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Courses and job postings, with the candidate-facing visibility filter.
pub struct OpportunityCatalog<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: EntityStore> OpportunityCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn publish_opportunity(
        &self,
        actor: &Actor,
        request: NewOpportunity,
    ) -> Result<Opportunity, WorkflowError> {
        if !actor.manages(&request.organization_id) {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot post for {}",
                actor.describe(),
                request.organization_id
            )));
        }
        let organization: Organization = fetch(
            self.store.as_ref(),
            Collection::Organizations,
            &request.organization_id.document_id(),
            "organization",
        )?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(WorkflowError::InvalidInput("title must not be empty".to_string()));
        }
        let terms = match (request.terms, organization.kind) {
            (
                OpportunityTerms::Course {
                    capacity,
                    prerequisites,
                    intake_period,
                },
                OrganizationKind::Institution,
            ) => {
                if capacity < 1 {
                    return Err(WorkflowError::InvalidInput(
                        "course capacity must be at least 1".to_string(),
                    ));
                }
                // Admissions are published and looked up by the trimmed label.
                let intake_period = intake_period.trim();
                if intake_period.is_empty() {
                    return Err(WorkflowError::InvalidInput(
                        "course intake period must not be empty".to_string(),
                    ));
                }
                OpportunityTerms::Course {
                    capacity,
                    prerequisites,
                    intake_period: intake_period.to_string(),
                }
            }
            (terms @ OpportunityTerms::Job { .. }, OrganizationKind::Company) => terms,
            (terms, kind) => {
                let track = match terms {
                    OpportunityTerms::Course { .. } => Track::Course,
                    OpportunityTerms::Job { .. } => Track::Job,
                };
                return Err(WorkflowError::InvalidInput(format!(
                    "a {kind:?} cannot post a {} opportunity",
                    track.label()
                )));
            }
        };

        let mut opportunity = Opportunity {
            id: OpportunityId(String::new()),
            organization_id: request.organization_id,
            title: title.to_string(),
            required_skills: request
                .required_skills
                .iter()
                .map(|skill| skill.trim().to_string())
                .filter(|skill| !skill.is_empty())
                .collect(),
            terms,
            application_count: 0,
            status: OpportunityStatus::Active,
            deadline: request.deadline,
            created_at: self.clock.now(),
        };
        let id = self
            .store
            .create(Collection::Opportunities, encode(&opportunity)?)?;
        opportunity.id = id.into();
        info!(
            opportunity_id = %opportunity.id,
            organization_id = %opportunity.organization_id,
            track = opportunity.track().label(),
            "opportunity published"
        );
        Ok(opportunity)
    }

    /// Soft delete: the opportunity stops accepting applications but keeps its history.
    pub fn close_opportunity(
        &self,
        opportunity_id: &OpportunityId,
        actor: &Actor,
    ) -> Result<Opportunity, WorkflowError> {
        let mut opportunity = self.opportunity(opportunity_id)?;
        if !actor.manages(&opportunity.organization_id) {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot close {opportunity_id}",
                actor.describe()
            )));
        }
        if opportunity.status == OpportunityStatus::Closed {
            return Ok(opportunity);
        }

        let document_id = opportunity_id.document_id();
        self.store
            .update(
                Collection::Opportunities,
                &document_id,
                patch([("status", to_value(&OpportunityStatus::Closed)?)]),
            )
            .map_err(missing_as("opportunity", &document_id))?;
        opportunity.status = OpportunityStatus::Closed;
        info!(%opportunity_id, "opportunity closed");
        Ok(opportunity)
    }

    /// Candidate listing: active opportunities of approved, active organizations, newest first.
    pub fn list_visible(&self, track: Option<Track>) -> Result<Vec<Opportunity>, WorkflowError> {
        let organizations: Vec<Organization> =
            fetch_all(self.store.as_ref(), &Query::new(Collection::Organizations))?;
        let visibility: HashMap<OrganizationId, bool> = organizations
            .into_iter()
            .map(|organization| {
                let visible = organization.is_visible();
                (organization.id, visible)
            })
            .collect();

        let opportunities: Vec<Opportunity> = fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Opportunities)
                .filter("status", "active")
                .order_by("created_at", SortDirection::Descending),
        )?;
        Ok(opportunities
            .into_iter()
            .filter(|opportunity| track.map_or(true, |track| opportunity.track() == track))
            .filter(|opportunity| {
                visibility
                    .get(&opportunity.organization_id)
                    .copied()
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Candidate detail view; hidden or closed opportunities read as absent.
    pub fn visible_by_id(
        &self,
        opportunity_id: &OpportunityId,
    ) -> Result<Opportunity, WorkflowError> {
        let opportunity = self.opportunity(opportunity_id)?;
        let organization: Option<Organization> = self
            .store
            .get(
                Collection::Organizations,
                &opportunity.organization_id.document_id(),
            )?
            .map(decode)
            .transpose()?;
        let visible = organization.map_or(false, |organization| organization.is_visible());
        if !visible || opportunity.status != OpportunityStatus::Active {
            return Err(WorkflowError::not_found("opportunity", opportunity_id));
        }
        Ok(opportunity)
    }

    /// Staff view of everything the organization posted, including closed postings.
    pub fn opportunities_for_organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<Opportunity>, WorkflowError> {
        fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Opportunities)
                .filter("organization_id", organization_id.as_str())
                .order_by("created_at", SortDirection::Descending),
        )
    }

    pub fn opportunity(
        &self,
        opportunity_id: &OpportunityId,
    ) -> Result<Opportunity, WorkflowError> {
        fetch(
            self.store.as_ref(),
            Collection::Opportunities,
            &opportunity_id.document_id(),
            "opportunity",
        )
    }
}
