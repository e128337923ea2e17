use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::domain::{Actor, ApprovalState, Organization, OrganizationId, OrganizationKind};
use super::error::WorkflowError;
use super::lookup::{fetch, fetch_all, missing_as};
use super::store::records::{encode, patch, to_value};
use super::store::{Collection, EntityStore, Query, SortDirection};

/// Self-registration request from an institution or company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub kind: OrganizationKind,
    pub name: String,
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// Admin review of organizations, plus the visibility rule derived from it.
pub struct ApprovalWorkflow<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: EntityStore> ApprovalWorkflow<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates the organization awaiting review; it stays hidden until approved.
    pub fn register(&self, request: NewOrganization) -> Result<Organization, WorkflowError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "organization name must not be empty".to_string(),
            ));
        }
        if !request.contact_email.contains('@') {
            return Err(WorkflowError::InvalidInput(format!(
                "invalid contact email {}",
                request.contact_email
            )));
        }

        let now = self.clock.now();
        let mut organization = Organization {
            id: OrganizationId(String::new()),
            kind: request.kind,
            name: name.to_string(),
            contact_email: request.contact_email.trim().to_string(),
            contact_phone: request.contact_phone,
            approval: ApprovalState::Pending,
            active: true,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
        };
        let id = self
            .store
            .create(Collection::Organizations, encode(&organization)?)?;
        organization.id = id.into();
        info!(organization_id = %organization.id, name = %organization.name, "organization registered");
        Ok(organization)
    }

    pub fn approve(
        &self,
        organization_id: &OrganizationId,
        actor: &Actor,
    ) -> Result<Organization, WorkflowError> {
        self.review(organization_id, ApprovalState::Approved, actor)
    }

    pub fn reject(
        &self,
        organization_id: &OrganizationId,
        actor: &Actor,
    ) -> Result<Organization, WorkflowError> {
        self.review(organization_id, ApprovalState::Rejected, actor)
    }

    /// Suspends or reinstates an organization independently of its approval.
    pub fn set_active(
        &self,
        organization_id: &OrganizationId,
        active: bool,
        actor: &Actor,
    ) -> Result<Organization, WorkflowError> {
        require_admin(actor)?;
        let mut organization = self.organization(organization_id)?;

        let now = self.clock.now();
        let document_id = organization_id.document_id();
        self.store
            .update(
                Collection::Organizations,
                &document_id,
                patch([
                    ("active", to_value(&active)?),
                    ("updated_at", to_value(&now)?),
                ]),
            )
            .map_err(missing_as("organization", &document_id))?;

        organization.active = active;
        organization.updated_at = now;
        info!(%organization_id, active, actor = %actor.describe(), "organization activity changed");
        Ok(organization)
    }

    pub fn organization(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Organization, WorkflowError> {
        fetch(
            self.store.as_ref(),
            Collection::Organizations,
            &organization_id.document_id(),
            "organization",
        )
    }

    /// Registrations waiting for review, oldest first.
    pub fn pending(&self) -> Result<Vec<Organization>, WorkflowError> {
        fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Organizations)
                .filter("approval", ApprovalState::Pending.label())
                .order_by("created_at", SortDirection::Ascending),
        )
    }

    pub fn is_visible(&self, organization_id: &OrganizationId) -> Result<bool, WorkflowError> {
        Ok(self.organization(organization_id)?.is_visible())
    }

    fn review(
        &self,
        organization_id: &OrganizationId,
        decision: ApprovalState,
        actor: &Actor,
    ) -> Result<Organization, WorkflowError> {
        require_admin(actor)?;
        let mut organization = self.organization(organization_id)?;
        if organization.approval != ApprovalState::Pending {
            return Err(WorkflowError::InvalidTransition {
                track: "organization",
                from: organization.approval.label(),
                to: decision.label(),
            });
        }

        let now = self.clock.now();
        let document_id = organization_id.document_id();
        self.store
            .update(
                Collection::Organizations,
                &document_id,
                patch([
                    ("approval", to_value(&decision)?),
                    ("reviewed_at", to_value(&now)?),
                    ("updated_at", to_value(&now)?),
                ]),
            )
            .map_err(missing_as("organization", &document_id))?;

        organization.approval = decision;
        organization.reviewed_at = Some(now);
        organization.updated_at = now;
        info!(
            %organization_id,
            decision = decision.label(),
            actor = %actor.describe(),
            "organization reviewed"
        );
        Ok(organization)
    }
}

fn require_admin(actor: &Actor) -> Result<(), WorkflowError> {
    match actor {
        Actor::Admin => Ok(()),
        other => Err(WorkflowError::Forbidden(format!(
            "{} cannot review organizations",
            other.describe()
        ))),
    }
}
