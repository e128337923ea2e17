use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MatchEngine, MatchScore};
use crate::workflows::domain::{Actor, Application, Candidate, Opportunity, OpportunityId};
use crate::workflows::error::WorkflowError;
use crate::workflows::lookup::{fetch, fetch_all};
use crate::workflows::store::records::decode;
use crate::workflows::store::{Collection, EntityStore, Query, SortDirection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedApplicant {
    pub application: Application,
    pub score: MatchScore,
}

/// Orders by score descending, then earlier submission, then application id.
pub fn rank(mut applicants: Vec<RankedApplicant>) -> Vec<RankedApplicant> {
    applicants.sort_by(|left, right| {
        right
            .score
            .total
            .cmp(&left.score.total)
            .then_with(|| {
                left.application
                    .submitted_at
                    .cmp(&right.application.submitted_at)
            })
            .then_with(|| left.application.id.cmp(&right.application.id))
    });
    applicants
}

pub struct RankingService<S> {
    store: Arc<S>,
    engine: MatchEngine,
}

impl<S: EntityStore> RankingService<S> {
    pub fn new(store: Arc<S>, engine: MatchEngine) -> Self {
        Self { store, engine }
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Scores every stored application of an opportunity against its candidate's profile.
    pub fn rank_applicants(
        &self,
        opportunity_id: &OpportunityId,
        actor: &Actor,
    ) -> Result<Vec<RankedApplicant>, WorkflowError> {
        let opportunity: Opportunity = fetch(
            self.store.as_ref(),
            Collection::Opportunities,
            &opportunity_id.document_id(),
            "opportunity",
        )?;
        if !actor.manages(&opportunity.organization_id) {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot rank applicants of {opportunity_id}",
                actor.describe()
            )));
        }

        let applications: Vec<Application> = fetch_all(
            self.store.as_ref(),
            &Query::new(Collection::Applications)
                .filter("opportunity_id", opportunity_id.as_str())
                .order_by("submitted_at", SortDirection::Ascending),
        )?;

        let mut ranked = Vec::with_capacity(applications.len());
        for application in applications {
            let candidate = match self
                .store
                .get(Collection::Candidates, &application.candidate_id.document_id())?
            {
                Some(document) => decode::<Candidate>(document)?,
                None => {
                    debug!(candidate_id = %application.candidate_id, "profile missing, scoring as blank");
                    blank_profile(&application)
                }
            };
            let score = self.engine.score(&candidate, &opportunity);
            ranked.push(RankedApplicant { application, score });
        }
        Ok(rank(ranked))
    }
}

fn blank_profile(application: &Application) -> Candidate {
    Candidate {
        id: application.candidate_id.clone(),
        email: application.candidate_email.clone(),
        display_name: application.candidate_name.clone(),
        education_level: None,
        skills: Default::default(),
        certificate_count: 0,
        experience_years: 0,
        academic_performance: None,
        updated_at: application.submitted_at,
    }
}
