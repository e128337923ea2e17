use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::domain::{Actor, Candidate, CandidateId, EducationLevel};
use super::error::WorkflowError;
use super::lookup::fetch;
use super::store::records::encode;
use super::store::{Collection, EntityStore};

/// Full profile as edited by the student; every save replaces the stored profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInput {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub education_level: Option<EducationLevel>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub certificate_count: u32,
    #[serde(default)]
    pub experience_years: u32,
    #[serde(default)]
    pub academic_performance: Option<u8>,
}

pub struct CandidateDirectory<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: EntityStore> CandidateDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates the candidate on first save, keyed by the identity-provider id.
    pub fn save_profile(
        &self,
        candidate_id: &CandidateId,
        input: ProfileInput,
        actor: &Actor,
    ) -> Result<Candidate, WorkflowError> {
        let allowed = match actor {
            Actor::Candidate(id) => id == candidate_id,
            Actor::Admin => true,
            Actor::Staff(_) => false,
        };
        if !allowed {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot edit the profile of {candidate_id}",
                actor.describe()
            )));
        }
        if let Some(score) = input.academic_performance {
            if score > 100 {
                return Err(WorkflowError::InvalidInput(format!(
                    "academic performance {score} is outside 0..=100"
                )));
            }
        }
        if input.display_name.trim().is_empty() {
            return Err(WorkflowError::InvalidInput(
                "display name must not be empty".to_string(),
            ));
        }

        let candidate = Candidate {
            id: candidate_id.clone(),
            email: input.email.trim().to_string(),
            display_name: input.display_name.trim().to_string(),
            education_level: input.education_level,
            skills: input
                .skills
                .iter()
                .map(|skill| skill.trim().to_string())
                .filter(|skill| !skill.is_empty())
                .collect(),
            certificate_count: input.certificate_count,
            experience_years: input.experience_years,
            academic_performance: input.academic_performance,
            updated_at: self.clock.now(),
        };
        self.store.put(
            Collection::Candidates,
            &candidate_id.document_id(),
            encode(&candidate)?,
        )?;
        info!(%candidate_id, skills = candidate.skills.len(), "candidate profile saved");
        Ok(candidate)
    }

    pub fn profile(&self, candidate_id: &CandidateId) -> Result<Candidate, WorkflowError> {
        fetch(
            self.store.as_ref(),
            Collection::Candidates,
            &candidate_id.document_id(),
            "candidate",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::store::InMemoryStore;

    fn input(skills: &[&str]) -> ProfileInput {
        ProfileInput {
            email: "amara@student.example".to_string(),
            display_name: "Amara Okafor".to_string(),
            education_level: Some(EducationLevel::Diploma),
            skills: skills.iter().map(|skill| skill.to_string()).collect(),
            certificate_count: 1,
            experience_years: 0,
            academic_performance: Some(78),
        }
    }

    #[test]
    fn first_save_creates_and_later_saves_replace() {
        let directory = CandidateDirectory::new(Arc::new(InMemoryStore::new()));
        let id = CandidateId::from("uid-amara");
        let actor = Actor::Candidate(id.clone());

        directory
            .save_profile(&id, input(&["Python"]), &actor)
            .expect("creates");
        directory
            .save_profile(&id, input(&[" SQL ", "Python", ""]), &actor)
            .expect("replaces");

        let stored = directory.profile(&id).expect("reads");
        let skills: Vec<_> = stored.skills.iter().map(String::as_str).collect();
        assert_eq!(skills, vec!["Python", "SQL"]);
    }

    #[test]
    fn other_candidates_cannot_edit() {
        let directory = CandidateDirectory::new(Arc::new(InMemoryStore::new()));
        let id = CandidateId::from("uid-amara");
        let intruder = Actor::Candidate(CandidateId::from("uid-bo"));
        assert!(matches!(
            directory.save_profile(&id, input(&[]), &intruder),
            Err(WorkflowError::Forbidden(_))
        ));
    }

    #[test]
    fn academic_performance_is_a_percentage() {
        let directory = CandidateDirectory::new(Arc::new(InMemoryStore::new()));
        let id = CandidateId::from("uid-amara");
        let mut profile = input(&[]);
        profile.academic_performance = Some(130);
        assert!(matches!(
            directory.save_profile(&id, profile, &Actor::Admin),
            Err(WorkflowError::InvalidInput(_))
        ));
    }

    #[test]
    fn missing_profile_is_not_found() {
        let directory = CandidateDirectory::new(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            directory.profile(&CandidateId::from("uid-ghost")),
            Err(WorkflowError::NotFound { entity: "candidate", .. })
        ));
    }
}
