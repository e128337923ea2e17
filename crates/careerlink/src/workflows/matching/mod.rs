//! Deterministic candidate/opportunity scoring and applicant ranking.

mod config;
mod ranking;
mod rules;

pub use config::{MatchWeights, DEFAULT_WEIGHTS};
pub use ranking::{rank, RankedApplicant, RankingService};

use serde::{Deserialize, Serialize};

use super::domain::{Candidate, Opportunity};

/// Stateless scorer applying one weighted formula to every opportunity type.
#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    weights: MatchWeights,
}

impl MatchEngine {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    pub fn score(&self, candidate: &Candidate, opportunity: &Opportunity) -> MatchScore {
        let (components, raw, signals) = rules::score_pair(candidate, opportunity, &self.weights);
        MatchScore {
            total: raw.round().clamp(0.0, 100.0) as u8,
            components,
            meets_minimum_education: signals.meets_minimum_education,
        }
    }
}

/// Score with the default weights.
pub fn score(candidate: &Candidate, opportunity: &Opportunity) -> u8 {
    MatchEngine::default().score(candidate, opportunity).total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFactor {
    SkillOverlap,
    AcademicPerformance,
    Certificates,
    Experience,
    EducationGate,
}

/// Discrete contribution to a match score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: MatchFactor,
    pub points: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Rounded sum of the components, clamped to `0..=100`.
    pub total: u8,
    pub components: Vec<ScoreComponent>,
    /// `Some` for job postings only.
    pub meets_minimum_education: Option<bool>,
}

impl MatchScore {
    pub fn component(&self, factor: MatchFactor) -> Option<&ScoreComponent> {
        self.components
            .iter()
            .find(|component| component.factor == factor)
    }
}
