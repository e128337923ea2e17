use serde::{Deserialize, Serialize};

/// Points available per scoring component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    /// Awarded in full when every required skill is present.
    pub skills: f64,
    /// Awarded in full for an academic performance of 100.
    pub academic: f64,
    pub points_per_certificate: u32,
    pub certificate_cap: u32,
    pub points_per_experience_year: u32,
    pub experience_cap: u32,
}

pub const DEFAULT_WEIGHTS: MatchWeights = MatchWeights {
    skills: 40.0,
    academic: 30.0,
    points_per_certificate: 3,
    certificate_cap: 15,
    points_per_experience_year: 5,
    experience_cap: 15,
};

impl Default for MatchWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

impl MatchWeights {
    /// Highest score reachable before clamping.
    pub fn ceiling(&self) -> f64 {
        self.skills
            + self.academic
            + f64::from(self.certificate_cap)
            + f64::from(self.experience_cap)
    }
}
