use std::collections::BTreeSet;

use super::config::MatchWeights;
use super::{MatchFactor, ScoreComponent};
use crate::workflows::domain::{Candidate, Opportunity};

pub(crate) struct ScoreSignals {
    pub meets_minimum_education: Option<bool>,
}

pub(crate) fn score_pair(
    candidate: &Candidate,
    opportunity: &Opportunity,
    weights: &MatchWeights,
) -> (Vec<ScoreComponent>, f64, ScoreSignals) {
    let mut components = Vec::with_capacity(5);

    let required = normalize(&opportunity.required_skills);
    let held = normalize(&candidate.skills);
    let matched = required.intersection(&held).count();
    let skill_points = if required.is_empty() {
        0.0
    } else {
        matched as f64 / required.len() as f64 * weights.skills
    };
    components.push(ScoreComponent {
        factor: MatchFactor::SkillOverlap,
        points: skill_points,
        notes: if required.is_empty() {
            "no required skills listed".to_string()
        } else {
            format!("{matched} of {} required skills", required.len())
        },
    });

    let academic_points = candidate
        .academic_performance
        .map(|score| f64::from(score.min(100)) / 100.0 * weights.academic)
        .unwrap_or(0.0);
    components.push(ScoreComponent {
        factor: MatchFactor::AcademicPerformance,
        points: academic_points,
        notes: match candidate.academic_performance {
            Some(score) => format!("academic performance {score}/100"),
            None => "no academic results recorded".to_string(),
        },
    });

    let certificate_points = capped(
        candidate.certificate_count,
        weights.points_per_certificate,
        weights.certificate_cap,
    );
    components.push(ScoreComponent {
        factor: MatchFactor::Certificates,
        points: certificate_points,
        notes: format!("{} certificates", candidate.certificate_count),
    });

    let experience_points = capped(
        candidate.experience_years,
        weights.points_per_experience_year,
        weights.experience_cap,
    );
    components.push(ScoreComponent {
        factor: MatchFactor::Experience,
        points: experience_points,
        notes: format!("{} years of experience", candidate.experience_years),
    });

    // Reported for jobs only; never adds points.
    let meets_minimum_education = opportunity.minimum_education().map(|minimum| {
        let meets = candidate
            .education_level
            .map_or(false, |level| level >= minimum);
        components.push(ScoreComponent {
            factor: MatchFactor::EducationGate,
            points: 0.0,
            notes: match (meets, candidate.education_level) {
                (true, Some(level)) => {
                    format!("{} meets minimum {}", level.label(), minimum.label())
                }
                (false, Some(level)) => {
                    format!("{} below minimum {}", level.label(), minimum.label())
                }
                (_, None) => format!("education level unknown, minimum {}", minimum.label()),
            },
        });
        meets
    });

    let total = skill_points + academic_points + certificate_points + experience_points;
    (
        components,
        total,
        ScoreSignals {
            meets_minimum_education,
        },
    )
}

fn normalize(skills: &BTreeSet<String>) -> BTreeSet<String> {
    skills
        .iter()
        .map(|skill| skill.trim().to_lowercase())
        .filter(|skill| !skill.is_empty())
        .collect()
}

fn capped(count: u32, per_unit: u32, cap: u32) -> f64 {
    f64::from(count.saturating_mul(per_unit).min(cap))
}
