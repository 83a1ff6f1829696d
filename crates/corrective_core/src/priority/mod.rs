use serde::{Deserialize, Serialize};

use crate::domain::{AssetCriticality, Priority};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityInput {
    pub asset_criticality: Option<AssetCriticality>,
    pub caused_downtime: bool,
    pub is_safety_related: bool,
    pub is_intermittent: bool,
    /// An observation is a condition noticed during other work, not an active
    /// failure report.
    pub is_observation: bool,
}

/// Per-factor contributions to the weighted score, for explainability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityFactors {
    pub criticality: u8,
    pub downtime: u8,
    pub safety: u8,
    pub residual: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityAssessment {
    pub priority: Priority,
    pub score: u8,
    pub factors: PriorityFactors,
    pub reasons: Vec<String>,
}

fn criticality_points(criticality: Option<AssetCriticality>) -> u8 {
    match criticality {
        Some(AssetCriticality::Critical) => 40,
        Some(AssetCriticality::High) => 30,
        Some(AssetCriticality::Medium) => 20,
        Some(AssetCriticality::Low) => 10,
        None => 15,
    }
}

fn band(score: u8) -> Priority {
    match score {
        60.. => Priority::P1,
        40..=59 => Priority::P2,
        20..=39 => Priority::P3,
        _ => Priority::P4,
    }
}

fn fallback_reason(priority: Priority) -> &'static str {
    match priority {
        Priority::P1 => "Requires immediate attention",
        Priority::P2 => "High priority intervention",
        Priority::P3 => "Schedule within the maintenance plan",
        Priority::P4 => "Low priority, plan at convenience",
    }
}

/// Weighted-scoring priority assessment.
///
/// Score out of 100: criticality up to 40, downtime 30, safety 25, residual
/// 5/3/0 for normal/intermittent/observation reports. Bands at 60/40/20.
/// Two overrides run after banding: safety forces P1 unconditionally, and an
/// observation can never be the most urgent tier, so a computed P1 drops to
/// P2. Deterministic, no side effects.
pub fn calculate_priority(input: &PriorityInput) -> PriorityAssessment {
    let factors = PriorityFactors {
        criticality: criticality_points(input.asset_criticality),
        downtime: if input.caused_downtime { 30 } else { 0 },
        safety: if input.is_safety_related { 25 } else { 0 },
        residual: if input.is_observation {
            0
        } else if input.is_intermittent {
            3
        } else {
            5
        },
    };
    let score = factors.criticality + factors.downtime + factors.safety + factors.residual;

    let mut priority = band(score);
    if input.is_safety_related {
        priority = Priority::P1;
    } else if input.is_observation && priority == Priority::P1 {
        priority = Priority::P2;
    }

    let mut reasons = Vec::new();
    if input.is_safety_related {
        reasons.push("Safety risk detected".to_string());
    }
    if input.caused_downtime {
        reasons.push("Caused production stoppage".to_string());
    }
    match input.asset_criticality {
        Some(AssetCriticality::Critical) => reasons.push("Critical asset".to_string()),
        Some(AssetCriticality::High) => reasons.push("High criticality asset".to_string()),
        _ => {}
    }
    if input.is_intermittent {
        reasons.push("Intermittent failure".to_string());
    }
    if reasons.is_empty() {
        reasons.push(fallback_reason(priority).to_string());
    }

    PriorityAssessment {
        priority,
        score,
        factors,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PriorityInput {
        PriorityInput {
            asset_criticality: None,
            caused_downtime: false,
            is_safety_related: false,
            is_intermittent: false,
            is_observation: false,
        }
    }

    #[test]
    fn safety_always_forces_p1() {
        let assessment = calculate_priority(&PriorityInput {
            asset_criticality: Some(AssetCriticality::Low),
            is_safety_related: true,
            is_observation: true,
            ..input()
        });
        assert_eq!(assessment.priority, Priority::P1);
        assert!(assessment.reasons.contains(&"Safety risk detected".to_string()));
    }

    #[test]
    fn observation_never_reaches_p1() {
        let assessment = calculate_priority(&PriorityInput {
            asset_criticality: Some(AssetCriticality::Critical),
            caused_downtime: true,
            is_observation: true,
            ..input()
        });
        assert!(assessment.score >= 60);
        assert_eq!(assessment.priority, Priority::P2);
    }

    #[test]
    fn bands_follow_score() {
        // Unset criticality, nothing else: 15 + 5 residual = 20 -> P3.
        let p3 = calculate_priority(&input());
        assert_eq!((p3.score, p3.priority), (20, Priority::P3));

        // Low criticality intermittent: 10 + 3 = 13 -> P4.
        let p4 = calculate_priority(&PriorityInput {
            asset_criticality: Some(AssetCriticality::Low),
            is_intermittent: true,
            ..input()
        });
        assert_eq!((p4.score, p4.priority), (13, Priority::P4));

        // Critical asset with downtime: 40 + 30 + 5 = 75 -> P1.
        let p1 = calculate_priority(&PriorityInput {
            asset_criticality: Some(AssetCriticality::Critical),
            caused_downtime: true,
            ..input()
        });
        assert_eq!((p1.score, p1.priority), (75, Priority::P1));
    }

    #[test]
    fn fallback_reason_when_no_factor_fires() {
        let assessment = calculate_priority(&PriorityInput {
            asset_criticality: Some(AssetCriticality::Low),
            ..input()
        });
        assert_eq!(assessment.reasons, vec!["Low priority, plan at convenience".to_string()]);
    }
}
