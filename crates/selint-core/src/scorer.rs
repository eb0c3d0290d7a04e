//! Scorer (C9): assigns a risk or trust score to a rule based on
//! configured type buckets and, for AV rules, permission buckets.

use std::collections::{HashMap, HashSet};

use crate::rules::{AvRule, Rule, TeRule};

/// Which scoring system to apply. `Risk` scores are additive over
/// source/target type buckets plus a multiplicative permission-bucket
/// coefficient. `Trust*` variants invert the weighting for one or both
/// sides depending on whether that side's score should favor low or high
/// trust buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringSystem {
    Risk,
    TrustLowLow,
    TrustLowHigh,
    TrustHighLow,
    TrustHighHigh,
}

impl ScoringSystem {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "risk" => Some(ScoringSystem::Risk),
            "trust_ll" => Some(ScoringSystem::TrustLowLow),
            "trust_lh" => Some(ScoringSystem::TrustLowHigh),
            "trust_hl" => Some(ScoringSystem::TrustHighLow),
            "trust_hh" => Some(ScoringSystem::TrustHighHigh),
            _ => None,
        }
    }
}

/// Tuning knobs for the scorer, all keyed by an arbitrary bucket name
/// (e.g. `"untrusted_app"`, `"core"`).
#[derive(Debug, Clone, Default)]
pub struct ScorerConfig {
    pub system: Option<ScoringSystem>,
    /// bucket -> member type names
    pub types: HashMap<String, HashSet<String>>,
    /// bucket -> member permission names
    pub perms: HashMap<String, HashSet<String>>,
    /// bucket -> risk coefficient, used for risk scoring and as the
    /// permission-bucket multiplier
    pub score: HashMap<String, f64>,
    pub score_risk: HashMap<String, f64>,
    pub score_trust: HashMap<String, f64>,
    /// class names treated as "capability-like": for risk scoring, the
    /// target-type bucket lookup is replaced with a flat per-class score.
    pub capabilities: HashSet<String>,
    pub maximum_score: f64,
}

fn type_bucket_score(
    cfg: &ScorerConfig,
    type_name: &str,
    source_side: bool,
) -> f64 {
    for (bucket, members) in &cfg.types {
        if !members.contains(type_name) {
            continue;
        }
        return match cfg.system {
            Some(ScoringSystem::Risk) => *cfg.score_risk.get(bucket).unwrap_or(&0.0),
            Some(ScoringSystem::TrustLowLow) => {
                cfg.maximum_score / 2.0 - cfg.score_trust.get(bucket).copied().unwrap_or(0.0)
            }
            Some(ScoringSystem::TrustLowHigh) => {
                if source_side {
                    cfg.maximum_score / 2.0 - cfg.score_trust.get(bucket).copied().unwrap_or(0.0)
                } else {
                    cfg.score_trust.get(bucket).copied().unwrap_or(0.0)
                }
            }
            Some(ScoringSystem::TrustHighLow) => {
                if source_side {
                    cfg.score_trust.get(bucket).copied().unwrap_or(0.0)
                } else {
                    cfg.maximum_score / 2.0 - cfg.score_trust.get(bucket).copied().unwrap_or(0.0)
                }
            }
            Some(ScoringSystem::TrustHighHigh) => cfg.score_trust.get(bucket).copied().unwrap_or(0.0),
            None => 0.0,
        };
    }
    0.0
}

/// Scores a TE rule: source-type bucket plus default-type bucket (the
/// target type of a transition rule carries little meaning; the default
/// type is what matters).
pub fn score_terule(cfg: &ScorerConfig, rule: &TeRule) -> f64 {
    let mut score = type_bucket_score(cfg, &rule.source, true);
    score += type_bucket_score(cfg, &rule.deftype, false);
    if cfg.maximum_score > 0.0 {
        score / cfg.maximum_score
    } else {
        score
    }
}

/// Scores an AV rule: source-type bucket, target-type bucket (or a flat
/// capability score for capability classes under risk scoring), and, for
/// risk scoring only, a multiplicative permission-bucket coefficient.
pub fn score_avrule(cfg: &ScorerConfig, rule: &AvRule) -> f64 {
    let mut score = type_bucket_score(cfg, &rule.source, true);

    if cfg.system == Some(ScoringSystem::Risk) {
        if cfg.capabilities.contains(&rule.tclass) {
            score += cfg.score.get(&rule.tclass).copied().unwrap_or(0.0);
        } else {
            for (bucket, members) in &cfg.types {
                if members.contains(&rule.target) {
                    score += cfg.score_risk.get(bucket).copied().unwrap_or(0.0);
                    break;
                }
            }
        }
    } else {
        score += type_bucket_score(cfg, &rule.target, false);
    }

    if cfg.system == Some(ScoringSystem::Risk) {
        let mut perm_score = 0.0f64;
        for (bucket, members) in &cfg.perms {
            if rule.permset.iter().any(|p| members.contains(p)) {
                let s = cfg.score.get(bucket).copied().unwrap_or(0.0);
                if perm_score < s {
                    perm_score = s;
                }
            }
        }
        if perm_score > 0.0 {
            score *= perm_score;
        }
    }

    if cfg.maximum_score > 0.0 {
        score / cfg.maximum_score
    } else {
        score
    }
}

/// Scores any supported rule shape.
pub fn score_rule(cfg: &ScorerConfig, rule: &Rule) -> f64 {
    match rule {
        Rule::Av(r) => score_avrule(cfg, r),
        Rule::Te(r) => score_terule(cfg, r),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    fn cfg() -> ScorerConfig {
        let mut types = HashMap::new();
        types.insert(
            "untrusted".to_string(),
            HashSet::from(["untrusted_app".to_string()]),
        );
        types.insert("core".to_string(), HashSet::from(["init".to_string()]));
        let mut score_risk = HashMap::new();
        score_risk.insert("untrusted".to_string(), 8.0);
        score_risk.insert("core".to_string(), 1.0);
        let mut perms = HashMap::new();
        perms.insert("exec".to_string(), HashSet::from(["execute".to_string()]));
        let mut score = HashMap::new();
        score.insert("exec".to_string(), 2.0);
        ScorerConfig {
            system: Some(ScoringSystem::Risk),
            types,
            perms,
            score,
            score_risk,
            score_trust: HashMap::new(),
            capabilities: HashSet::new(),
            maximum_score: 20.0,
        }
    }

    #[test]
    fn risk_score_combines_source_target_and_perm_multiplier() {
        let c = cfg();
        let rule = AvRule {
            rtype: "allow".to_string(),
            source: "untrusted_app".to_string(),
            target: "init".to_string(),
            tclass: "file".to_string(),
            permset: BTreeSet::from(["execute".to_string()]),
        };
        // (8 + 1) * 2 / 20 = 0.9
        let score = score_avrule(&c, &rule);
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn capability_class_uses_flat_score() {
        let mut c = cfg();
        c.capabilities.insert("capability".to_string());
        c.score.insert("capability".to_string(), 5.0);
        let rule = AvRule {
            rtype: "allow".to_string(),
            source: "untrusted_app".to_string(),
            target: "self".to_string(),
            tclass: "capability".to_string(),
            permset: BTreeSet::from(["sys_admin".to_string()]),
        };
        // (8 + 5) / 20 = 0.65 (no perm bucket match here, so no multiplier)
        let score = score_avrule(&c, &rule);
        assert!((score - 0.65).abs() < 1e-9);
    }
}
