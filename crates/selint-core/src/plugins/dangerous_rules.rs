//! Flags rules whose source/target/permission combination crosses a
//! configured risk threshold. A simpler, fixed-scoring-system sibling of
//! `risky_rules`: always risk-mode, no trust variants.

use std::collections::HashSet;

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::policy::SourcePolicy;
use crate::rules;
use crate::scorer::{score_rule, ScorerConfig, ScoringSystem};

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    let types = cfg
        .types
        .iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<HashSet<_>>()))
        .collect();
    let scorer_cfg = ScorerConfig {
        system: Some(ScoringSystem::Risk),
        types,
        perms: cfg
            .perms
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<HashSet<_>>()))
            .collect(),
        score: cfg.score.clone(),
        score_risk: cfg.score.clone(),
        score_trust: Default::default(),
        capabilities: HashSet::from(["capability".to_string(), "capability2".to_string()]),
        maximum_score: cfg.maximum_score.unwrap_or(1.0),
    };
    let threshold = cfg.score_threshold.unwrap_or(0.0);
    let base_dir = policy.base_dir();

    let mut findings = Vec::new();
    for rls in policy.mapping.rules.values() {
        for r in rls {
            if super::is_ignored(r, &cfg.rule_ignore_paths, base_dir)
                || (!cfg.supported_rule_types.is_empty()
                    && !cfg.supported_rule_types.iter().any(|t| r.rule.starts_with(t.as_str())))
                || cfg.ignored_rules.iter().any(|ig| ig == &r.rule)
            {
                continue;
            }
            let Ok(parsed) = rules::rule_factory(&r.rule) else {
                continue;
            };
            let score = score_rule(&scorer_cfg, &parsed);
            if score >= threshold {
                let mut finding = Finding::new("dangerous_rules", format!("{:.2}: {}", score, r.rule));
                if let Some((file, line)) = crate::mapping::split_fileline(&r.fileline) {
                    finding = finding.with_origin(file.into(), line);
                }
                findings.push(finding);
            }
        }
    }
    if cfg.reverse_sort {
        findings.sort_by(|a, b| b.message.cmp(&a.message));
    } else {
        findings.sort_by(|a, b| a.message.cmp(&b.message));
    }
    findings
}
