//! Assigns a risk or trust score to every supported rule and reports the
//! ones above a configured threshold.

use std::collections::{HashMap, HashSet};

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::policy::SourcePolicy;
use crate::rules;
use crate::scorer::{score_rule, ScorerConfig, ScoringSystem};

fn build_scorer_config(cfg: &PluginConfig) -> Option<ScorerConfig> {
    let system = ScoringSystem::parse(cfg.scoring_system.as_deref()?)?;
    let types = cfg
        .types
        .iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<HashSet<_>>()))
        .collect();
    let perms = cfg
        .perms
        .iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<HashSet<_>>()))
        .collect();
    Some(ScorerConfig {
        system: Some(system),
        types,
        perms,
        score: cfg.score.clone(),
        score_risk: cfg.score_risk.clone(),
        score_trust: cfg.score_trust.clone(),
        capabilities: HashSet::from(["capability".to_string(), "capability2".to_string()]),
        maximum_score: cfg.maximum_score.unwrap_or(1.0),
    })
}

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    let Some(scorer_cfg) = build_scorer_config(cfg) else {
        log::warn!("risky_rules: no usable scoring_system configured, skipping");
        return Vec::new();
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
                let mut finding = Finding::new(
                    "risky_rules",
                    format!("{:.2}: {}", score, r.rule),
                );
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_scoring_system_yields_no_findings() {
        let cfg = PluginConfig::default();
        assert!(build_scorer_config(&cfg).is_none());
    }

    #[test]
    fn builds_scorer_config_from_plugin_config() {
        let mut cfg = PluginConfig::default();
        cfg.scoring_system = Some("risk".to_string());
        cfg.maximum_score = Some(20.0);
        cfg.types.insert("untrusted".to_string(), vec!["untrusted_app".to_string()]);
        let scorer_cfg = build_scorer_config(&cfg).unwrap();
        assert_eq!(scorer_cfg.system, Some(ScoringSystem::Risk));
        assert!(scorer_cfg.types.get("untrusted").unwrap().contains("untrusted_app"));
    }
}
