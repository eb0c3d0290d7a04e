//! Checks that the policy obeys user-supplied neverallow rules: for every
//! configured neverallow, expand it the same way a real rule would be
//! expanded and check whether any permission it forbids is actually
//! granted anywhere in the mapped policy.

use std::collections::HashMap;

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::mapping::Mapper;
use crate::policy::SourcePolicy;
use crate::rules::{self, AvRule};

/// Expands every configured neverallow into `{rutc-without-rtype: AvRule}`,
/// mirroring `get_user_rules`'s substitution of the `neverallow` verb for
/// whatever the companion `allow` rule would look like.
fn expand_user_neverallows(policy: &SourcePolicy, neverallows: &[String]) -> HashMap<String, AvRule> {
    let mapper = Mapper::new(policy.attributes(), policy.types(), policy.classes());
    let mut supplied = HashMap::new();
    for raw in neverallows {
        let Ok(expanded) = mapper.expand_rule(raw) else {
            log::warn!("user_neverallows: could not expand neverallow \"{}\"", raw);
            continue;
        };
        for (rutc, full) in expanded {
            let Some(key) = rutc.strip_prefix("neverallow ").map(|s| s.to_string()) else {
                continue;
            };
            if let Ok(rules::Rule::Av(avrule)) = rules::rule_factory(&full.replacen("neverallow", "allow", 1)) {
                supplied.insert(key, avrule);
            }
        }
    }
    supplied
}

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    if cfg.neverallows.is_empty() {
        return Vec::new();
    }
    let user_rules = expand_user_neverallows(policy, &cfg.neverallows);
    let mut findings = Vec::new();

    for (rutc, rls) in &policy.mapping.rules {
        let Some(key) = rutc.strip_prefix("allow ").map(|s| s.to_string()) else {
            continue;
        };
        let Some(never) = user_rules.get(&key) else {
            continue;
        };
        let mut allowed_perms = std::collections::BTreeSet::new();
        for r in rls {
            if let Ok(rules::Rule::Av(avrule)) = rules::rule_factory(&r.rule) {
                allowed_perms.extend(avrule.permset);
            }
        }
        let forbidden: Vec<String> = allowed_perms
            .intersection(&never.permset)
            .cloned()
            .collect();
        if !forbidden.is_empty() {
            let mut finding = Finding::new(
                "user_neverallows",
                format!(
                    "rule \"{}\" grants neverallowed permissions: \"{}\"",
                    rutc,
                    forbidden.join(" ")
                ),
            );
            for r in rls {
                if let Some((file, line)) = crate::mapping::split_fileline(&r.fileline) {
                    finding = finding.with_origin(file.into(), line);
                }
            }
            findings.push(finding);
        }
    }
    findings
}
