//! Suggests replacing open-coded permission sets with `global_macros`
//! permission-set macros, fitting each rule's permission set against the
//! catalog of macros defined in the `global_macros` file.

use std::collections::BTreeSet;

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::macro_usage::group_by_macro;
use crate::policy::SourcePolicy;
use crate::set_fitter::SetFitter;

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    let catalog = policy.macro_catalog();
    let mut macroset: Vec<(String, BTreeSet<String>)> = Vec::new();
    for m in catalog.iter() {
        if m.file_defined().file_name().and_then(|n| n.to_str()) != Some("global_macros") {
            continue;
        }
        let Some(expansion) = m.expand(None) else {
            continue;
        };
        let values: BTreeSet<String> = expansion
            .split_whitespace()
            .filter(|s| *s != "{" && *s != "}")
            .map(|s| s.to_string())
            .collect();
        macroset.push((m.name().to_string(), values));
    }
    if macroset.is_empty() {
        return Vec::new();
    }
    let fitter = SetFitter::new(macroset);

    let usages_by_macro = group_by_macro(&policy.macro_usages);
    let base_dir = policy.base_dir();
    let mut findings = Vec::new();

    for (rutc, rls) in &policy.mapping.rules {
        if !cfg.supported_rule_types.is_empty()
            && !cfg.supported_rule_types.iter().any(|t| rutc.starts_with(t.as_str()))
        {
            continue;
        }
        let mut permset: BTreeSet<String> = BTreeSet::new();
        let mut filtered_rules = Vec::new();
        for r in rls {
            if super::is_ignored(r, &cfg.rule_ignore_paths, base_dir) {
                continue;
            }
            let perms = r.rule.trim_start_matches(rutc.as_str()).trim_matches(|c| c == ' ' || c == '{' || c == '}' || c == ';');
            permset.extend(perms.split_whitespace().map(|s| s.to_string()));
            filtered_rules.push(r);
        }
        if filtered_rules.is_empty() || permset.is_empty() {
            continue;
        }

        // Skip if any of this rule's lines already use a non-global_macros macro.
        let mut already_macro_covered = false;
        for r in &filtered_rules {
            if let Some(usages) = usages_by_macro.values().flatten().find(|u| {
                format!("{}:{}", u.file_used.display(), u.line_used) == r.fileline
            }) {
                let is_global = catalog
                    .get(&usages.macro_name)
                    .map(|m| m.file_defined().file_name().and_then(|n| n.to_str()) == Some("global_macros"))
                    .unwrap_or(false);
                if !is_global {
                    already_macro_covered = true;
                    break;
                }
            }
        }
        if already_macro_covered {
            continue;
        }

        let fit = fitter.fit(&permset);
        if !fit.winner.is_empty() {
            let names: Vec<&str> = fit
                .winner
                .iter()
                .map(|rs| rs.name.as_str())
                .filter(|n| !cfg.usages_ignore.iter().any(|u| u == n))
                .collect();
            if !names.is_empty() {
                let mut covered: BTreeSet<String> = BTreeSet::new();
                for rs in &fit.winner {
                    covered.extend(rs.values.iter().cloned());
                }
                let extra: Vec<&String> = permset.difference(&covered).collect();
                let usage = if names.len() == 1 && extra.is_empty() {
                    format!("{} {};", rutc, names[0])
                } else {
                    let mut body = names.join(" ");
                    if !extra.is_empty() {
                        body.push(' ');
                        body.push_str(&extra.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" "));
                    }
                    format!("{} {{ {} }};", rutc, body)
                };
                let mut finding = Finding::new(
                    "global_macros",
                    format!("rule \"{}\" could use macro(s): {}", rutc, names.join(", ")),
                )
                .with_suggestion(usage);
                for r in &filtered_rules {
                    if let Some((file, line)) = crate::mapping::split_fileline(&r.fileline) {
                        finding = finding.with_origin(file.into(), line);
                    }
                }
                findings.push(finding);
            }
        } else {
            let threshold = cfg.suggestion_threshold.unwrap_or(0.8);
            let max_no = cfg.suggestion_max_no.unwrap_or(3);
            let mut partial: Vec<_> = fit
                .partial
                .into_iter()
                .filter(|rs| rs.score >= threshold && !cfg.usages_ignore.iter().any(|u| u == &rs.name))
                .collect();
            partial.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            partial.truncate(max_no);
            if !partial.is_empty() {
                let summary = partial
                    .iter()
                    .map(|rs| format!("{}: {:.0}%", rs.name, rs.score * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut finding = Finding::new(
                    "global_macros",
                    format!("rule \"{}\" partially matches macro(s): {}", rutc, summary),
                );
                for r in &filtered_rules {
                    if let Some((file, line)) = crate::mapping::split_fileline(&r.fileline) {
                        finding = finding.with_origin(file.into(), line);
                    }
                }
                findings.push(finding);
            }
        }
    }
    findings
}
