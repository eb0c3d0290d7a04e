//! Three checks for rules and rule groups that likely need attention:
//! missing companion rules from a configured tuple, rules that mention a
//! debug type, and rules granting some "interesting" permission without
//! the companion permissions the config says should come with it.

use std::collections::BTreeSet;

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::macro_matcher::ArgExtractor;
use crate::mapping::Mapper;
use crate::policy::SourcePolicy;
use crate::rules;

/// Replaces every `@@ARGn@@` placeholder with the matching value from
/// `args`, keyed as `argN`.
fn substitute_args(rule: &str, args: &std::collections::HashMap<String, String>) -> String {
    let mut out = rule.to_string();
    for (k, v) in args {
        out = out.replace(&format!("@@{}@@", k.to_uppercase()), v);
    }
    out
}

fn has_placeholder(rule: &str) -> bool {
    rule.contains("@@ARG")
}

/// Sums the permissions granted across every `MappedRule` sharing `rutc`.
fn accumulate_perms(rutc: &str, rules: &[crate::mapping::MappedRule]) -> BTreeSet<String> {
    let mut perms = BTreeSet::new();
    for r in rules {
        let tail = r.rule.trim_start_matches(rutc).trim_matches(|c| c == ' ' || c == '{' || c == '}' || c == ';');
        perms.extend(tail.split_whitespace().map(|s| s.to_string()));
    }
    perms
}

fn check_tuples(policy: &SourcePolicy, cfg: &PluginConfig, findings: &mut Vec<Finding>) {
    let mapper = Mapper::new(policy.attributes(), policy.types(), policy.classes());
    for tuple in &cfg.rules_tuples {
        if tuple.len() < 2 {
            continue;
        }
        let first = &tuple[0];
        if !rules::ONLY_MAP_RULES.iter().any(|r| first.starts_with(r)) {
            continue;
        }

        let matches: Vec<(String, std::collections::HashMap<String, String>)> = if has_placeholder(first) {
            let extractor = ArgExtractor::new(first);
            policy
                .mapping
                .rules
                .values()
                .flatten()
                .filter_map(|r| extractor.extract(&r.rule).ok().map(|args| (r.rule.clone(), args)))
                .collect()
        } else if policy.mapping.rules.keys().any(|k| {
            mapper
                .expand_rule(first)
                .map(|m| m.contains_key(k))
                .unwrap_or(false)
        }) {
            vec![(first.clone(), std::collections::HashMap::new())]
        } else {
            Vec::new()
        };

        for (matched_rule, args) in matches {
            if cfg.ignored_rules.iter().any(|ig| ig == &matched_rule) {
                continue;
            }
            let mut missing = Vec::new();
            for companion in &tuple[1..] {
                if !rules::ONLY_MAP_RULES.iter().any(|r| companion.starts_with(r)) {
                    continue;
                }
                let needed = if has_placeholder(companion) {
                    substitute_args(companion, &args)
                } else {
                    companion.clone()
                };
                let Ok(parsed) = rules::rule_factory(&needed) else {
                    continue;
                };
                let rutc = match &parsed {
                    rules::Rule::Av(r) => r.up_to_class(),
                    rules::Rule::Te(r) => r.up_to_class(),
                };
                match policy.mapping.rules.get(&rutc) {
                    None => missing.push(needed),
                    Some(present) => match &parsed {
                        rules::Rule::Av(avrule) => {
                            let granted = accumulate_perms(&rutc, present);
                            if !avrule.permset.is_subset(&granted) {
                                missing.push(format!(
                                    "{} (missing \"{}\")",
                                    needed,
                                    avrule.permset.difference(&granted).cloned().collect::<Vec<_>>().join(" ")
                                ));
                            }
                        }
                        rules::Rule::Te(_) => {
                            if !present.iter().any(|p| p.rule == needed) {
                                missing.push(needed);
                            }
                        }
                    },
                }
            }
            if !missing.is_empty() {
                findings.push(Finding::new(
                    "unnecessary_rules",
                    format!("rule \"{}\" is missing associated rule(s): {}", matched_rule, missing.join(", ")),
                ));
            }
        }
    }
}

fn check_debug_types(policy: &SourcePolicy, cfg: &PluginConfig, findings: &mut Vec<Finding>) {
    for rutc in policy.mapping.rules.keys() {
        for dbt in &cfg.debug_types {
            if !dbt.is_empty() && rutc.contains(dbt.as_str()) {
                for r in &policy.mapping.rules[rutc] {
                    if cfg.ignored_rules.iter().any(|ig| ig == &r.rule) {
                        continue;
                    }
                    let mut finding = Finding::new(
                        "unnecessary_rules",
                        format!("rule contains debug type \"{}\": {}", dbt, r.rule),
                    );
                    if let Some((file, line)) = crate::mapping::split_fileline(&r.fileline) {
                        finding = finding.with_origin(file.into(), line);
                    }
                    findings.push(finding);
                }
            }
        }
    }
}

fn check_required_perms(policy: &SourcePolicy, cfg: &PluginConfig, findings: &mut Vec<Finding>) {
    for (rutc, rls) in &policy.mapping.rules {
        if !rutc.starts_with("allow") {
            continue;
        }
        let Some((pre_cls, cls)) = rutc.rsplit_once(':') else {
            continue;
        };
        let Some(req) = cfg.required_perms.get(cls) else {
            continue;
        };
        let interesting: BTreeSet<String> = req.at_least_one_of.iter().cloned().collect();
        let required: BTreeSet<String> = req.required.iter().cloned().collect();
        let found = accumulate_perms(rutc, rls);
        if found.is_empty() {
            continue;
        }
        if found.intersection(&interesting).next().is_none() || found.is_superset(&required) {
            continue;
        }
        let mut all_extras_granted = true;
        for (extra_class, extra_perms) in &req.extra {
            let new_rutc = format!("{}:{}", pre_cls, extra_class);
            let found_extra = policy
                .mapping
                .rules
                .get(&new_rutc)
                .map(|rls| accumulate_perms(&new_rutc, rls));
            let extra_set: BTreeSet<String> = extra_perms.iter().cloned().collect();
            if !found_extra.map(|f| f.is_superset(&extra_set)).unwrap_or(false) {
                all_extras_granted = false;
                break;
            }
        }
        if all_extras_granted {
            continue;
        }
        let missing: Vec<String> = required.difference(&found).cloned().collect();
        findings.push(Finding::new(
            "unnecessary_rules",
            format!(
                "rule \"{}\" grants \"{}\" but is missing required permission(s) \"{}\"",
                rutc,
                found.iter().cloned().collect::<Vec<_>>().join(" "),
                missing.join(" ")
            ),
        ));
    }
}

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_tuples(policy, cfg, &mut findings);
    check_debug_types(policy, cfg, &mut findings);
    check_required_perms(policy, cfg, &mut findings);
    findings
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapping::MappedRule;

    #[test]
    fn substitute_args_replaces_all_placeholders() {
        let mut args = std::collections::HashMap::new();
        args.insert("arg0".to_string(), "foo_t".to_string());
        args.insert("arg1".to_string(), "bar_t".to_string());
        let out = substitute_args("allow @@ARG0@@ @@ARG1@@:file read;", &args);
        assert_eq!(out, "allow foo_t bar_t:file read;");
    }

    #[test]
    fn has_placeholder_detects_argn() {
        assert!(has_placeholder("allow @@ARG0@@ self:file read;"));
        assert!(!has_placeholder("allow foo_t self:file read;"));
    }

    #[test]
    fn accumulate_perms_sums_across_rules() {
        let rutc = "allow foo_t self:file";
        let rules = vec![
            MappedRule {
                rule: "allow foo_t self:file read;".to_string(),
                fileline: "a.te:1".to_string(),
            },
            MappedRule {
                rule: "allow foo_t self:file write;".to_string(),
                fileline: "a.te:2".to_string(),
            },
        ];
        let perms = accumulate_perms(rutc, &rules);
        assert!(perms.contains("read"));
        assert!(perms.contains("write"));
    }
}
