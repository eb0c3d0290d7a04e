//! Suggests `te_macros` usages by reconstructing each macro's own
//! placeholder-argument expansion and fitting it against rules actually
//! present in the policy mapping.
//!
//! Simplified relative to the per-class-set splitting a full setools-backed
//! implementation would do: each supported line of the macro's placeholder
//! expansion becomes one templated rule as-is, rather than being
//! multiplexed over every class in a `{ ... }` class set. Rules whose
//! macro body already deals in a single class (the overwhelming majority
//! in practice) are unaffected.
//!
//! Macros taking three or more arguments are skipped by default, since
//! their suggestion search forks once per conflicting binding and grows
//! quickly with argument count; set `te_macros.enable_three_arg = true`
//! to include them.

use std::collections::HashSet;

use crate::config::PluginConfig;
use crate::finding::Finding;
use crate::macro_matcher::{AddRuleError, MacroSuggestion, MacroTemplate};
use crate::policy::SourcePolicy;
use crate::rules;

const DEFAULT_MACRO_IGNORE: &[&str] = &[
    "recovery_only",
    "non_system_app_set",
    "userdebug_or_eng",
    "print",
    "permissive_or_unconfined",
    "userfastboot_only",
    "notuserfastboot",
    "eng",
];

/// Expands `name(@@ARG0@@, @@ARG1@@, ...)` and collects every supported
/// rule line from the result, with internal whitespace normalized so later
/// regex-templating behaves predictably regardless of the macro body's own
/// formatting.
fn placeholder_rules_for(policy: &SourcePolicy, macro_name: &str, nargs: usize) -> Vec<String> {
    let catalog = policy.macro_catalog();
    let Some(m) = catalog.get(macro_name) else {
        return Vec::new();
    };
    let placeholder_args: Vec<String> = (0..nargs).map(|i| format!("@@ARG{}@@", i)).collect();
    let Some(expansion) = m.expand(Some(&placeholder_args)) else {
        return Vec::new();
    };

    expansion
        .lines()
        .map(|l| l.trim())
        .filter(|l| rules::ONLY_MAP_RULES.iter().any(|r| l.starts_with(r)))
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

pub fn main(policy: &SourcePolicy, cfg: &PluginConfig) -> Vec<Finding> {
    let catalog = policy.macro_catalog();
    let ignore: Vec<&str> = if cfg.macro_ignore.is_empty() {
        DEFAULT_MACRO_IGNORE.to_vec()
    } else {
        cfg.macro_ignore.iter().map(|s| s.as_str()).collect()
    };
    let threshold = cfg.suggestion_threshold.unwrap_or(0.8);
    let base_dir = policy.base_dir();

    let mut findings = Vec::new();
    for m in catalog.iter() {
        if m.file_defined().file_name().and_then(|n| n.to_str()) != Some("te_macros") {
            continue;
        }
        if ignore.contains(&m.name()) || m.nargs() == 0 {
            continue;
        }
        if m.nargs() >= 3 && !cfg.enable_three_arg {
            log::debug!(
                "te_macros: skipping \"{}\" ({} args), enable_three_arg is off",
                m.name(),
                m.nargs()
            );
            continue;
        }
        let placeholder_rules = placeholder_rules_for(policy, m.name(), m.nargs());
        if placeholder_rules.is_empty() {
            continue;
        }
        let template = MacroTemplate {
            name: m.name().to_string(),
            nargs: m.nargs(),
            placeholder_rules,
        };

        let mut suggestions = vec![MacroSuggestion::new(&template)];
        for candidates in policy.mapping.rules.values() {
            for candidate in candidates {
                if super::is_ignored(candidate, &cfg.rule_ignore_paths, base_dir) {
                    continue;
                }
                let mut forked = Vec::new();
                for sug in suggestions.iter_mut() {
                    match sug.add_rule(&candidate.rule) {
                        Ok(()) | Err(AddRuleError::NoMatch) => {}
                        Err(AddRuleError::Conflict) => {
                            if let Some(f) = sug.fork_and_fit(&candidate.rule) {
                                forked.push(f);
                            }
                        }
                    }
                }
                suggestions.extend(forked);
            }
        }

        let suggestions = drop_subset_dominated(suggestions);

        let observed: HashSet<String> = policy
            .macro_usages
            .iter()
            .filter(|u| u.macro_name == m.name())
            .map(|u| format!("{}({})", u.macro_name, u.args.join(", ")))
            .collect();

        for sug in suggestions
            .into_iter()
            .filter(|s| !observed.contains(&s.usage()))
            .filter(|s| s.score() >= threshold)
        {
            findings.push(
                Finding::new(
                    "te_macros",
                    format!("macro \"{}\" matches with score {:.2}", m.name(), sug.score()),
                )
                .with_suggestion(sug.usage()),
            );
        }
    }
    findings
}

/// Drops any suggestion whose bound-rule set is a strict subset of another
/// suggestion's bound-rule set with an equal-or-greater score: a fork that
/// only recovers part of what a sibling fork already covers adds nothing.
fn drop_subset_dominated<'a>(suggestions: Vec<MacroSuggestion<'a>>) -> Vec<MacroSuggestion<'a>> {
    let rule_sets: Vec<HashSet<&String>> = suggestions.iter().map(|s| s.rules().values().collect()).collect();
    let scores: Vec<f64> = suggestions.iter().map(|s| s.score()).collect();
    let dominated: Vec<bool> = (0..suggestions.len())
        .map(|i| {
            (0..suggestions.len()).any(|j| {
                j != i
                    && scores[j] >= scores[i]
                    && rule_sets[i].len() < rule_sets[j].len()
                    && rule_sets[i].is_subset(&rule_sets[j])
            })
        })
        .collect();
    suggestions
        .into_iter()
        .zip(dominated)
        .filter_map(|(s, dominated)| if dominated { None } else { Some(s) })
        .collect()
}
