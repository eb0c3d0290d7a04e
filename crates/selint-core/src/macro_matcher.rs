//! Macro matcher (C8): reconstructs TE-macro usage by fitting observed
//! rules against a macro's own placeholder-argument expansion.

use std::collections::{BTreeSet, HashMap};

use regex::{escape, Regex};

use crate::rules::AV_RULES;

/// Valid characters in a macro argument once substituted into a rule.
const VALID_ARG_CLASS: &str = "[a-zA-Z0-9_-]+";
const PLACEHOLDER_RE_SRC: &str = r"@@ARG([0-9]+)@@";
/// Matches either a curly permission set or a single bare permission,
/// trailing `;` optional, at the end of an AV rule.
const PERM_TAIL_RE_SRC: &str = r"\s*(\{[^}]*\}|[A-Za-z0-9_-]+)\s*;?\s*$";

/// If `rule` has the shape of an AV rule (`rtype source target:class
/// perms`, `rtype` one of [`AV_RULES`]), splits it into the literal head
/// (`rtype source target:class`, still carrying any `@@ARGn@@`
/// placeholders) and the permission set named after the class. Returns
/// `None` for anything else (TE rules have no permission set to treat as
/// a subset match).
fn split_av_head_and_perms(rule: &str) -> Option<(String, BTreeSet<String>)> {
    let trimmed = rule.trim().trim_end_matches(';').trim_end();
    let (before_colon, after_colon) = trimmed.split_once(':')?;
    let rtype = before_colon.split_whitespace().next()?;
    if !AV_RULES.contains(&rtype) {
        return None;
    }
    let after_colon = after_colon.trim_start();
    let (class, perms_text) = after_colon.split_once(char::is_whitespace)?;
    let permset: BTreeSet<String> = perms_text
        .trim()
        .trim_matches(|c| c == '{' || c == '}')
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    if permset.is_empty() {
        return None;
    }
    Some((format!("{}:{}", before_colon, class), permset))
}

/// Builds a regex from a rule templated with `@@ARGn@@` placeholders and
/// extracts named arguments (`arg0`, `arg1`, ...) from a candidate rule
/// string. Rule text outside the placeholders is taken literally, except
/// for an AV rule's trailing permission set: that is matched generically
/// and checked for containing `required_perms` as a subset, so a real
/// rule granting extra permissions still matches (mirrors setools'
/// `perms_subset=True` query mode).
pub struct ArgExtractor {
    template: String,
    regex: Regex,
    arg_names: Vec<String>,
    required_perms: Option<BTreeSet<String>>,
}

impl ArgExtractor {
    pub fn new(templated_rule: &str) -> Self {
        let placeholder_re = Regex::new(PLACEHOLDER_RE_SRC).unwrap();
        let (literal_part, required_perms) = match split_av_head_and_perms(templated_rule) {
            Some((head, perms)) => (head, Some(perms)),
            None => (templated_rule.to_string(), None),
        };

        let mut pattern = String::from("^");
        let mut last = 0;
        let mut arg_names = Vec::new();
        for m in placeholder_re.find_iter(&literal_part) {
            pattern.push_str(&escape(&literal_part[last..m.start()]));
            pattern.push('(');
            pattern.push_str(VALID_ARG_CLASS);
            pattern.push(')');
            let caps = placeholder_re.captures(m.as_str()).unwrap();
            arg_names.push(format!("arg{}", &caps[1]));
            last = m.end();
        }
        pattern.push_str(&escape(&literal_part[last..]));
        if required_perms.is_some() {
            pattern.push_str(PERM_TAIL_RE_SRC);
        } else {
            pattern.push('$');
        }

        ArgExtractor {
            template: templated_rule.to_string(),
            regex: Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").unwrap()),
            arg_names,
            required_perms,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Extracts named arguments from `rule`. Rejects (returns `Err`) if a
    /// repeated argument position captures differing values, if the rule
    /// does not match the template at all, or (for AV rules) if the
    /// rule's own permission set does not contain the template's required
    /// permissions.
    pub fn extract(&self, rule: &str) -> Result<HashMap<String, String>, String> {
        let caps = self
            .regex
            .captures(rule)
            .ok_or_else(|| format!("rule does not match extractor template \"{}\"", self.template))?;
        let mut result = HashMap::new();
        for (i, name) in self.arg_names.iter().enumerate() {
            let value = caps.get(i + 1).map(|m| m.as_str().to_string()).unwrap_or_default();
            if let Some(existing) = result.get(name) {
                if existing != &value {
                    return Err(format!(
                        "rule does not match extractor expression: conflicting values for {}",
                        name
                    ));
                }
            } else {
                result.insert(name.clone(), value);
            }
        }
        if let Some(required) = &self.required_perms {
            let perm_text = caps
                .get(self.arg_names.len() + 1)
                .map(|m| m.as_str())
                .unwrap_or_default();
            let actual: BTreeSet<String> = perm_text
                .trim_matches(|c| c == '{' || c == '}')
                .split_whitespace()
                .map(|s| s.to_string())
                .collect();
            if !required.is_subset(&actual) {
                return Err(format!(
                    "rule grants \"{}\", missing required permission(s) \"{}\"",
                    actual.iter().cloned().collect::<Vec<_>>().join(" "),
                    required.difference(&actual).cloned().collect::<Vec<_>>().join(" ")
                ));
            }
        }
        Ok(result)
    }
}

/// A candidate macro reconstruction: a macro name plus its arity and the
/// set of templated placeholder rules its body expands to.
pub struct MacroTemplate {
    pub name: String,
    pub nargs: usize,
    pub placeholder_rules: Vec<String>,
}

/// Tracks how much of a macro's placeholder-rule set has been matched
/// against real policy rules, and the arguments inferred so far.
pub struct MacroSuggestion<'a> {
    macro_template: &'a MacroTemplate,
    extractors: HashMap<String, ArgExtractor>,
    rules: HashMap<String, String>,
    args: HashMap<String, String>,
    score: f64,
}

pub enum AddRuleError {
    /// The rule conflicts with an argument already bound by this
    /// suggestion, or the slot it would fill is already taken.
    Conflict,
    /// The rule doesn't match any placeholder rule in this macro at all.
    NoMatch,
}

impl<'a> MacroSuggestion<'a> {
    pub fn new(macro_template: &'a MacroTemplate) -> Self {
        let extractors = macro_template
            .placeholder_rules
            .iter()
            .map(|r| (r.clone(), ArgExtractor::new(r)))
            .collect();
        MacroSuggestion {
            macro_template,
            extractors,
            rules: HashMap::new(),
            args: HashMap::new(),
            score: 0.0,
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    pub fn rules(&self) -> &HashMap<String, String> {
        &self.rules
    }

    /// Tries to bind `rule` to one of the unfilled placeholder slots.
    pub fn add_rule(&mut self, rule: &str) -> Result<(), AddRuleError> {
        let mut already_taken = false;
        for (placeholder, extractor) in &self.extractors {
            if self.rules.contains_key(placeholder) {
                already_taken = true;
                continue;
            }
            let Ok(extracted) = extractor.extract(rule) else {
                continue;
            };
            for (name, value) in &extracted {
                if let Some(existing) = self.args.get(name) {
                    if existing != value {
                        return Err(AddRuleError::Conflict);
                    }
                }
            }
            self.rules.insert(placeholder.clone(), rule.to_string());
            self.args.extend(extracted);
            self.recompute_score();
            return Ok(());
        }
        if already_taken {
            Err(AddRuleError::Conflict)
        } else {
            Err(AddRuleError::NoMatch)
        }
    }

    fn recompute_score(&mut self) {
        let rule_ratio = self.rules.len() as f64 / self.macro_template.placeholder_rules.len() as f64;
        let arg_ratio = if self.macro_template.nargs == 0 {
            1.0
        } else {
            self.args.len() as f64 / self.macro_template.nargs as f64
        };
        self.score = rule_ratio * arg_ratio;
    }

    /// Forks this suggestion to accommodate `rule`, which did not fit due
    /// to an argument conflict: starts a fresh suggestion with `rule`
    /// bound first, then re-adds this suggestion's existing rules,
    /// skipping any that now conflict. Returns `None` if `rule` doesn't
    /// match the macro at all.
    pub fn fork_and_fit(&self, rule: &str) -> Option<MacroSuggestion<'a>> {
        let mut forked = MacroSuggestion::new(self.macro_template);
        match forked.add_rule(rule) {
            Ok(()) => {}
            Err(AddRuleError::NoMatch) => return None,
            Err(AddRuleError::Conflict) => return None,
        }
        for old_rule in self.rules.values() {
            let _ = forked.add_rule(old_rule);
        }
        Some(forked)
    }

    /// Renders the suggested usage string, e.g. `macro(arg0, <MISSING_ARG>)`.
    pub fn usage(&self) -> String {
        let mut parts = Vec::new();
        for i in 0..self.macro_template.nargs {
            let name = format!("arg{}", i);
            parts.push(self.args.get(&name).cloned().unwrap_or_else(|| "<MISSING_ARG>".to_string()));
        }
        format!("{}({})", self.macro_template.name, parts.join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extractor_pulls_out_single_argument() {
        let extractor = ArgExtractor::new("allow @@ARG0@@ @@ARG0@@_tmpfs:file execute;");
        let result = extractor.extract("allow foo_t foo_t_tmpfs:file execute;").unwrap();
        assert_eq!(result.get("arg0").unwrap(), "foo_t");
    }

    #[test]
    fn extractor_rejects_inconsistent_repeat() {
        let extractor = ArgExtractor::new("allow @@ARG0@@ @@ARG0@@_tmpfs:file execute;");
        assert!(extractor.extract("allow foo_t bar_t_tmpfs:file execute;").is_err());
    }

    #[test]
    fn extractor_matches_perm_superset() {
        let extractor = ArgExtractor::new("allow @@ARG0@@ foo_t:file { read write };");
        let result = extractor
            .extract("allow bar_t foo_t:file { read write getattr };")
            .unwrap();
        assert_eq!(result.get("arg0").unwrap(), "bar_t");
    }

    #[test]
    fn extractor_rejects_missing_perm() {
        let extractor = ArgExtractor::new("allow @@ARG0@@ foo_t:file { read write };");
        assert!(extractor.extract("allow bar_t foo_t:file { read };").is_err());
    }

    #[test]
    fn suggestion_scores_by_matched_rules_and_args() {
        let template = MacroTemplate {
            name: "domain_trans".to_string(),
            nargs: 2,
            placeholder_rules: vec![
                "allow @@ARG0@@ @@ARG1@@:process transition;".to_string(),
                "allow @@ARG0@@ @@ARG1@@:file execute;".to_string(),
            ],
        };
        let mut sug = MacroSuggestion::new(&template);
        sug.add_rule("allow init shell_exec:process transition;").unwrap();
        // one of two rules matched, 2 of 2 args bound -> 0.5 * 1.0
        assert!((sug.score() - 0.5).abs() < 1e-9);
        sug.add_rule("allow init shell_exec:file execute;").unwrap();
        assert!((sug.score() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fork_and_fit_drops_conflicting_rules() {
        let template = MacroTemplate {
            name: "m".to_string(),
            nargs: 1,
            placeholder_rules: vec!["allow @@ARG0@@ foo_t:file read;".to_string()],
        };
        let mut sug = MacroSuggestion::new(&template);
        sug.add_rule("allow bar_t foo_t:file read;").unwrap();
        let forked = sug.fork_and_fit("allow baz_t foo_t:file read;");
        assert!(forked.is_some());
        let forked = forked.unwrap();
        assert_eq!(forked.args().get("arg0").unwrap(), "baz_t");
    }
}
