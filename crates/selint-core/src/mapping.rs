//! Rule mapper (C5): ties every supported rule in a compiled `policy.conf`
//! back to the file and line of its source, expanding attributes, sets,
//! complements and wildcards along the way.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PolicyError;
use crate::rules::{self, AV_RULES, ONLY_MAP_RULES, TE_RULES};

static NEW_FILE_SYNCLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^#line 1 "([^"]+)""#).unwrap());
static NEW_LINE_SYNCLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#line ([0-9]+)").unwrap());

/// A rule string tagged with the file:line it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRule {
    pub rule: String,
    pub fileline: String,
}

impl std::fmt::Display for MappedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.fileline, self.rule)
    }
}

/// Splits a `"path/to/file:42"` fileline key into `(file, line)`.
pub fn split_fileline(fileline: &str) -> Option<(&str, usize)> {
    let (file, line) = fileline.rsplit_once(':')?;
    line.parse().ok().map(|l| (file, l))
}

/// The full mapping result: every RUTC (rule-up-to-class) key to the
/// `MappedRule`s that expanded to it, plus the original source text seen
/// at each file:line.
#[derive(Debug, Default)]
pub struct Mapping {
    pub rules: HashMap<String, Vec<MappedRule>>,
    pub lines: HashMap<String, String>,
}

/// Role a block plays when expanding it: determines which universe a
/// complement/wildcard draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Type,
    Class,
    Perms,
}

/// Expands rule blocks using the policy's attribute/type/class tables.
pub struct Mapper<'a> {
    pub attributes: &'a HashMap<String, BTreeSet<String>>,
    pub types: &'a BTreeSet<String>,
    pub classes: &'a HashMap<String, BTreeSet<String>>,
}

impl<'a> Mapper<'a> {
    pub fn new(
        attributes: &'a HashMap<String, BTreeSet<String>>,
        types: &'a BTreeSet<String>,
        classes: &'a HashMap<String, BTreeSet<String>>,
    ) -> Self {
        Mapper {
            attributes,
            types,
            classes,
        }
    }

    /// Parses `policy_conf`'s `#line` sync markers and groups/expands
    /// every supported rule, returning the completed mapping. When
    /// `map_neverallows` is false, `neverallow` statements are skipped
    /// entirely rather than mapped alongside the other rule types.
    pub fn get_mapping(&self, policy_conf: &Path, map_neverallows: bool) -> Result<Mapping, PolicyError> {
        let content = fs::read_to_string(policy_conf).map_err(|e| PolicyError::Io {
            path: policy_conf.to_path_buf(),
            source: e,
        })?;

        let mut mapping_rules: HashMap<String, Vec<MappedRule>> = HashMap::new();
        let mut mapping_lines: HashMap<String, String> = HashMap::new();
        let mut group: Vec<String> = Vec::new();
        let mut current_file = String::new();
        let mut current_line: usize = 0;
        let mut previous_line_is_syncline = false;

        for raw_line in content.lines() {
            if !previous_line_is_syncline {
                if let Some(caps) = NEW_FILE_SYNCLINE.captures(raw_line) {
                    current_file = caps[1].to_string();
                    current_line = 1;
                    previous_line_is_syncline = true;
                    continue;
                }
                if let Some(caps) = NEW_LINE_SYNCLINE.captures(raw_line) {
                    current_line = caps[1].parse().unwrap_or(current_line);
                    previous_line_is_syncline = true;
                    continue;
                }
                current_line += 1;
            }
            previous_line_is_syncline = false;

            let mut line = raw_line.trim().to_string();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if group.is_empty() && !ONLY_MAP_RULES.iter().any(|r| line.starts_with(r)) {
                continue;
            }
            if group.is_empty() && !map_neverallows && line.starts_with("neverallow") {
                continue;
            }
            if let Some(idx) = line.find('#') {
                line.truncate(idx);
                line = line.trim_end().to_string();
            }
            group.push(line.clone());
            if !line.ends_with(';') {
                continue;
            }

            let original_rule = group.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
            group.clear();

            match self.expand_rule(&original_rule) {
                Ok(rules) => {
                    let key = format!("{}:{}", current_file, current_line);
                    mapping_lines.insert(key.clone(), original_rule);
                    for (rutc, full) in rules {
                        let mpr = MappedRule {
                            rule: full,
                            fileline: key.clone(),
                        };
                        mapping_rules.entry(rutc).or_default().push(mpr);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "could not expand rule \"{}\" at {}:{}: {}",
                        original_rule,
                        current_file,
                        current_line,
                        e
                    );
                }
            }
        }

        Ok(Mapping {
            rules: mapping_rules,
            lines: mapping_lines,
        })
    }

    /// Expands `rule`'s attributes/sets/complements/wildcards, returning
    /// `{rutc: full_string}` for every combination in the cross product.
    pub fn expand_rule(&self, rule: &str) -> Result<HashMap<String, String>, String> {
        if !ONLY_MAP_RULES.iter().any(|r| rule.starts_with(r)) {
            return Err("unsupported rule".to_string());
        }
        let blocks = rules::get_rule_blocks(rule)?;
        if AV_RULES.contains(&blocks[0].as_str()) {
            self.expand_avrule(&blocks)
        } else if TE_RULES.contains(&blocks[0].as_str()) {
            self.expand_terule(&blocks)
        } else {
            Err("unsupported rule".to_string())
        }
    }

    fn expand_avrule(&self, blocks: &[String]) -> Result<HashMap<String, String>, String> {
        if blocks.len() != 5 {
            return Err("invalid rule".to_string());
        }
        let rtype = &blocks[0];
        let subjects = self.expand_block(&blocks[1], Role::Type, None)?;
        let objects = self.expand_block(&blocks[2], Role::Type, None)?;
        let classes = self.expand_block(&blocks[3], Role::Class, None)?;

        let mut rules = HashMap::new();
        if objects.iter().any(|o| o == "self") {
            for cls in &classes {
                let perms = self.expand_block(&blocks[4], Role::Perms, Some(cls))?;
                let permstr = permstr(&perms);
                for sub in &subjects {
                    let base = format!("{} {} {}:{}", rtype, sub, sub, cls);
                    rules.insert(base.clone(), format!("{} {};", base, permstr));
                }
            }
        } else {
            for cls in &classes {
                let perms = self.expand_block(&blocks[4], Role::Perms, Some(cls))?;
                let permstr = permstr(&perms);
                for sub in &subjects {
                    for obj in &objects {
                        let base = format!("{} {} {}:{}", rtype, sub, obj, cls);
                        rules.insert(base.clone(), format!("{} {};", base, permstr));
                    }
                }
            }
        }
        Ok(rules)
    }

    fn expand_terule(&self, blocks: &[String]) -> Result<HashMap<String, String>, String> {
        let add = match blocks.len() {
            6 => format!("{} {};", blocks[4], blocks[5]),
            5 => format!("{};", blocks[4]),
            _ => return Err("invalid rule".to_string()),
        };
        let rtype = &blocks[0];
        let subjects = self.expand_block(&blocks[1], Role::Type, None)?;
        let objects = self.expand_block(&blocks[2], Role::Type, None)?;
        let classes = self.expand_block(&blocks[3], Role::Class, None)?;

        let mut rules = HashMap::new();
        for sub in &subjects {
            for obj in &objects {
                for cls in &classes {
                    let base = format!("{} {} {}:{}", rtype, sub, obj, cls);
                    rules.insert(base.clone(), format!("{} {}", base, add));
                }
            }
        }
        Ok(rules)
    }

    /// Expands a single block given its semantic role. Valid roles are
    /// type, class, perms (perms requires `for_class`).
    fn expand_block(
        &self,
        block: &str,
        role: Role,
        for_class: Option<&str>,
    ) -> Result<Vec<String>, String> {
        if block.starts_with('{') {
            let mut add: BTreeSet<String> = BTreeSet::new();
            let mut remove: BTreeSet<String> = BTreeSet::new();
            for word in block.trim_matches(|c| c == '{' || c == '}').split_whitespace() {
                if let Some(name) = word.strip_prefix('-') {
                    if role == Role::Type {
                        if let Some(members) = self.attributes.get(name) {
                            remove.extend(members.iter().cloned());
                        }
                    }
                    remove.insert(name.to_string());
                } else {
                    if role == Role::Type {
                        if let Some(members) = self.attributes.get(word) {
                            add.extend(members.iter().cloned());
                        }
                    }
                    add.insert(word.to_string());
                }
            }
            Ok(add.difference(&remove).cloned().collect())
        } else if block.starts_with('~') || block == "*" {
            let universe: BTreeSet<String> = match role {
                Role::Type => self.types.clone(),
                Role::Class => self.classes.keys().cloned().collect(),
                Role::Perms => {
                    let cls = for_class.ok_or_else(|| "bad class name for permissions block".to_string())?;
                    self.classes
                        .get(cls)
                        .cloned()
                        .ok_or_else(|| format!("unknown class \"{}\"", cls))?
                }
            };
            let remove: BTreeSet<String> = block
                .trim_start_matches('~')
                .trim_matches(|c| c == '{' || c == '}')
                .split_whitespace()
                .map(|s| s.to_string())
                .collect();
            Ok(universe.difference(&remove).cloned().collect())
        } else if role == Role::Type {
            if let Some(members) = self.attributes.get(block) {
                let mut set: BTreeSet<String> = members.clone();
                set.insert(block.to_string());
                Ok(set.into_iter().collect())
            } else {
                Ok(vec![block.to_string()])
            }
        } else {
            Ok(vec![block.to_string()])
        }
    }
}

fn permstr(perms: &[String]) -> String {
    if perms.len() > 1 {
        format!("{{ {} }}", perms.join(" "))
    } else {
        perms.first().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture() -> (
        HashMap<String, BTreeSet<String>>,
        BTreeSet<String>,
        HashMap<String, BTreeSet<String>>,
    ) {
        let mut attributes = HashMap::new();
        attributes.insert(
            "appdomain".to_string(),
            BTreeSet::from(["foo_app".to_string(), "bar_app".to_string()]),
        );
        let types: BTreeSet<String> = BTreeSet::from([
            "foo_app".to_string(),
            "bar_app".to_string(),
            "init".to_string(),
        ]);
        let mut classes = HashMap::new();
        classes.insert(
            "file".to_string(),
            BTreeSet::from(["read".to_string(), "write".to_string(), "open".to_string()]),
        );
        (attributes, types, classes)
    }

    #[test]
    fn get_mapping_excludes_neverallow_when_disabled() {
        let (attributes, types, classes) = fixture();
        let mapper = Mapper::new(&attributes, &types, &classes);
        let conf = "#line 1 \"domain.te\"\nallow foo_app init:file read;\nneverallow foo_app init:file write;\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.conf");
        std::fs::write(&path, conf).unwrap();

        let with_neverallows = mapper.get_mapping(&path, true).unwrap();
        assert!(with_neverallows.rules.keys().any(|k| k.starts_with("neverallow")));

        let without_neverallows = mapper.get_mapping(&path, false).unwrap();
        assert!(!without_neverallows.rules.keys().any(|k| k.starts_with("neverallow")));
        assert!(without_neverallows.rules.keys().any(|k| k.starts_with("allow")));
    }

    #[test]
    fn expands_attribute_block() {
        // Bare attribute expands to its member types union the attribute
        // name itself, per the block-expansion rule for role=type.
        let (attributes, types, classes) = fixture();
        let mapper = Mapper::new(&attributes, &types, &classes);
        let rules = mapper.expand_rule("allow appdomain init:file read;").unwrap();
        assert_eq!(rules.len(), 3);
        assert!(rules.contains_key("allow foo_app init:file"));
        assert!(rules.contains_key("allow bar_app init:file"));
        assert!(rules.contains_key("allow appdomain init:file"));
    }

    #[test]
    fn self_target_does_not_cross_multiply() {
        let (attributes, types, classes) = fixture();
        let mapper = Mapper::new(&attributes, &types, &classes);
        let rules = mapper.expand_rule("allow appdomain self:file read;").unwrap();
        assert_eq!(rules.len(), 3);
        assert!(rules.contains_key("allow foo_app foo_app:file"));
        assert!(rules.contains_key("allow bar_app bar_app:file"));
        assert!(rules.contains_key("allow appdomain appdomain:file"));
        assert!(!rules.contains_key("allow foo_app bar_app:file"));
    }

    #[test]
    fn complement_uses_full_universe() {
        let (attributes, types, classes) = fixture();
        let mapper = Mapper::new(&attributes, &types, &classes);
        let rules = mapper.expand_rule("allow init ~init:file read;").unwrap();
        assert!(rules.contains_key("allow init foo_app:file"));
        assert!(rules.contains_key("allow init bar_app:file"));
        assert!(!rules.contains_key("allow init init:file"));
    }

    #[test]
    fn multi_perm_set_is_bracketed() {
        let (attributes, types, classes) = fixture();
        let mapper = Mapper::new(&attributes, &types, &classes);
        let rules = mapper
            .expand_rule("allow init init:file { read write };")
            .unwrap();
        let full = rules.get("allow init init:file").unwrap();
        assert!(full.contains("{ read write }"));
    }
}
