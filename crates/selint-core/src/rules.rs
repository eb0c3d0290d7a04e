//! Rule model (C6): tokenizing a rule string into blocks, and the two
//! concrete rule shapes the mapper understands (AV rules and TE rules).

use std::collections::BTreeSet;

/// Rule types mapped as AV rules (access vector rules: permission sets).
pub const AV_RULES: &[&str] = &["allow", "auditallow", "dontaudit", "neverallow"];
/// Rule types mapped as TE rules (type enforcement: transitions).
pub const TE_RULES: &[&str] = &[
    "type_transition",
    "type_change",
    "type_member",
    "typebounds",
];
/// Only these rule types are mapped at all.
pub const ONLY_MAP_RULES: &[&str] = &[
    "allow",
    "auditallow",
    "dontaudit",
    "neverallow",
    "type_transition",
];

/// Characters allowed to follow a complement sign (`~`).
const COMPLEMENTABLE: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ{";

/// Splits a rule string into its component blocks:
/// `[rtype, source, target, class, perms-or-default [, objname]]`.
///
/// Implemented as a streaming character scan tracking curly-bracket
/// nesting (flattened to one level) and a pending-complement flag for a
/// leading `~`. `:` between target and class is treated like a space.
pub fn get_rule_blocks(rule: &str) -> Result<Vec<String>, String> {
    if rule.matches('{').count() != rule.matches('}').count() {
        return Err(format!("mismatched separators in \"{}\"", rule));
    }
    let Some((rtype, rest)) = rule.split_once(' ') else {
        return Err(format!("malformed rule \"{}\"", rule));
    };
    let mut blocks = vec![rtype.to_string()];
    let rest = rest.trim_end().trim_end_matches(';');
    let normalized: String = rest.replace(':', " ");

    let mut nest_lvl: i32 = 0;
    let mut block = String::new();
    let mut complement_next_block = false;

    for ch in normalized.chars() {
        if complement_next_block && !COMPLEMENTABLE.contains(ch) {
            return Err(format!("bad complement sign in \"{}\"", rule));
        }
        match ch {
            '~' => {
                if nest_lvl != 0 {
                    return Err(format!("nested complement group in \"{}\"", rule));
                }
                complement_next_block = true;
            }
            '{' => {
                nest_lvl += 1;
                if nest_lvl == 1 {
                    if !block.is_empty() {
                        blocks.push(block.trim().to_string());
                    }
                    block = if complement_next_block {
                        complement_next_block = false;
                        "~{".to_string()
                    } else {
                        "{".to_string()
                    };
                }
            }
            '}' => {
                if nest_lvl > 0 {
                    nest_lvl -= 1;
                    if nest_lvl == 0 {
                        block.push('}');
                        blocks.push(block.clone());
                        block = String::new();
                    }
                } else {
                    return Err(format!("mismatched separators in \"{}\"", rule));
                }
            }
            ' ' => {
                if nest_lvl > 0 {
                    if !block.ends_with(' ') {
                        block.push(' ');
                    }
                } else if !block.is_empty() {
                    blocks.push(block.trim().to_string());
                    block = String::new();
                }
            }
            _ => {
                if nest_lvl > 0 {
                    block.push(ch);
                } else {
                    if complement_next_block {
                        block = "~".to_string();
                        complement_next_block = false;
                    }
                    block.push(ch);
                }
            }
        }
    }
    if !block.is_empty() {
        blocks.push(block.trim().to_string());
    }
    Ok(blocks)
}

/// An access vector rule: `rtype source target:class perms`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvRule {
    pub rtype: String,
    pub source: String,
    pub target: String,
    pub tclass: String,
    pub permset: BTreeSet<String>,
}

impl AvRule {
    pub fn from_blocks(blocks: &[String]) -> Result<Self, String> {
        if blocks.len() != 5 {
            return Err(format!("invalid number of blocks ({})", blocks.len()));
        }
        if blocks.iter().any(|b| b.is_empty()) {
            return Err("invalid block(s)".to_string());
        }
        let permset = blocks[4]
            .trim_matches(|c| c == '{' || c == '}')
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        Ok(AvRule {
            rtype: blocks[0].clone(),
            source: blocks[1].clone(),
            target: blocks[2].clone(),
            tclass: blocks[3].clone(),
            permset,
        })
    }

    pub fn up_to_class(&self) -> String {
        format!("{} {} {}:{}", self.rtype, self.source, self.target, self.tclass)
    }
}

impl std::fmt::Display for AvRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", self.up_to_class())?;
        if self.permset.len() > 1 {
            write!(f, "{{ {} }};", self.permset.iter().cloned().collect::<Vec<_>>().join(" "))
        } else {
            write!(f, "{};", self.permset.iter().next().cloned().unwrap_or_default())
        }
    }
}

/// A TE rule: currently only type/name transitions, type_change,
/// type_member, and typebounds (the latter three carry no object name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TeRule {
    pub rtype: String,
    pub source: String,
    pub target: String,
    pub tclass: String,
    pub deftype: String,
    pub objname: Option<String>,
}

impl TeRule {
    pub fn from_blocks(blocks: &[String]) -> Result<Self, String> {
        if blocks.len() != 5 && blocks.len() != 6 {
            return Err(format!("invalid number of blocks ({})", blocks.len()));
        }
        if blocks.iter().any(|b| b.is_empty()) {
            return Err("invalid block(s)".to_string());
        }
        let objname = if blocks.len() == 6 {
            Some(blocks[5].trim_matches(|c| c == '"' || c == '\'').to_string())
        } else {
            None
        };
        Ok(TeRule {
            rtype: blocks[0].clone(),
            source: blocks[1].clone(),
            target: blocks[2].clone(),
            tclass: blocks[3].clone(),
            deftype: blocks[4].clone(),
            objname,
        })
    }

    pub fn is_name_trans(&self) -> bool {
        self.objname.is_some()
    }

    pub fn up_to_class(&self) -> String {
        format!("{} {} {}:{}", self.rtype, self.source, self.target, self.tclass)
    }
}

impl std::fmt::Display for TeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.up_to_class(), self.deftype)?;
        match &self.objname {
            Some(name) => write!(f, " \"{}\";", name),
            None => write!(f, ";"),
        }
    }
}

/// Either concrete rule shape a mapper knows how to parse/expand.
#[derive(Debug, Clone)]
pub enum Rule {
    Av(AvRule),
    Te(TeRule),
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::Av(r) => write!(f, "{}", r),
            Rule::Te(r) => write!(f, "{}", r),
        }
    }
}

/// Parses a rule string into the matching concrete type. Returns `Err` if
/// the rule type is not supported or the rule is malformed.
pub fn rule_factory(rule: &str) -> Result<Rule, String> {
    if !ONLY_MAP_RULES.iter().any(|r| rule.starts_with(r)) {
        return Err("unsupported rule".to_string());
    }
    let blocks = get_rule_blocks(rule)?;
    if AV_RULES.contains(&blocks[0].as_str()) {
        Ok(Rule::Av(AvRule::from_blocks(&blocks)?))
    } else if TE_RULES.contains(&blocks[0].as_str()) {
        Ok(Rule::Te(TeRule::from_blocks(&blocks)?))
    } else {
        Err("unsupported rule".to_string())
    }
}
