//! Macro catalog (C2): discovers macro definitions and wraps them with the
//! static/dynamic classification used to avoid re-invoking `m4` for macros
//! whose expansion is plain string substitution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::m4::M4Driver;

static MACRO_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"define\(`([^']+)'").unwrap());
static ARG_PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[0-9]+").unwrap());
static OPENING_BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[{}]").unwrap());
static ARG_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@@ARG([0-9]+)@@").unwrap());

/// The M4 control operators whose presence marks a macro's expansion as
/// dynamic (argument-dependent in shape, not just in content).
const DYNAMIC_OPERATORS: &[&str] = &["ifelse(", "incr(", "decr(", "errprint("];

#[derive(Debug)]
enum Expansion {
    Unclassified,
    Static { templated: String },
    Dynamic,
}

/// A single m4 macro definition plus enough cached state to expand it
/// without re-invoking `m4` for every call once it is known to be static.
pub struct Macro<'a> {
    name: String,
    file_defined: PathBuf,
    args: Vec<String>,
    comments: Vec<String>,
    driver: &'a M4Driver,
    dump: RefCell<Option<String>>,
    expansion: RefCell<Expansion>,
}

impl<'a> Macro<'a> {
    fn new(
        name: String,
        file_defined: PathBuf,
        args: Vec<String>,
        comments: Vec<String>,
        driver: &'a M4Driver,
    ) -> Self {
        Macro {
            name,
            file_defined,
            args,
            comments,
            driver,
            dump: RefCell::new(None),
            expansion: RefCell::new(Expansion::Unclassified),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_defined(&self) -> &Path {
        &self.file_defined
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// The macro's `dumpdef` output, with the leading `name:` line stripped.
    /// Cached after the first call.
    pub fn dump(&self) -> String {
        if self.dump.borrow().is_none() {
            let d = self.driver.dump(&self.name).unwrap_or_default();
            *self.dump.borrow_mut() = Some(d);
        }
        self.dump.borrow().clone().unwrap()
    }

    fn classify(&self) {
        if matches!(*self.expansion.borrow(), Expansion::Unclassified) {
            let dump = self.dump();
            let dynamic = DYNAMIC_OPERATORS.iter().any(|op| dump.contains(op));
            *self.expansion.borrow_mut() = if dynamic {
                Expansion::Dynamic
            } else {
                Expansion::Static {
                    templated: String::new(),
                }
            };
        }
    }

    /// `true` if this macro's expansion does not depend on control
    /// operators and can be turned into a reusable template after the
    /// first `m4` call.
    pub fn is_static(&self) -> bool {
        self.classify();
        matches!(*self.expansion.borrow(), Expansion::Static { .. })
    }

    /// Returns the dump form (for display) when `args` is `None`; with
    /// the right-arity `args`, returns the substituted body. Arity
    /// mismatch is a recoverable error returning `None`.
    pub fn expand(&self, args: Option<&[String]>) -> Option<String> {
        if self.nargs() == 0 {
            return self.driver.expand(&self.name);
        }
        let args = match args {
            None => return Some(self.dump()),
            Some(a) => a,
        };
        if args.len() != self.nargs() {
            log::warn!(
                "macro \"{}\" expects {} args, got {}",
                self.name,
                self.nargs(),
                args.len()
            );
            return None;
        }
        self.classify();
        if !self.is_static() {
            let call = format!("{}({})", self.name, args.join(", "));
            return self.driver.expand(&call);
        }
        let needs_template = matches!(
            &*self.expansion.borrow(),
            Expansion::Static { templated } if templated.is_empty()
        );
        if needs_template {
            let placeholders: Vec<String> =
                (0..self.nargs()).map(|i| format!("@@ARG{}@@", i)).collect();
            let call = format!("{}({})", self.name, placeholders.join(", "));
            let raw = self.driver.expand(&call)?;
            let escaped = OPENING_BRACE_RE.replace_all(&raw, "$0$0");
            let templated = ARG_TAG_RE.replace_all(&escaped, "{$1}").into_owned();
            *self.expansion.borrow_mut() = Expansion::Static { templated };
        }
        let templated = match &*self.expansion.borrow() {
            Expansion::Static { templated } => templated.clone(),
            _ => unreachable!(),
        };
        Some(substitute_positional(&templated, args))
    }
}

/// Naive `{0}`/`{1}`/… positional substitution, mirroring Python's
/// `str.format(*args)` applied to the templated expansion.
fn substitute_positional(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let idx_str = &template[i + 1..i + 1 + end];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    if let Some(value) = args.get(idx) {
                        out.push_str(value);
                        i += end + 2;
                        continue;
                    }
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// The set of discovered macros, keyed by name, plus the driver that owns
/// their underlying `m4` state.
pub struct MacroCatalog<'a> {
    macros: HashMap<String, Macro<'a>>,
}

impl<'a> MacroCatalog<'a> {
    /// Scans `files` for macro definitions and builds the catalog against
    /// `driver`. Only `global_macros` and `te_macros` (matched by exact
    /// basename, mirroring each parser's `expects(file)` check) are
    /// parsed; every other file is skipped even if it contains `define(`
    /// lines, e.g. `mls_macros`/`ioctl_macros`/`neverallow_macros`.
    pub fn discover(files: &[PathBuf], driver: &'a M4Driver) -> Self {
        let mut macros = HashMap::new();
        for file in files {
            let Ok(contents) = fs::read_to_string(file) else {
                continue;
            };
            if !contents.lines().any(|l| MACRO_DEF_RE.is_match(l)) {
                continue;
            }
            match file.file_name().and_then(|n| n.to_str()) {
                Some("global_macros") => {
                    parse_global_macros_style(file, &contents, driver, &mut macros);
                }
                Some("te_macros") => {
                    parse_te_macros_style(file, &contents, driver, &mut macros);
                }
                Some(other) => {
                    log::debug!("no macro parser for \"{}\", skipping", other);
                }
                None => {}
            }
        }
        MacroCatalog { macros }
    }

    pub fn get(&self, name: &str) -> Option<&Macro<'a>> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Macro<'a>> {
        self.macros.values()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Each definition is a one-line `define(\`NAME', \`BODY')`; arity is 0.
fn parse_global_macros_style<'a>(
    file: &Path,
    contents: &str,
    driver: &'a M4Driver,
    macros: &mut HashMap<String, Macro<'a>>,
) {
    for line in contents.lines() {
        if let Some(caps) = MACRO_DEF_RE.captures(line) {
            let name = caps[1].to_string();
            macros.insert(
                name.clone(),
                Macro::new(name, file.to_path_buf(), Vec::new(), Vec::new(), driver),
            );
        }
    }
}

/// Macros introduced by a comment block, a blank line, and a `##...`
/// separator; `# NAME(arg0, arg1, ...)` is the definition line. Invalid
/// blocks are tolerated: still probed for `define(\`NAME'...)` and their
/// arity recovered by scanning `$N` placeholders in the dump.
fn parse_te_macros_style<'a>(
    file: &Path,
    contents: &str,
    driver: &'a M4Driver,
    macros: &mut HashMap<String, Macro<'a>>,
) {
    static MDL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^#\s[a-zA-Z][a-zA-Z0-9_]*\((?:[a-zA-Z0-9_]+,\s?)*(?:[a-zA-Z0-9_]+)?\)$").unwrap());
    static BLK_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^##+$").unwrap());

    let lines: Vec<&str> = contents.lines().collect();
    let mut blocks: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    let mut previous_is_empty = false;
    for (i, line) in lines.iter().enumerate() {
        if line.is_empty() {
            previous_is_empty = true;
        } else if previous_is_empty {
            if BLK_SEP_RE.is_match(line) {
                blocks.push((start, i));
                start = i;
            }
            previous_is_empty = false;
        }
    }
    blocks.push((start, lines.len()));

    for (bstart, bend) in blocks {
        let block = &lines[bstart..bend];
        let definition_line = block.get(1).copied().unwrap_or("");
        if MDL_RE.is_match(definition_line) {
            let tokens: Vec<String> = definition_line
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            let Some((name, args)) = tokens.split_first() else {
                continue;
            };
            let comments: Vec<String> = block[1..]
                .iter()
                .filter(|l| l.starts_with('#'))
                .map(|s| s.to_string())
                .collect();
            macros.insert(
                name.clone(),
                Macro::new(name.clone(), file.to_path_buf(), args.to_vec(), comments, driver),
            );
        } else {
            let mut invalid_block_macros = std::collections::HashSet::new();
            for line in block {
                if let Some(caps) = MACRO_DEF_RE.captures(line) {
                    invalid_block_macros.insert(caps[1].to_string());
                }
            }
            let comments: Vec<String> = block
                .iter()
                .filter(|l| l.starts_with('#'))
                .map(|s| s.to_string())
                .collect();
            for name in invalid_block_macros {
                let dump = driver.dump(&name).unwrap_or_default();
                let mut args: Vec<String> = ARG_PLACEHOLDER_RE
                    .find_iter(&dump)
                    .map(|m| m.as_str().to_string())
                    .collect();
                args.sort();
                args.dedup();
                macros.insert(
                    name.clone(),
                    Macro::new(name, file.to_path_buf(), args, comments.clone(), driver),
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn substitutes_positional_placeholders() {
        let out = substitute_positional("hello {0} and {1}", &["a".into(), "b".into()]);
        assert_eq!(out, "hello a and b");
    }

    #[test]
    fn substitute_positional_leaves_unmatched_braces() {
        let out = substitute_positional("{9} stays", &["a".into()]);
        assert_eq!(out, "{9} stays");
    }
}
