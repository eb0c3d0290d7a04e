//! Macro usage finder (C3): scans TE files for invocations of known
//! macros and records each occurrence's arguments, file, and line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::macro_catalog::{Macro, MacroCatalog};

/// A single recorded invocation of a macro in a TE file.
pub struct MacroUsage {
    pub macro_name: String,
    pub args: Vec<String>,
    pub file_used: PathBuf,
    pub line_used: usize,
}

impl MacroUsage {
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Renders the expansion for this specific usage's arguments. Delegates
    /// to the referenced `Macro`'s own static/dynamic expansion logic.
    pub fn expansion(&self, catalog: &MacroCatalog) -> Option<String> {
        let m: &Macro = catalog.get(&self.macro_name)?;
        m.expand(Some(&self.args))
    }
}

/// Splits the raw text between a macro invocation's parentheses into
/// individual arguments, respecting curly-bracket grouping, m4-style
/// backtick/quote nesting, and nested parentheses. Commas only separate
/// arguments at the outermost nesting level; spaces outside any nesting
/// are dropped. Returns `None` on mismatched brackets/quotes/parens.
fn split_macro_usage_args(argstring: &str) -> Option<Vec<String>> {
    let mut group = String::new();
    let mut args = Vec::new();
    let mut nested_curly: i32 = 0;
    let mut nested_quotes: i32 = 0;
    let mut nested_parens: i32 = 0;

    for c in argstring.chars() {
        match c {
            '(' => {
                if nested_quotes > 0 || nested_curly > 0 || nested_parens > 0 {
                    group.push(c);
                }
                if nested_quotes == 0 && nested_curly == 0 {
                    nested_parens += 1;
                }
            }
            '{' => {
                if nested_quotes == 0 {
                    nested_curly += 1;
                }
                group.push(c);
            }
            '`' => {
                if nested_curly == 0 {
                    nested_quotes += 1;
                }
                group.push(c);
            }
            '}' => {
                if nested_quotes == 0 {
                    nested_curly -= 1;
                    if nested_curly < 0 {
                        return None;
                    }
                }
                group.push(c);
            }
            '\'' => {
                if nested_curly == 0 {
                    nested_quotes -= 1;
                    if nested_quotes < 0 {
                        return None;
                    }
                }
                group.push(c);
            }
            ')' => {
                if nested_quotes == 0 && nested_curly == 0 {
                    nested_parens -= 1;
                }
                if nested_quotes > 0 || nested_curly > 0 || nested_parens > 0 {
                    group.push(c);
                } else if nested_parens == 0 {
                    break;
                } else {
                    return None;
                }
            }
            ',' => {
                if nested_curly == 0 && nested_quotes == 0 {
                    args.push(std::mem::take(&mut group));
                } else {
                    group.push(c);
                }
            }
            ' ' => {
                if nested_curly > 0 || nested_quotes > 0 {
                    group.push(c);
                }
            }
            _ => group.push(c),
        }
    }
    args.push(group);
    Some(args)
}

/// Recovers the argument list for a usage of `m` at the start of `line`.
/// Handles the multi-line invocation special case
/// (`` NAME(`<newline>…') ``) by returning `nargs` placeholder arguments.
fn macro_usage_args(m: &Macro, line: &str) -> Option<Vec<String>> {
    if m.nargs() == 0 {
        return Some(Vec::new());
    }
    let prefix = format!("{}(", m.name());
    if let Some(rest) = line.strip_prefix(&prefix) {
        if let Some(args) = split_macro_usage_args(rest) {
            if args.len() == m.nargs() {
                return Some(args);
            }
            return None;
        }
    }
    let multiline_prefix = format!("{}(`", m.name());
    if line.contains(&multiline_prefix) {
        return Some(vec!["multiline".to_string(); m.nargs()]);
    }
    None
}

/// Scans every `.te` file in `files` for usages of macros in `catalog`.
/// Full-line comments are skipped; trailing `#` comments are stripped.
/// Invalid usages (wrong arity, malformed argument lists) are logged and
/// skipped. Only the first occurrence of a given word on a line is
/// processed per scan pass, matching the original's word-index tracking.
pub fn find_macro_usages(files: &[PathBuf], catalog: &MacroCatalog) -> Vec<MacroUsage> {
    let mut usages = Vec::new();
    for file in files.iter().filter(|f| has_extension(f, "te")) {
        let Ok(contents) = std::fs::read_to_string(file) else {
            continue;
        };
        for (lineno, raw_line) in contents.lines().enumerate() {
            let lineno = lineno + 1;
            let line = raw_line.trim();
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            let line = match line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => line,
            };
            let mut stripped = line.to_string();
            for word in split_on_non_word(line) {
                let Some(word_index) = stripped.find(word) else {
                    continue;
                };
                stripped = stripped[word_index..].to_string();
                if let Some(m) = catalog.get(word) {
                    let rest = &stripped[word.len()..];
                    match macro_usage_args(m, rest) {
                        Some(args) => usages.push(MacroUsage {
                            macro_name: word.to_string(),
                            args,
                            file_used: file.clone(),
                            line_used: lineno,
                        }),
                        None => {
                            log::warn!(
                                "\"{}\" is a macro name but is used wrong at {}:{}: {}",
                                word,
                                file.display(),
                                lineno,
                                line
                            );
                        }
                    }
                }
            }
        }
    }
    usages
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

fn split_on_non_word(line: &str) -> Vec<&str> {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Groups usages by macro name for plugins that need per-macro access.
pub fn group_by_macro(usages: &[MacroUsage]) -> HashMap<&str, Vec<&MacroUsage>> {
    let mut map: HashMap<&str, Vec<&MacroUsage>> = HashMap::new();
    for u in usages {
        map.entry(u.macro_name.as_str()).or_default().push(u);
    }
    map
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_simple_args() {
        let args = split_macro_usage_args("a, b, c").unwrap();
        assert_eq!(args, vec!["a", "b", "c"]);
    }

    #[test]
    fn splits_curly_set_args() {
        let args = split_macro_usage_args("{ appdomain, -isolated_app }, something").unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], "{ appdomain, -isolated_app }");
    }

    #[test]
    fn mismatched_braces_return_none() {
        assert!(split_macro_usage_args("{ a, b").is_none());
    }

    #[test]
    fn detects_words_avoiding_substrings() {
        let words = split_on_non_word("allow foo_domain bar:file read;");
        assert_eq!(words, vec!["allow", "foo_domain", "bar", "file", "read"]);
    }
}
