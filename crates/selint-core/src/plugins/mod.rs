//! Built-in analysis plugins (C11). Each plugin is a free function taking
//! the built policy and its own slice of configuration, returning the
//! findings it wants reported; `finding::PLUGINS` drives them in order.

pub mod dangerous_rules;
pub mod global_macros;
pub mod risky_rules;
pub mod te_macros;
pub mod unnecessary_rules;
pub mod user_neverallows;

use std::path::Path;

use crate::mapping::MappedRule;

/// `true` if `rule`'s origin falls under one of the plugin's configured
/// ignore paths (string-prefix match against the fileline key, mirroring
/// `fileline.startswith(FULL_IGNORE_PATHS)`).
pub(crate) fn is_ignored(rule: &MappedRule, ignore_paths: &[String], base_dir: &Path) -> bool {
    if ignore_paths.is_empty() {
        return false;
    }
    let Some((file, _)) = crate::mapping::split_fileline(&rule.fileline) else {
        return false;
    };
    ignore_paths.iter().any(|p| {
        let full = base_dir.join(p);
        Path::new(file).starts_with(&full) || file.starts_with(p.as_str())
    })
}
