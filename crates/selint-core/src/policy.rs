//! Policy compiler bridge (C4) and the `SourcePolicy` aggregate (C10's
//! orchestrator target): runs the files through `m4`, parses the
//! resulting `policy.conf` for attributes/types/classes, and builds the
//! macro catalog, usage list, and rule mapping on top of it.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::TempDir;

use crate::error::PolicyError;
use crate::m4::M4Driver;
use crate::macro_catalog::MacroCatalog;
use crate::macro_usage::{self, MacroUsage};
use crate::mapping::{Mapper, Mapping};

static TYPE_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*type\s+([A-Za-z0-9_.]+)\s*(?:,\s*(.+))?;").unwrap());
static ATTRIBUTE_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*attribute\s+([A-Za-z0-9_.]+)\s*;").unwrap());
static TYPEATTRIBUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*typeattribute\s+([A-Za-z0-9_.]+)\s+(.+);").unwrap());
static COMMON_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*common\s+([A-Za-z0-9_.]+)\s*\{([^}]*)\}").unwrap());
static CLASS_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*class\s+([A-Za-z0-9_.]+)\s*(?:inherits\s+([A-Za-z0-9_.]+)\s*)?(?:\{([^}]*)\})?\s*;?").unwrap()
});

/// Attributes, types, and classes extracted from a compiled `policy.conf`,
/// the ground truth the mapper uses to expand sets/complements/wildcards.
pub struct PolicyModel {
    pub attributes: HashMap<String, BTreeSet<String>>,
    pub types: BTreeSet<String>,
    pub classes: HashMap<String, BTreeSet<String>>,
}

/// Runs `m4 -D<defs> -s <files>` with stdout captured into `policy.conf`
/// inside `dir`.
pub fn create_policy_conf(
    files: &[PathBuf],
    extra_defs: &[String],
    dir: &Path,
) -> Result<PathBuf, PolicyError> {
    let out_path = dir.join("policy.conf");
    let mut command = Command::new("m4");
    for def in extra_defs {
        command.arg("-D").arg(def);
    }
    command.arg("-s");
    command.args(files);

    log::debug!("generating policy.conf: {:?}", command);
    let output = command.output().map_err(|e| PolicyError::Subprocess {
        command: format!("{:?}", command),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(PolicyError::Subprocess {
            command: format!("{:?}", command),
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    fs::write(&out_path, &output.stdout).map_err(|e| PolicyError::Io {
        path: out_path.clone(),
        source: e,
    })?;
    Ok(out_path)
}

/// Parses declarations out of `policy.conf`: `type`, `attribute`,
/// `typeattribute`, `common`, and `class` statements. Classes declaring a
/// common parent have the common's permissions merged in.
pub fn parse_policy_model(policy_conf: &Path) -> Result<PolicyModel, PolicyError> {
    let content = fs::read_to_string(policy_conf).map_err(|e| PolicyError::Io {
        path: policy_conf.to_path_buf(),
        source: e,
    })?;

    let mut attributes: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut types: BTreeSet<String> = BTreeSet::new();
    let mut commons: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut classes: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut pending_class_common: Vec<(String, String)> = Vec::new();

    for stmt in split_statements(&content) {
        if let Some(caps) = TYPE_DECL_RE.captures(&stmt) {
            let name = caps[1].to_string();
            types.insert(name.clone());
            if let Some(attrs) = caps.get(2) {
                for attr in attrs.as_str().split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                    attributes.entry(attr.to_string()).or_default().insert(name.clone());
                }
            }
        } else if let Some(caps) = ATTRIBUTE_DECL_RE.captures(&stmt) {
            attributes.entry(caps[1].to_string()).or_default();
        } else if let Some(caps) = TYPEATTRIBUTE_RE.captures(&stmt) {
            let type_name = caps[1].to_string();
            for attr in caps[2].split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                attributes.entry(attr.to_string()).or_default().insert(type_name.clone());
            }
        } else if let Some(caps) = COMMON_DECL_RE.captures(&stmt) {
            let name = caps[1].to_string();
            let perms: BTreeSet<String> = caps[2].split_whitespace().map(|s| s.to_string()).collect();
            commons.insert(name, perms);
        } else if let Some(caps) = CLASS_DECL_RE.captures(&stmt) {
            let name = caps[1].to_string();
            let mut perms: BTreeSet<String> = caps
                .get(3)
                .map(|m| m.as_str().split_whitespace().map(|s| s.to_string()).collect())
                .unwrap_or_default();
            if let Some(common) = caps.get(2) {
                pending_class_common.push((name.clone(), common.as_str().to_string()));
            }
            classes.entry(name).or_default().append(&mut perms);
        }
    }

    for (class_name, common_name) in pending_class_common {
        if let Some(common_perms) = commons.get(&common_name) {
            classes.entry(class_name).or_default().extend(common_perms.iter().cloned());
        } else {
            log::warn!("class \"{}\" inherits unknown common \"{}\"", class_name, common_name);
        }
    }

    Ok(PolicyModel {
        attributes,
        types,
        classes,
    })
}

/// Splits `policy.conf` into individual `;`-terminated statements, joining
/// continuation lines the way a real parser would need to for
/// brace-delimited class/common declarations.
fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut brace_depth = 0i32;
    for line in content.lines() {
        if line.starts_with("#line") || line.trim().starts_with('#') {
            continue;
        }
        current.push_str(line);
        current.push(' ');
        brace_depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
        if brace_depth <= 0 && line.trim_end().ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
            brace_depth = 0;
        }
    }
    statements
}

/// Locates the macro definition files among `files`: any that contain at
/// least one `define(\`NAME', ...)` line.
fn find_macro_files(files: &[PathBuf]) -> Vec<PathBuf> {
    static DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"define\(`[^']+'").unwrap());
    files
        .iter()
        .filter(|f| {
            fs::read_to_string(f)
                .map(|c| c.lines().any(|l| DEF_RE.is_match(l)))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// The fully assembled policy: macro catalog, usages, policy model, and
/// rule mapping, all built over one scratch directory shared by the M4
/// driver and the policy.conf compilation step.
pub struct SourcePolicy {
    _scratch_dir: TempDir,
    pub policy_conf: PathBuf,
    pub driver: M4Driver,
    pub model: PolicyModel,
    pub mapping: Mapping,
    pub macro_usages: Vec<MacroUsage>,
    macro_files: Vec<PathBuf>,
    base_dir: PathBuf,
}

impl SourcePolicy {
    /// Constructs C1 through C5 in order, failing fast on the first leaf
    /// error, exactly mirroring the ordering the orchestrator (C10)
    /// requires: macro catalog before usage scanning, policy.conf before
    /// the policy model, the policy model before the mapper.
    ///
    /// `base_dir` is recorded only for plugins to resolve their
    /// configured relative ignore paths against; it does not affect
    /// compilation. `map_neverallows` controls whether `neverallow`
    /// statements are included in the rule mapping (default `true`; see
    /// `GlobalConfig::map_neverallows`).
    pub fn build(
        files: &[PathBuf],
        extra_defs: &[String],
        base_dir: &Path,
        map_neverallows: bool,
    ) -> Result<Self, PolicyError> {
        let scratch_dir = TempDir::new().map_err(|e| PolicyError::Io {
            path: std::env::temp_dir(),
            source: e,
        })?;

        let macro_files = find_macro_files(files);
        let driver = M4Driver::new(&macro_files, extra_defs, Some(scratch_dir.path().to_path_buf()))?;

        let policy_conf = create_policy_conf(files, extra_defs, scratch_dir.path())?;
        let model = parse_policy_model(&policy_conf)?;

        let mapper = Mapper::new(&model.attributes, &model.types, &model.classes);
        let mapping = mapper.get_mapping(&policy_conf, map_neverallows)?;

        let catalog = MacroCatalog::discover(&macro_files, &driver);
        let macro_usages = macro_usage::find_macro_usages(files, &catalog);

        Ok(SourcePolicy {
            _scratch_dir: scratch_dir,
            policy_conf,
            driver,
            model,
            mapping,
            macro_usages,
            macro_files,
            base_dir: base_dir.to_path_buf(),
        })
    }

    /// Rebuilds the macro catalog against this policy's own driver. Cheap:
    /// the underlying `m4` state is already frozen, this only re-parses the
    /// macro definition files and re-registers their names.
    pub fn macro_catalog(&self) -> MacroCatalog<'_> {
        MacroCatalog::discover(&self.macro_files, &self.driver)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn attributes(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.model.attributes
    }

    pub fn types(&self) -> &BTreeSet<String> {
        &self.model.types
    }

    pub fn classes(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.model.classes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_type_with_attributes() {
        let conf = "type foo_t, domain, mlstrustedsubject;\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.conf");
        fs::write(&path, conf).unwrap();
        let model = parse_policy_model(&path).unwrap();
        assert!(model.types.contains("foo_t"));
        assert!(model.attributes.get("domain").unwrap().contains("foo_t"));
    }

    #[test]
    fn merges_common_perms_into_class() {
        let conf = "common file_perm_set { ioctl read write };\nclass file inherits file_perm_set { execute };\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.conf");
        fs::write(&path, conf).unwrap();
        let model = parse_policy_model(&path).unwrap();
        let perms = model.classes.get("file").unwrap();
        assert!(perms.contains("execute"));
        assert!(perms.contains("read"));
        assert!(perms.contains("ioctl"));
    }

    #[test]
    fn typeattribute_statement_adds_membership() {
        let conf = "type bar_t;\ntypeattribute bar_t mlstrustedsubject, coredomain;\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.conf");
        fs::write(&path, conf).unwrap();
        let model = parse_policy_model(&path).unwrap();
        assert!(model.attributes.get("coredomain").unwrap().contains("bar_t"));
    }
}
