//! Configuration types shared by the engine and every plugin. Raw TOML
//! parsing and file discovery live in the `selint-config` crate; this
//! module defines the normalized, in-memory shape that plugins are
//! handed.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

fn default_true() -> bool {
    true
}

fn default_verbosity() -> u8 {
    2
}

/// Top-level, analyzer-wide configuration (`[global]` in TOML).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub policy_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub tefiles_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub policy_files: Vec<String>,
    #[serde(default)]
    pub policyfiles_static_pre: Vec<String>,
    #[serde(default)]
    pub policyfiles_static_te: Vec<String>,
    #[serde(default)]
    pub policyfiles_static_post: Vec<String>,
    #[serde(default)]
    pub extra_defs: Vec<String>,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(default = "default_true")]
    pub map_neverallows: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            base_dir: PathBuf::new(),
            policy_dirs: Vec::new(),
            tefiles_dirs: Vec::new(),
            policy_files: Vec::new(),
            policyfiles_static_pre: Vec::new(),
            policyfiles_static_te: Vec::new(),
            policyfiles_static_post: Vec::new(),
            extra_defs: Vec::new(),
            verbosity: default_verbosity(),
            map_neverallows: true,
        }
    }
}

/// `class -> (at_least_one_of, required, extra-per-transition-type)`, the
/// schema decided for the unnecessary-rules plugin's companion-rule
/// requirements.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequiredPerms {
    #[serde(default)]
    pub at_least_one_of: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, Vec<String>>,
}

/// Per-plugin configuration (one `[[plugin]]` TOML table per plugin
/// name). Every field defaults to empty/off so a plugin not mentioned in
/// the config file still runs with conservative defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub rule_ignore_paths: Vec<String>,
    #[serde(default)]
    pub supported_rule_types: Vec<String>,
    #[serde(default)]
    pub ignored_rules: Vec<String>,
    #[serde(default)]
    pub usages_ignore: Vec<String>,
    #[serde(default)]
    pub suggestion_threshold: Option<f64>,
    #[serde(default)]
    pub suggestion_max_no: Option<usize>,
    #[serde(default)]
    pub types: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub perms: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub score: HashMap<String, f64>,
    #[serde(default)]
    pub score_risk: HashMap<String, f64>,
    #[serde(default)]
    pub score_trust: HashMap<String, f64>,
    #[serde(default)]
    pub maximum_score: Option<f64>,
    #[serde(default)]
    pub score_threshold: Option<f64>,
    #[serde(default)]
    pub scoring_system: Option<String>,
    #[serde(default)]
    pub reverse_sort: bool,
    #[serde(default)]
    pub macro_ignore: Vec<String>,
    #[serde(default)]
    pub neverallows: Vec<String>,
    #[serde(default)]
    pub rules_tuples: Vec<Vec<String>>,
    #[serde(default)]
    pub debug_types: Vec<String>,
    #[serde(default)]
    pub required_perms: HashMap<String, RequiredPerms>,
    #[serde(default)]
    pub enable_three_arg: bool,
    #[serde(default)]
    pub dangerous_targets: Vec<String>,
    #[serde(default)]
    pub dangerous_perms: Vec<String>,
}

/// The full, normalized configuration handed to the orchestrator: global
/// settings plus one entry per known plugin name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelintConfig {
    pub global: GlobalConfig,
    pub plugins: HashMap<String, PluginConfig>,
}

impl SelintConfig {
    /// The config for `plugin`, or an all-defaults config if the TOML
    /// file did not mention it.
    pub fn plugin(&self, plugin: &str) -> PluginConfig {
        self.plugins.get(plugin).cloned().unwrap_or_default()
    }

    pub fn is_enabled(&self, plugin: &str) -> bool {
        self.plugins
            .get(plugin)
            .and_then(|p| p.enabled)
            .unwrap_or(true)
    }
}
