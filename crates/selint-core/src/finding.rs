//! The `Finding` type every plugin reports through, and the plugin
//! registry/dispatcher (C10).

use std::path::PathBuf;

use crate::policy::SourcePolicy;
use crate::PluginConfig;

/// A single file:line origin contributing to a finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: PathBuf,
    pub line: usize,
}

/// One issue reported by a plugin.
#[derive(Debug, Clone)]
pub struct Finding {
    pub plugin: &'static str,
    pub message: String,
    pub origins: Vec<Origin>,
    pub suggested_replacement: Option<String>,
}

impl Finding {
    pub fn new(plugin: &'static str, message: impl Into<String>) -> Self {
        Finding {
            plugin,
            message: message.into(),
            origins: Vec::new(),
            suggested_replacement: None,
        }
    }

    pub fn with_origin(mut self, file: PathBuf, line: usize) -> Self {
        self.origins.push(Origin { file, line });
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_replacement = Some(suggestion.into());
        self
    }
}

/// A plugin's entry in the static registry: a name and the function that
/// runs it over a built policy and its configuration.
pub struct Plugin {
    pub name: &'static str,
    pub run: fn(&SourcePolicy, &PluginConfig) -> Vec<Finding>,
}

/// The built-in analysis plugins, run in order by the orchestrator.
pub static PLUGINS: &[Plugin] = &[
    Plugin {
        name: "dangerous_rules",
        run: crate::plugins::dangerous_rules::main,
    },
    Plugin {
        name: "risky_rules",
        run: crate::plugins::risky_rules::main,
    },
    Plugin {
        name: "global_macros",
        run: crate::plugins::global_macros::main,
    },
    Plugin {
        name: "te_macros",
        run: crate::plugins::te_macros::main,
    },
    Plugin {
        name: "unnecessary_rules",
        run: crate::plugins::unnecessary_rules::main,
    },
    Plugin {
        name: "user_neverallows",
        run: crate::plugins::user_neverallows::main,
    },
];
