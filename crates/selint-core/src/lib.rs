//! # SELint Core
//!
//! The analysis engine behind `selint`: M4 macro expansion and catalog
//! discovery, policy.conf parsing, rule mapping back to source file/line,
//! and the plugin set that turns a mapped policy into findings.
//!
//! ## Usage
//! ```rust,no_run
//! use selint_core::policy::SourcePolicy;
//! use selint_core::config::SelintConfig;
//! use selint_core::finding::PLUGINS;
//! use std::path::{Path, PathBuf};
//!
//! # let files: Vec<PathBuf> = vec![];
//! # let extra_defs: Vec<String> = vec![];
//! # let base_dir = Path::new(".");
//! let config = SelintConfig::default();
//! let policy = SourcePolicy::build(&files, &extra_defs, base_dir, config.global.map_neverallows).unwrap();
//! for plugin in PLUGINS {
//!     if config.is_enabled(plugin.name) {
//!         let _findings = (plugin.run)(&policy, &config.plugin(plugin.name));
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod finding;
pub mod m4;
pub mod macro_catalog;
pub mod macro_matcher;
pub mod macro_usage;
pub mod mapping;
pub mod plugins;
pub mod policy;
pub mod rules;
pub mod scorer;
pub mod set_fitter;

pub use config::{PluginConfig, SelintConfig};
pub use error::PolicyError;
pub use finding::Finding;
