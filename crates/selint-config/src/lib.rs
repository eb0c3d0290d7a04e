//! Loads `selint.toml` into a [`SelintConfig`]: a `[global]` table plus a
//! `[[plugin]]` array-of-tables, one entry per plugin name.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use selint_core::config::{GlobalConfig, PluginConfig, SelintConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TomlPluginEntry {
    name: String,
    #[serde(flatten)]
    settings: PluginConfig,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSelintConfig {
    #[serde(default)]
    global: GlobalConfig,
    #[serde(default, rename = "plugin")]
    plugins: Vec<TomlPluginEntry>,
}

/// Parses a `selint.toml` document's contents into a [`SelintConfig`].
pub fn parse_toml_config(config_str: &str) -> Result<SelintConfig> {
    let parsed: TomlSelintConfig =
        toml::from_str(config_str).context("failed to parse selint.toml")?;
    let mut plugins = HashMap::new();
    for entry in parsed.plugins {
        plugins.insert(entry.name, entry.settings);
    }
    Ok(SelintConfig {
        global: parsed.global,
        plugins,
    })
}

/// Loads configuration from the `SELINT_CONFIG` environment variable if set,
/// otherwise falls back to discovering `selint.toml` under `path`.
pub fn config_from_env_path_or_default(path: &Path) -> Result<SelintConfig> {
    if let Ok(env_config_path) = std::env::var("SELINT_CONFIG") {
        let env_config_file = Path::new(&env_config_path);
        if env_config_file.is_file() {
            return match fs::read_to_string(env_config_file) {
                Ok(config) => parse_toml_config(&config),
                Err(e) => {
                    eprintln!(
                        "Error loading config from SELINT_CONFIG path {env_config_path}: {e}. Default config will be used."
                    );
                    Ok(SelintConfig::default())
                }
            };
        }
        eprintln!(
            "Config file was not found at SELINT_CONFIG path {env_config_path}. Default config will be used."
        );
        return Ok(SelintConfig::default());
    }
    config_in_path_or_default(path)
}

/// Loads `selint.toml` from `path`, or returns the built-in default if
/// absent.
pub fn config_in_path_or_default(path: &Path) -> Result<SelintConfig> {
    let config_file = path.join("selint.toml");
    if config_file.is_file() {
        let config = fs::read_to_string(&config_file)
            .with_context(|| format!("reading {}", config_file.display()))?;
        return parse_toml_config(&config);
    }
    println!(
        "Config file was not found at {}. Default config will be used.",
        config_file.to_string_lossy()
    );
    Ok(SelintConfig::default())
}

/// Walks upward from `start` looking for `selint.toml`, stopping at the
/// first directory that has one, or returning the default if none is found
/// before the filesystem root.
pub fn discover_config_or_default(start: &Path) -> Result<SelintConfig> {
    let mut dir = start;
    loop {
        let candidate = dir.join("selint.toml");
        if candidate.is_file() {
            let config = fs::read_to_string(&candidate)
                .with_context(|| format!("reading {}", candidate.display()))?;
            return parse_toml_config(&config);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    println!("No selint.toml found above {}. Default config will be used.", start.display());
    Ok(SelintConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_table() {
        let config_str = r#"
        [global]
        base_dir = "/tmp/tree"
        policy_dirs = ["system/sepolicy"]
        extra_defs = ["mls_num_sens=1"]
        verbosity = 3
        "#;
        let parsed = parse_toml_config(config_str).unwrap();
        assert_eq!(parsed.global.base_dir, Path::new("/tmp/tree"));
        assert_eq!(parsed.global.policy_dirs, vec!["system/sepolicy"]);
        assert_eq!(parsed.global.extra_defs, vec!["mls_num_sens=1"]);
        assert_eq!(parsed.global.verbosity, 3);
    }

    #[test]
    fn parses_plugin_array() {
        let config_str = r#"
        [[plugin]]
        name = "dangerous_rules"
        score_threshold = 0.7
        supported_rule_types = ["allow"]

        [[plugin]]
        name = "te_macros"
        macro_ignore = ["print"]
        "#;
        let parsed = parse_toml_config(config_str).unwrap();
        let dangerous = parsed.plugins.get("dangerous_rules").unwrap();
        assert_eq!(dangerous.score_threshold, Some(0.7));
        assert_eq!(dangerous.supported_rule_types, vec!["allow"]);
        let te = parsed.plugins.get("te_macros").unwrap();
        assert_eq!(te.macro_ignore, vec!["print"]);
        assert!(parsed.plugins.get("risky_rules").is_none());
    }

    #[test]
    fn required_perms_table_parses() {
        let config_str = r#"
        [[plugin]]
        name = "unnecessary_rules"
        debug_types = ["debug_"]

        [plugin.required_perms.file]
        at_least_one_of = ["read", "write"]
        required = ["open"]
        "#;
        let parsed = parse_toml_config(config_str).unwrap();
        let unnecessary = parsed.plugins.get("unnecessary_rules").unwrap();
        let file_req = unnecessary.required_perms.get("file").unwrap();
        assert_eq!(file_req.at_least_one_of, vec!["read", "write"]);
        assert_eq!(file_req.required, vec!["open"]);
    }

    #[test]
    fn config_from_env_fallback_to_local() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("selint.toml");
        fs::write(
            &config_path,
            r#"
            [global]
            verbosity = 4
            "#,
        )
        .unwrap();

        let config = config_from_env_path_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.global.verbosity, 4);
    }

    #[test]
    fn config_from_env_default_when_no_config() {
        let dummy = tempfile::tempdir().unwrap();
        let config = config_from_env_path_or_default(dummy.path()).unwrap();
        assert_eq!(config.global, GlobalConfig::default());
    }

    #[test]
    fn discover_walks_up_to_parent() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("selint.toml"),
            r#"
            [global]
            verbosity = 1
            "#,
        )
        .unwrap();
        let nested = root.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let config = discover_config_or_default(&nested).unwrap();
        assert_eq!(config.global.verbosity, 1);
    }
}
