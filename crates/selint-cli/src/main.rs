use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use clap::Parser;
use glob::glob;
use rayon::prelude::*;
use selint_config::{config_from_env_path_or_default, discover_config_or_default};
use selint_core::config::SelintConfig;
use selint_core::finding::{Finding, PLUGINS};
use selint_core::policy::SourcePolicy;

#[derive(Parser, Debug)]
#[command(version, about = "SELint: a SEAndroid/SELinux source policy analyzer")]
struct Cli {
    /// Policy files, directories, or glob patterns to analyze.
    /// When omitted, files are discovered from the loaded configuration's
    /// policy_dirs/tefiles_dirs/policy_files.
    #[arg(help = "Policy files, directories, or glob patterns to analyze")]
    paths: Vec<PathBuf>,

    /// Extra M4 definitions (NAME=VALUE), combined with the config's extra_defs.
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    extra_defs: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv, ...)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a selint.toml config file, overriding discovery.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

fn load_config(cli: &Cli, base_dir: &Path) -> Result<SelintConfig> {
    if let Some(path) = &cli.config {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        return selint_config::parse_toml_config(&text);
    }
    if std::env::var("SELINT_CONFIG").is_ok() {
        return config_from_env_path_or_default(base_dir);
    }
    discover_config_or_default(base_dir)
}

/// Resolves `paths` relative to `base_dir`, treating each entry as a
/// directory to walk for `.te` files, a single file, or a glob pattern.
fn expand_cli_paths(paths: &[PathBuf], base_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in paths {
        let full = if p.is_absolute() { p.clone() } else { base_dir.join(p) };
        if full.is_file() {
            out.push(full);
        } else if full.is_dir() {
            for entry in walkdir::WalkDir::new(&full).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    out.push(entry.into_path());
                }
            }
        } else {
            for entry in glob(&full.to_string_lossy())? {
                out.push(entry?);
            }
        }
    }
    Ok(out)
}

/// Assembles the ordered policy file list per the configured `[global]`
/// directories and static file lists: pre-files, discovered `.te` files,
/// statically-listed `.te` files, explicit policy files, then post-files.
fn discover_configured_files(cfg: &SelintConfig, base_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for rel in &cfg.global.policyfiles_static_pre {
        files.push(base_dir.join(rel));
    }
    let mut te_files = Vec::new();
    for dir in &cfg.global.tefiles_dirs {
        let full_dir = base_dir.join(dir);
        if !full_dir.is_dir() {
            log::warn!("tefiles_dirs entry {} is not a directory", full_dir.display());
            continue;
        }
        for entry in walkdir::WalkDir::new(&full_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("te")
            {
                te_files.push(entry.into_path());
            }
        }
    }
    te_files.sort();
    files.extend(te_files);
    for rel in &cfg.global.policyfiles_static_te {
        files.push(base_dir.join(rel));
    }
    for dir in &cfg.global.policy_dirs {
        let full_dir = base_dir.join(dir);
        if !full_dir.is_dir() {
            log::warn!("policy_dirs entry {} is not a directory", full_dir.display());
            continue;
        }
        let mut dir_files = Vec::new();
        for entry in walkdir::WalkDir::new(&full_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                dir_files.push(entry.into_path());
            }
        }
        dir_files.sort();
        files.extend(dir_files);
    }
    for rel in &cfg.global.policy_files {
        files.push(base_dir.join(rel));
    }
    for rel in &cfg.global.policyfiles_static_post {
        files.push(base_dir.join(rel));
    }
    Ok(files)
}

fn print_findings(findings: &[Finding]) -> usize {
    for f in findings {
        let origin = f
            .origins
            .first()
            .map(|o| format!("{}:{}: ", o.file.display(), o.line))
            .unwrap_or_default();
        println!("[{}] {}{}", f.plugin, origin, f.message);
        if let Some(suggestion) = &f.suggested_replacement {
            println!("    suggested: {}", suggestion);
        }
    }
    findings.len()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = env::current_dir().context("reading current directory")?;
    let config = load_config(&cli, &cwd)?;
    let base_dir = if config.global.base_dir.as_os_str().is_empty() {
        cwd.clone()
    } else {
        config.global.base_dir.clone()
    };

    let files = if cli.paths.is_empty() {
        discover_configured_files(&config, &base_dir)?
    } else {
        expand_cli_paths(&cli.paths, &base_dir)?
    };

    if files.is_empty() {
        eprintln!("No policy files found to analyze.");
        return Ok(());
    }

    let mut extra_defs = config.global.extra_defs.clone();
    extra_defs.extend(cli.extra_defs.iter().cloned());

    let policy = SourcePolicy::build(&files, &extra_defs, &base_dir, config.global.map_neverallows)
        .context("building source policy")?;

    // Plugins are pure functions over a read-only SourcePolicy, so they can
    // run independently in parallel once the policy is built.
    let all_findings: Vec<Finding> = PLUGINS
        .par_iter()
        .filter(|plugin| config.is_enabled(plugin.name))
        .flat_map(|plugin| {
            let plugin_cfg = config.plugin(plugin.name);
            (plugin.run)(&policy, &plugin_cfg)
        })
        .collect();

    let count = print_findings(&all_findings);
    println!("\n{} finding(s) reported.", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use selint_core::finding::Origin;

    #[test]
    fn print_findings_counts_and_formats() {
        let findings = vec![
            Finding::new("dangerous_rules", "0.90: allow foo_t bar_t:file execute;")
                .with_origin(PathBuf::from("domain.te"), 12),
            Finding::new("global_macros", "rule could use macro(s): net_domain")
                .with_suggestion("net_domain(foo_t);"),
        ];
        assert_eq!(print_findings(&findings), 2);
        assert_eq!(
            findings[0].origins,
            vec![Origin { file: PathBuf::from("domain.te"), line: 12 }]
        );
    }

    #[test]
    fn discover_configured_files_orders_pre_te_post() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path();
        fs::write(base.join("pre_file"), "").unwrap();
        fs::write(base.join("post_file"), "").unwrap();
        fs::create_dir_all(base.join("sepolicy")).unwrap();
        fs::write(base.join("sepolicy").join("domain.te"), "").unwrap();

        let mut cfg = SelintConfig::default();
        cfg.global.policyfiles_static_pre = vec!["pre_file".to_string()];
        cfg.global.tefiles_dirs = vec![PathBuf::from("sepolicy")];
        cfg.global.policyfiles_static_post = vec!["post_file".to_string()];

        let files = discover_configured_files(&cfg, base).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("pre_file"));
        assert!(files[1].ends_with("domain.te"));
        assert!(files[2].ends_with("post_file"));
    }
}
