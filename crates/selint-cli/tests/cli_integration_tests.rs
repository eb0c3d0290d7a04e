use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

/// A minimal, self-contained `.te` fragment that m4 can process with no
/// external support macros: a domain type and a single allow rule granting
/// a dangerous permission (execute across domains).
const DANGEROUS_TE: &str = r#"
type foo_t;
type bar_t;
allow foo_t bar_t:process { transition };
allow foo_t bar_t:file { execute };
"#;

/// A `.te` fragment with no dangerous or unusual rules, just a benign
/// read.
const CLEAN_TE: &str = r#"
type foo_t;
type bar_t;
allow foo_t bar_t:file { read };
"#;

#[test]
fn test_cli_no_paths_and_no_config_reports_no_files() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path());

    cmd.assert()
        .success()
        .stderr(predicates::str::contains("No policy files found to analyze."));
}

#[test]
fn test_cli_lints_explicit_file_and_reports_findings() {
    let temp_dir = TempDir::new().unwrap();
    let te_file = temp_dir.child("domain.te");
    te_file.write_str(DANGEROUS_TE).unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
supported_rule_types = ["allow"]
"#,
        )
        .unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path()).arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"))
        .stdout(predicates::str::contains("finding(s) reported"));
}

#[test]
fn test_cli_clean_policy_reports_zero_findings() {
    let temp_dir = TempDir::new().unwrap();
    let te_file = temp_dir.child("domain.te");
    te_file.write_str(CLEAN_TE).unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.99
scoring_system = "risk"
"#,
        )
        .unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path()).arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("0 finding(s) reported"));
}

#[test]
fn test_cli_exits_zero_even_with_findings() {
    let temp_dir = TempDir::new().unwrap();
    let te_file = temp_dir.child("domain.te");
    te_file.write_str(DANGEROUS_TE).unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path()).arg(te_file.path());

    // Per exit code semantics, findings alone never make the process fail.
    cmd.assert().success();
}

#[test]
fn test_cli_config_discovery_walks_up_from_cwd() {
    let temp_dir = TempDir::new().unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let nested = temp_dir.child("nested/deep");
    nested.create_dir_all().unwrap();
    let te_file = nested.child("domain.te");
    te_file.write_str(DANGEROUS_TE).unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(nested.path()).arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"));
}

#[test]
fn test_cli_selint_config_env_overrides_discovery() {
    let temp_dir = TempDir::new().unwrap();

    let local_config = temp_dir.child("selint.toml");
    local_config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.99
scoring_system = "risk"
"#,
        )
        .unwrap();

    let env_config = temp_dir.child("env_selint.toml");
    env_config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let te_file = temp_dir.child("domain.te");
    te_file.write_str(DANGEROUS_TE).unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path())
        .env("SELINT_CONFIG", env_config.path())
        .arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"));
}

#[test]
fn test_cli_explicit_config_flag_overrides_discovery() {
    let temp_dir = TempDir::new().unwrap();

    let local_config = temp_dir.child("selint.toml");
    local_config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.99
scoring_system = "risk"
"#,
        )
        .unwrap();

    let other_dir = TempDir::new().unwrap();
    let flag_config = other_dir.child("custom.toml");
    flag_config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let te_file = temp_dir.child("domain.te");
    te_file.write_str(DANGEROUS_TE).unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("-c")
        .arg(flag_config.path())
        .arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"));
}

#[test]
fn test_cli_directory_argument_walks_for_policy_files() {
    let temp_dir = TempDir::new().unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let policy_dir = temp_dir.child("sepolicy");
    policy_dir.create_dir_all().unwrap();
    policy_dir.child("domain.te").write_str(DANGEROUS_TE).unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path()).arg(policy_dir.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"));
}

#[test]
fn test_cli_extra_define_flag_is_passed_through() {
    let temp_dir = TempDir::new().unwrap();

    let config = temp_dir.child("selint.toml");
    config
        .write_str(
            r#"
[[plugin]]
name = "dangerous_rules"
score_threshold = 0.0
scoring_system = "risk"
"#,
        )
        .unwrap();

    let te_file = temp_dir.child("domain.te");
    te_file
        .write_str(
            r#"
ifdef(`extra_domain', `
type foo_t;
type bar_t;
allow foo_t bar_t:process { transition };
allow foo_t bar_t:file { execute };
')
"#,
        )
        .unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("-D")
        .arg("extra_domain=1")
        .arg(te_file.path());

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("[dangerous_rules]"));
}

#[test]
fn test_cli_verbose_flag_enables_debug_logging() {
    let temp_dir = TempDir::new().unwrap();
    let te_file = temp_dir.child("domain.te");
    te_file.write_str(CLEAN_TE).unwrap();

    let mut cmd = Command::cargo_bin("selint").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("-vvv")
        .arg(te_file.path());

    // Just assert the binary still runs cleanly with verbosity bumped;
    // actual log line format is env_logger's concern, not ours.
    cmd.assert().success();
}
