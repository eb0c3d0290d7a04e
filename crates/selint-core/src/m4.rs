//! M4 macro expansion driver (C1).
//!
//! Wraps the `m4` binary behind a freeze file built once from a set of macro
//! definition files, then reused for every subsequent expansion. A single
//! scratch file is reused across calls rather than piping through stdin,
//! since `m4`'s diagnostics are keyed to the input file name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::{Builder, TempDir};

use crate::error::PolicyError;

/// Handle to a frozen `m4` state file built from a fixed set of macro
/// definition files plus extra `-D` definitions. Deleted on drop.
struct FreezeFile {
    path: PathBuf,
}

impl FreezeFile {
    fn build(files: &[PathBuf], extra_defs: &[String], dir: &Path) -> Result<Self, PolicyError> {
        let path = dir.join("freezefile");
        let mut command = Command::new("m4");
        for def in extra_defs {
            command.arg("-D").arg(def);
        }
        command.arg("-s");
        command.args(files);
        command.arg("-F").arg(&path);

        log::debug!("generating freeze file {:?}: {:?}", path, command);
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
        Ok(FreezeFile { path })
    }
}

impl Drop for FreezeFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to remove freeze file {:?}: {}", self.path, e);
        }
    }
}

/// Either a managed temporary directory (removed on drop) or a caller-owned
/// directory that is left untouched.
enum ScratchDir {
    Managed(TempDir),
    PassThrough(PathBuf),
}

impl ScratchDir {
    fn path(&self) -> &Path {
        match self {
            ScratchDir::Managed(dir) => dir.path(),
            ScratchDir::PassThrough(path) => path.as_path(),
        }
    }
}

/// Drives `m4` expansions against a fixed set of macro files.
///
/// Not reentrant: `expand`/`dump` reuse a single scratch file per instance,
/// so concurrent calls on the same `M4Driver` race on that file. Use one
/// driver per thread if running plugins in parallel.
pub struct M4Driver {
    _scratch_dir: ScratchDir,
    freeze_file: FreezeFile,
    scratch_file: PathBuf,
}

impl M4Driver {
    /// Builds the freeze file from `files` (plus `extra_defs`) inside
    /// `tmpdir`, or a fresh managed temporary directory if `tmpdir` is
    /// `None`. Freeze-file creation failure is fatal.
    pub fn new(
        files: &[PathBuf],
        extra_defs: &[String],
        tmpdir: Option<PathBuf>,
    ) -> Result<Self, PolicyError> {
        let scratch_dir = match tmpdir {
            Some(dir) => ScratchDir::PassThrough(dir),
            None => {
                let dir = Builder::new()
                    .prefix("selint-m4-")
                    .tempdir()
                    .map_err(|e| PolicyError::Io {
                        path: std::env::temp_dir(),
                        source: e,
                    })?;
                log::debug!("created scratch directory {:?}", dir.path());
                ScratchDir::Managed(dir)
            }
        };

        let freeze_file = FreezeFile::build(files, extra_defs, scratch_dir.path())?;

        let scratch_file = scratch_dir.path().join("scratch");
        fs::File::create(&scratch_file).map_err(|e| PolicyError::Io {
            path: scratch_file.clone(),
            source: e,
        })?;

        Ok(M4Driver {
            _scratch_dir: scratch_dir,
            freeze_file,
            scratch_file,
        })
    }

    fn expansion_command(&self) -> Command {
        let mut command = Command::new("m4");
        command.arg("-R").arg(&self.freeze_file.path);
        command.arg(&self.scratch_file);
        command
    }

    fn write_scratch(&self, text: &str) -> Result<(), PolicyError> {
        let mut f = fs::File::create(&self.scratch_file).map_err(|e| PolicyError::Io {
            path: self.scratch_file.clone(),
            source: e,
        })?;
        f.write_all(text.as_bytes()).map_err(|e| PolicyError::Io {
            path: self.scratch_file.clone(),
            source: e,
        })
    }

    /// Expands `text` as an m4 macro invocation. Per-call failure is
    /// recoverable: it is logged and `None` is returned, not an error.
    pub fn expand(&self, text: &str) -> Option<String> {
        if let Err(e) = self.write_scratch(text) {
            log::warn!("failed to write scratch file for expansion: {}", e);
            return None;
        }
        let output = match self.expansion_command().output() {
            Ok(o) => o,
            Err(e) => {
                log::warn!("failed to spawn m4: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            log::warn!(
                "m4 expansion failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Dumps the definition of macro `name` via `dumpdef`, stripping the
    /// leading `name:` line that `m4 -s`/`dumpdef` prepends.
    pub fn dump(&self, name: &str) -> Option<String> {
        let command_text = format!("dumpdef(`{}')", name);
        if let Err(e) = self.write_scratch(&command_text) {
            log::warn!("failed to write scratch file for dump: {}", e);
            return None;
        }
        let output = match self.expansion_command().output() {
            Ok(o) => o,
            Err(e) => {
                log::warn!("failed to spawn m4: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            log::warn!(
                "m4 dump of \"{}\" failed: {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }
        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        let prefix = format!("{}:", name);
        match raw.find('\n') {
            Some(idx) if raw[..idx].trim_start().starts_with(&prefix) => {
                Some(raw[idx + 1..].to_string())
            }
            _ => Some(raw),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    fn which_m4() -> bool {
        Command::new("m4")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn macro_file(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("macros.m4");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn expands_a_simple_macro() {
        if !which_m4() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let file = macro_file(dir.path(), "define(`greet', `hello $1')\n");
        let driver = M4Driver::new(&[file], &[], None).unwrap();
        let out = driver.expand("greet(world)").unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[test]
    fn recoverable_expansion_failure_returns_none() {
        if !which_m4() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let file = macro_file(dir.path(), "define(`greet', `hello $1')\n");
        let driver = M4Driver::new(&[file], &[], None).unwrap();
        // Unbalanced quote: m4 will complain but the driver must not panic.
        let out = driver.expand("greet(`world)");
        // Either a degenerate expansion or None; must not panic either way.
        let _ = out;
    }

    #[test]
    fn missing_macro_files_make_freeze_fail() {
        if !which_m4() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.m4");
        let result = M4Driver::new(&[missing], &[], None);
        assert!(result.is_err());
    }
}
