//! `ContractSource` — identifies *what to build* (spec.md §3) — and the
//! Phase 1 git worktree preparation described in spec.md §4.2.

use crate::error::{bail, AnyResult};
use crate::identity::sanitize_revision;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const HEAD: &str = "HEAD";

/// Identifies the source crate to build. `revision == "HEAD"` means
/// "working tree, may be dirty" (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractSource {
    pub repository: Option<String>,
    pub revision: Option<String>,
    pub workspace: Option<PathBuf>,
    #[serde(rename = "crate")]
    pub crate_name: String,
    pub features: Vec<String>,
    pub dirty: bool,
}

impl ContractSource {
    pub fn new(crate_name: impl Into<String>) -> Self {
        Self {
            repository: None,
            revision: None,
            workspace: None,
            crate_name: crate_name.into(),
            features: Vec::new(),
            dirty: false,
        }
    }

    pub fn at_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn in_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn is_head(&self) -> bool {
        matches!(self.revision.as_deref(), None | Some(HEAD))
    }

    /// A stable key for (crate, revision, features, workspace) — the
    /// identity that makes `build()` idempotent by content, per
    /// spec.md §4.1.
    pub fn build_key(&self) -> String {
        let rev = sanitize_revision(self.revision.as_deref().unwrap_or(HEAD));
        let mut features = self.features.clone();
        features.sort();
        format!("{}@{}#{}", crate::identity::sanitize_crate_name(&self.crate_name), rev, features.join(","))
    }
}

/// Result of Phase 1: a directory cargo can build `crate_name` from.
pub struct PreparedSource {
    pub build_dir: PathBuf,
    pub dirty: bool,
}

/// Phase 1 — source preparation (spec.md §4.2).
///
/// `workspace_root` is where `ContractSource`s with no `repository` are
/// assumed to live (the local checkout driving the build). `scratch_root`
/// is where non-HEAD revisions are cloned into, keyed by sanitized
/// revision so repeated builds of the same revision reuse the clone.
pub fn prepare(source: &ContractSource, workspace_root: &Path, scratch_root: &Path) -> AnyResult<PreparedSource> {
    if source.is_head() {
        let build_dir = source
            .workspace
            .clone()
            .unwrap_or_else(|| workspace_root.to_path_buf());
        let dirty = working_tree_is_dirty(&build_dir)?;
        return Ok(PreparedSource { build_dir, dirty: dirty || source.dirty });
    }

    let revision = source.revision.as_deref().unwrap_or(HEAD);
    let sanitized = sanitize_revision(revision);
    let clone_dir = scratch_root.join(&sanitized);

    if clone_dir.exists() {
        return Ok(PreparedSource { build_dir: clone_dir, dirty: false });
    }

    let bare_git = scratch_root.join("_bare_git");
    copy_git_dir(workspace_root, &bare_git)?;
    strip_worktree_config(&bare_git)?;
    ensure_ref_exists(&bare_git, revision)?;

    run(Command::new("git")
        .args(["clone", "--recursive", "-b", revision])
        .arg(&bare_git)
        .arg(&clone_dir))?;

    run(Command::new("git")
        .args(["submodule", "update", "--init", "--recursive"])
        .current_dir(&clone_dir))?;

    Ok(PreparedSource { build_dir: clone_dir, dirty: false })
}

fn copy_git_dir(workspace_root: &Path, dest: &Path) -> AnyResult<()> {
    if dest.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dest.parent().unwrap_or(Path::new(".")))?;
    run(Command::new("cp")
        .arg("-r")
        .arg(workspace_root.join(".git"))
        .arg(dest))?;
    Ok(())
}

fn strip_worktree_config(bare_git: &Path) -> AnyResult<()> {
    // Allow cloning from what is now a bare-ish repo: a `.git` copied
    // out of a worktree still carries a `worktree` entry in its config
    // pointing at the original checkout, which git refuses to clone
    // from. Ignore failure: the entry may simply not be present.
    let _ = Command::new("git")
        .args(["config", "--unset", "core.worktree"])
        .current_dir(bare_git)
        .output();
    Ok(())
}

fn ensure_ref_exists(bare_git: &Path, revision: &str) -> AnyResult<()> {
    let has_local = Command::new("git")
        .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{revision}")])
        .current_dir(bare_git)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if has_local {
        return Ok(());
    }

    let has_remote = Command::new("git")
        .args(["show-ref", "--verify", "--quiet", &format!("refs/remotes/origin/{revision}")])
        .current_dir(bare_git)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if has_remote {
        run(Command::new("git")
            .args(["branch", revision, &format!("origin/{revision}")])
            .current_dir(bare_git))?;
        return Ok(());
    }

    if std::env::var("_NO_FETCH").is_ok() {
        bail!("revision {revision} not found locally and _NO_FETCH is set");
    }

    run(Command::new("git")
        .args(["fetch", "origin", &format!("{revision}:refs/heads/{revision}")])
        .current_dir(bare_git))?;
    Ok(())
}

fn working_tree_is_dirty(dir: &Path) -> AnyResult<bool> {
    if !dir.join(".git").exists() {
        return Ok(false);
    }
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(dir)
        .output()?;
    Ok(!output.stdout.is_empty())
}

fn run(cmd: &mut Command) -> AnyResult<()> {
    let status = cmd.status()?;
    if !status.success() {
        bail!("command failed: {:?} (status {status})", cmd);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_key_is_stable_for_same_inputs() {
        let a = ContractSource::new("my-token").at_revision("v1.0.0");
        let b = ContractSource::new("my-token").at_revision("v1.0.0");
        assert_eq!(a.build_key(), b.build_key());
    }

    #[test]
    fn build_key_differs_on_features() {
        let a = ContractSource::new("my-token");
        let mut b = a.clone();
        b.features.push("gov".into());
        assert_ne!(a.build_key(), b.build_key());
    }

    #[test]
    fn head_revision_detected() {
        assert!(ContractSource::new("x").is_head());
        assert!(!ContractSource::new("x").at_revision("v2").is_head());
    }
}
