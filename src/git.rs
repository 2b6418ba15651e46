/// Working-tree diff for the Diff View overlay.
///
/// Everything here blocks on a `git` child process, so callers run it through
/// `Dispatcher::submit_blocking`. Not being in a repo is an error the
/// controller shows in the overlay, never a panic.
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

pub struct GitRepo {
    /// Absolute path to the repo root (the directory containing `.git/`).
    pub root: PathBuf,
}

impl GitRepo {
    /// Open the repository containing `path`.
    /// Returns `None` if `path` is not inside a git repo, or if git is not installed.
    pub fn open(path: &Path) -> Option<Self> {
        let output = std::process::Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let root = String::from_utf8(output.stdout).ok()?;
        Some(Self {
            root: PathBuf::from(root.trim()),
        })
    }

    /// Unstaged and staged changes against HEAD, with a stat header.
    pub fn working_diff(&self) -> Result<String> {
        let stat = self.run_git(&["diff", "HEAD", "--stat"])?;
        let full = self.run_git(&["diff", "HEAD", "--no-color"])?;
        if full.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{}\n{}", stat.trim_end(), full))
    }

    /// Run a git command in the repo root. Returns stdout on success, Err(stderr) on failure.
    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| anyhow!("failed to run git: {e}"))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow!("git {}: {}", args.join(" "), stderr.trim()))
        }
    }
}

/// Diff text for `dir`, or a one-line explanation when there is nothing to show.
pub fn diff_for(dir: &Path) -> Result<String> {
    let repo = GitRepo::open(dir).ok_or_else(|| anyhow!("{} is not inside a git repository", dir.display()))?;
    let diff = repo.working_diff()?;
    if diff.is_empty() {
        Ok("No changes in the working tree.".to_string())
    } else {
        Ok(diff)
    }
}
