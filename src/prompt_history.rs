/// Prompt history: every line the user submits, newest last.
///
/// Stored as one JSON array in `<state_dir>/prompt_history.json`. Persistence
/// is best-effort: a missing or unreadable file starts an empty history, and
/// writes go through the dispatcher so the control loop never touches disk.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct PromptHistory {
    entries: Vec<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

pub fn history_path(state_dir: &Path) -> PathBuf {
    state_dir.join("prompt_history.json")
}

impl PromptHistory {
    /// In-memory only; nothing is ever written.
    pub fn ephemeral(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity: capacity.max(1), path: None }
    }

    pub fn load(path: PathBuf, capacity: usize) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring unreadable prompt history: {e}");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        let mut h = Self { entries, capacity: capacity.max(1), path: Some(path) };
        h.trim();
        h
    }

    /// Record a submitted line. Blank lines and immediate repeats are skipped.
    /// Returns true when the history changed.
    pub fn push(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || self.entries.last().is_some_and(|l| l == line) {
            return false;
        }
        self.entries.push(line.to_string());
        self.trim();
        true
    }

    fn trim(&mut self) {
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Case-insensitive substring matches, newest first.
    pub fn search(&self, query: &str) -> Vec<String> {
        let q = query.to_lowercase();
        self.entries
            .iter()
            .rev()
            .filter(|e| q.is_empty() || e.to_lowercase().contains(&q))
            .cloned()
            .collect()
    }
}

/// Write `entries` to `path`, replacing the file atomically.
pub fn save_entries(path: &Path, entries: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_skips_blank_and_repeats() {
        let mut h = PromptHistory::ephemeral(10);
        assert!(h.push("hello"));
        assert!(!h.push("hello"));
        assert!(!h.push("   "));
        assert!(h.push("/plan build X"));
        assert!(h.push("hello"));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut h = PromptHistory::ephemeral(2);
        h.push("a");
        h.push("b");
        h.push("c");
        assert_eq!(h.entries(), ["b", "c"]);
    }

    #[test]
    fn test_search_newest_first() {
        let mut h = PromptHistory::ephemeral(10);
        h.push("/plan build X");
        h.push("hello");
        h.push("/PLAN again");
        assert_eq!(h.search("plan"), vec!["/PLAN again", "/plan build X"]);
        assert_eq!(h.search("").len(), 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir.path().join("state"));
        let mut h = PromptHistory::load(path.clone(), 10);
        assert!(h.is_empty());
        h.push("one");
        h.push("two");
        save_entries(&path, h.entries()).unwrap();

        let back = PromptHistory::load(path, 1);
        assert_eq!(back.entries(), ["two"]);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt_history.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(PromptHistory::load(path, 10).is_empty());
    }
}
