//! Explorer panel model: one directory listing plus a cursor.
//!
//! Listing is plain blocking `std::fs`; the controller runs it through the
//! dispatcher and hands the result back with `ExplorerState::set_listing`.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    ".next",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    "coverage",
];

/// Hidden entries and build/dependency directories never show up in the
/// explorer and never trigger a refresh.
pub fn is_noise(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// The synthetic `..` row.
    pub is_parent: bool,
}

/// List `dir`: a `..` row unless `dir` is `root`, then directories, then
/// files, each group sorted case-insensitively.
pub fn list_dir(dir: &Path, root: &Path) -> Result<Vec<ExplorerEntry>> {
    let read = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_noise(&name) {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        let item = ExplorerEntry { name, path, is_dir, is_parent: false };
        if is_dir { dirs.push(item) } else { files.push(item) }
    }
    dirs.sort_by_key(|e| e.name.to_lowercase());
    files.sort_by_key(|e| e.name.to_lowercase());

    let mut out = Vec::with_capacity(dirs.len() + files.len() + 1);
    if dir != root
        && let Some(parent) = dir.parent()
    {
        out.push(ExplorerEntry {
            name: "..".to_string(),
            path: parent.to_path_buf(),
            is_dir: true,
            is_parent: true,
        });
    }
    out.extend(dirs);
    out.extend(files);
    Ok(out)
}

/// Read a file for the File Viewer overlay. Binary content is refused.
pub fn read_text(path: &Path, max_bytes: usize) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let slice = &bytes[..bytes.len().min(max_bytes)];
    if slice.contains(&0) {
        anyhow::bail!("{} looks like a binary file", path.display());
    }
    let mut text = String::from_utf8_lossy(slice).into_owned();
    if bytes.len() > max_bytes {
        text.push_str(&format!("\n[truncated at {max_bytes} bytes]"));
    }
    Ok(text)
}

// ── Panel state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExplorerState {
    pub root: PathBuf,
    pub dir: PathBuf,
    pub entries: Vec<ExplorerEntry>,
    pub selected: usize,
    pub error: Option<String>,
    /// A listing has been requested and not yet applied.
    pub loading: bool,
}

impl ExplorerState {
    pub fn new(root: PathBuf) -> Self {
        Self {
            dir: root.clone(),
            root,
            entries: Vec::new(),
            selected: 0,
            error: None,
            loading: false,
        }
    }

    /// Apply a finished listing. Results for a directory we've since left are ignored.
    pub fn set_listing(&mut self, dir: &Path, result: Result<Vec<ExplorerEntry>, String>) -> bool {
        if dir != self.dir {
            return false;
        }
        self.loading = false;
        match result {
            Ok(entries) => {
                // keep the cursor on the same name across refreshes
                let keep = self.selected_entry().map(|e| e.name.clone());
                self.entries = entries;
                self.error = None;
                self.selected = keep
                    .and_then(|name| self.entries.iter().position(|e| e.name == name))
                    .unwrap_or(0);
            }
            Err(e) => {
                self.entries.clear();
                self.selected = 0;
                self.error = Some(e);
            }
        }
        true
    }

    pub fn selected_entry(&self) -> Option<&ExplorerEntry> {
        self.entries.get(self.selected)
    }

    pub fn move_by(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.selected = 0;
            return;
        }
        let max = self.entries.len() - 1;
        self.selected = self.selected.saturating_add_signed(delta).min(max);
    }

    pub fn home(&mut self) {
        self.selected = 0;
    }

    pub fn end(&mut self) {
        self.selected = self.entries.len().saturating_sub(1);
    }

    /// Switch to `dir`; the caller dispatches the listing.
    pub fn enter(&mut self, dir: PathBuf) {
        self.dir = dir;
        self.entries.clear();
        self.selected = 0;
        self.loading = true;
    }

    /// Directory shown relative to the root, for the panel title.
    pub fn display_dir(&self) -> String {
        match self.dir.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => format!("./{}", rel.display()),
            Err(_) => self.dir.display().to_string(),
        }
    }
}
