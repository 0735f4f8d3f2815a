//! Directory walk that groups sibling audio files into clips.
//!
//! [`ClipWalk`] is a lazy iterator over [`WalkEvent`]s. It walks directories
//! depth-first in file-name order and lists each directory's files in one
//! go, so every [`ClipGroup`] it yields already holds all of its formats.
//!
//! Per-path failures are yielded as events and remembered. When the walk
//! ends, [`ClipWalk::coverage`] says which parents were fully observed.
//! Clips can only be deleted under those parents.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Component, Path, PathBuf};

use globset::GlobSet;
use walkdir::{DirEntry, WalkDir};

use crate::error::CatalogError;
use crate::models::{AudioFormat, ClipGroup, ClipKey, ROOT_PARENT};

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub follow_symlinks: bool,
    /// Matched against root-relative paths of directories and files.
    pub exclude: GlobSet,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            exclude: GlobSet::empty(),
        }
    }
}

/// One item produced by the walk.
#[derive(Debug)]
pub enum WalkEvent {
    /// All recognized files for one `(parent, stem)`.
    Group(ClipGroup),
    /// A regular file whose extension is not a tracked format.
    Skipped(PathBuf),
    /// A directory or file that could not be read. The walk continues.
    Error(CatalogError),
}

/// Which parts of the tree the walk observed completely.
#[derive(Debug, Clone, Default)]
pub struct WalkCoverage {
    complete: bool,
    failed: Vec<String>,
}

impl WalkCoverage {
    pub fn new(complete: bool, failed: Vec<String>) -> Self {
        Self { complete, failed }
    }

    /// True when the walk ran to the end and no failed directory is `parent`
    /// or one of its ancestors.
    pub fn covers(&self, parent: &str) -> bool {
        if !self.complete {
            return false;
        }
        !self.failed.iter().any(|f| {
            f == ROOT_PARENT || f == parent || parent.starts_with(&format!("{}/", f))
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn failed_dirs(&self) -> &[String] {
        &self.failed
    }
}

type DirIter = Box<dyn Iterator<Item = walkdir::Result<DirEntry>>>;

/// Lazy, single-pass walk of a clip root. Restart by opening a new walk.
pub struct ClipWalk {
    root: PathBuf,
    options: WalkOptions,
    dirs: DirIter,
    pending: VecDeque<WalkEvent>,
    failed: Vec<String>,
    /// Entries `list_dir` already reported; walkdir may fail on them again.
    reported: HashSet<PathBuf>,
    dirs_visited: u64,
    exhausted: bool,
}

impl ClipWalk {
    /// Open a walk. Fails only when the root itself is unusable.
    pub fn open(root: &Path, options: WalkOptions) -> Result<Self, CatalogError> {
        let fatal = |reason: String| CatalogError::FatalRoot {
            path: root.to_path_buf(),
            reason,
        };

        let meta = fs::metadata(root).map_err(|e| fatal(e.to_string()))?;
        if !meta.is_dir() {
            return Err(fatal("not a directory".to_string()));
        }
        fs::read_dir(root).map_err(|e| fatal(e.to_string()))?;

        let filter_root = root.to_path_buf();
        let exclude = options.exclude.clone();
        let dirs = WalkDir::new(root)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                if !e.file_type().is_dir() {
                    return false;
                }
                if e.depth() == 0 {
                    return true;
                }
                match relative_str(&filter_root, e.path()) {
                    Some(rel) => !exclude.is_match(&rel),
                    None => true,
                }
            });

        Ok(Self {
            root: root.to_path_buf(),
            options,
            dirs: Box::new(dirs),
            pending: VecDeque::new(),
            failed: Vec::new(),
            reported: HashSet::new(),
            dirs_visited: 0,
            exhausted: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dirs_visited(&self) -> u64 {
        self.dirs_visited
    }

    /// Coverage of the walk so far. Only a fully drained walk covers anything.
    pub fn coverage(&self) -> WalkCoverage {
        WalkCoverage {
            complete: self.exhausted,
            failed: self.failed.clone(),
        }
    }

    /// Returns `false` when the directory was already marked.
    fn mark_failed(&mut self, path: &Path) -> bool {
        let rel = relative_str(&self.root, path)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| ROOT_PARENT.to_string());
        if self.failed.contains(&rel) {
            return false;
        }
        tracing::warn!(dir = %rel, "directory not fully read; its clips will not be deleted");
        self.failed.push(rel);
        true
    }

    /// List one directory and queue its events.
    fn list_dir(&mut self, dir: &Path) {
        self.dirs_visited += 1;

        let parent = match relative_str(&self.root, dir) {
            Some(rel) if rel.is_empty() => ROOT_PARENT.to_string(),
            Some(rel) => rel,
            None => {
                self.pending.push_back(WalkEvent::Error(CatalogError::path_error(
                    dir,
                    "directory name is not valid UTF-8",
                )));
                return;
            }
        };

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = self.mark_failed(dir);
                self.pending
                    .push_back(WalkEvent::Error(CatalogError::path_error(dir, e)));
                return;
            }
        };

        let mut groups: BTreeMap<String, ClipGroup> = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut errors = Vec::new();
        let mut partial = false;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    partial = true;
                    errors.push(CatalogError::path_error(dir, e));
                    continue;
                }
            };
            let path = entry.path();

            match self.is_regular_file(&entry) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    partial = true;
                    self.reported.insert(path.clone());
                    errors.push(CatalogError::path_error(&path, e));
                    continue;
                }
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                partial = true;
                self.reported.insert(path.clone());
                errors.push(CatalogError::path_error(&path, "file name is not valid UTF-8"));
                continue;
            };

            if let Some(rel) = relative_str(&self.root, &path) {
                if self.options.exclude.is_match(&rel) {
                    continue;
                }
            }

            let file = Path::new(&name);
            let format = file
                .extension()
                .and_then(|e| e.to_str())
                .and_then(AudioFormat::from_extension);
            let stem = file.file_stem().and_then(|s| s.to_str());

            match (format, stem) {
                (Some(format), Some(stem)) => {
                    groups
                        .entry(stem.to_string())
                        .or_insert_with(|| ClipGroup::new(&ClipKey::new(parent.clone(), stem)))
                        .add_file(format, &name);
                }
                _ => skipped.push(path),
            }
        }

        if partial {
            let _ = self.mark_failed(dir);
        }

        self.pending.extend(errors.into_iter().map(WalkEvent::Error));
        self.pending.extend(skipped.into_iter().map(WalkEvent::Skipped));
        self.pending.extend(groups.into_values().map(WalkEvent::Group));
    }

    fn is_regular_file(&self, entry: &fs::DirEntry) -> std::io::Result<bool> {
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            if !self.options.follow_symlinks {
                return Ok(false);
            }
            return Ok(fs::metadata(entry.path())?.is_file());
        }
        Ok(file_type.is_file())
    }
}

impl Iterator for ClipWalk {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.exhausted {
                return None;
            }
            match self.dirs.next() {
                Some(Ok(entry)) => {
                    let dir = entry.path().to_path_buf();
                    self.list_dir(&dir);
                }
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    if self.reported.contains(&path) {
                        continue;
                    }
                    // A symlink loop is not a read failure; nothing below it is new.
                    // Otherwise the failing directory, or a failing file's parent,
                    // loses coverage. A directory already marked was reported once.
                    let fresh = if err.loop_ancestor().is_some() {
                        true
                    } else if path.is_dir() {
                        self.mark_failed(&path)
                    } else {
                        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
                        self.mark_failed(&dir)
                    };
                    if fresh {
                        self.pending
                            .push_back(WalkEvent::Error(CatalogError::path_error(path, err)));
                    }
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// Root-relative path with `/` separators; `None` when not UTF-8 or not under root.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
