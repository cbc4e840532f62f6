// SPDX-License-Identifier: Apache-2.0

use glob::{MatchOptions, Paths, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Error, Result};

/// A directory to enumerate, with the label its files are routed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRoot {
    pub path: PathBuf,
    pub tag: String,
}

impl DiscoveryRoot {
    pub fn new(path: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
        }
    }

    /// Whether the path names an actual directory rather than nothing or a
    /// filesystem or drive root, which would overlap every other root.
    pub fn names_directory(&self) -> bool {
        match crate::archive::normalize(&self.path.to_string_lossy()).as_slice() {
            [] => false,
            [drive] => !drive.ends_with(':'),
            _ => true,
        }
    }
}

/// Reject roots that are empty or resolve to the filesystem root
pub fn check_roots(roots: &[DiscoveryRoot], kind: &str) -> std::result::Result<(), String> {
    match roots.iter().find(|r| !r.names_directory()) {
        Some(root) => Err(format!(
            "{} root {:?} must name a directory below the filesystem root",
            kind,
            root.path.display().to_string()
        )),
        None => Ok(()),
    }
}

/// One file found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Number of directory levels between the root and the file
    pub depth: usize,
    /// Routing label, `"{root_tag}.d{depth}"`
    pub tag: String,
}

/// FileFinder enumerates `*.{extension}` files under a set of roots, at every depth
/// from 0 up to and including `max_depth`.
///
/// Depth N is expressed as N `*` directory components in a glob pattern, so symlink
/// cycles cannot recurse past `max_depth`.
#[derive(Debug, Clone)]
pub struct FileFinder {
    roots: Vec<DiscoveryRoot>,
    max_depth: usize,
    extension: String,
    exclude: Vec<Pattern>,
}

impl FileFinder {
    pub fn new(roots: Vec<DiscoveryRoot>, max_depth: usize, extension: impl Into<String>) -> Self {
        Self {
            roots,
            max_depth,
            extension: extension.into().trim_start_matches('.').to_string(),
            exclude: Vec::new(),
        }
    }

    /// Skip files whose path matches any of `patterns`
    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self> {
        for p in patterns {
            let pattern = Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e)))?;
            self.exclude.push(pattern);
        }
        Ok(self)
    }

    pub fn roots(&self) -> &[DiscoveryRoot] {
        &self.roots
    }

    /// Lazily enumerate matching files. Each call is an independent pass; a file is
    /// yielded at most once per pass.
    pub fn discover(&self) -> Files {
        Files {
            finder: self.clone(),
            root_idx: 0,
            depth: 0,
            current: None,
            seen: HashSet::new(),
        }
    }

    /// Collect one full pass
    pub fn find_files(&self) -> Vec<DiscoveredFile> {
        self.discover().collect()
    }

    fn pattern_for(&self, root: &Path, depth: usize) -> String {
        let mut pattern = Pattern::escape(&root.to_string_lossy());
        for _ in 0..depth {
            pattern.push('/');
            pattern.push('*');
        }
        pattern.push_str("/*.");
        pattern.push_str(&Pattern::escape(&self.extension));
        pattern
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }
}

/// Lazily enumerate one pass over `roots` without exclusions.
pub fn discover(roots: &[DiscoveryRoot], max_depth: usize, extension: &str) -> Files {
    FileFinder::new(roots.to_vec(), max_depth, extension).discover()
}

/// Lazy iterator over one discovery pass
pub struct Files {
    finder: FileFinder,
    root_idx: usize,
    depth: usize,
    current: Option<(Paths, usize)>,
    seen: HashSet<PathBuf>,
}

impl Files {
    /// Advance to the next (root, depth) glob. Returns false when exhausted.
    fn next_glob(&mut self) -> bool {
        loop {
            let Some(root) = self.finder.roots.get(self.root_idx) else {
                return false;
            };

            if self.depth > self.finder.max_depth {
                self.root_idx += 1;
                self.depth = 0;
                continue;
            }

            if self.depth == 0 && !root.path.is_dir() {
                warn!(root = %root.path.display(), "Discovery root does not exist, skipping");
                self.root_idx += 1;
                continue;
            }

            let depth = self.depth;
            self.depth += 1;

            let pattern = self.finder.pattern_for(&root.path, depth);
            let options = MatchOptions {
                case_sensitive: !cfg!(windows),
                require_literal_separator: true,
                require_literal_leading_dot: false,
            };
            match glob::glob_with(&pattern, options) {
                Ok(paths) => {
                    self.current = Some((paths, depth));
                    return true;
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid discovery pattern");
                }
            }
        }
    }
}

impl Iterator for Files {
    type Item = DiscoveredFile;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() && !self.next_glob() {
                return None;
            }

            let Some((paths, depth)) = self.current.as_mut() else {
                continue;
            };
            let depth = *depth;

            match paths.next() {
                None => {
                    self.current = None;
                }
                Some(Err(e)) => {
                    debug!(path = %e.path().display(), error = %e.error(), "Skipping unreadable entry");
                }
                Some(Ok(path)) => {
                    if path.is_dir() || self.finder.is_excluded(&path) {
                        continue;
                    }
                    if !self.seen.insert(path.clone()) {
                        continue;
                    }
                    let root = &self.finder.roots[self.root_idx];
                    return Some(DiscoveredFile {
                        path,
                        depth,
                        tag: format!("{}.d{}", root.tag, depth),
                    });
                }
            }
        }
    }
}
