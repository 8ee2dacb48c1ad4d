//! Directory scanning and file reading.
//!
//! [`scan`] walks a directory tree depth-first and lazily, one directory
//! listing at a time. Entries whose name starts with `.` are skipped unless
//! [`ScanConfig::hidden`] is set, and symbolic links are followed at most once
//! per real target so link cycles terminate.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;

use crate::bridge::{self, ReadConfig};
use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

/// A predicate over paths relative to the scan base.
#[derive(Debug, Clone)]
pub enum FileMatcher {
    /// The relative path ends with this text, e.g. `.csv`.
    Suffix(String),
    /// A shell glob such as `**/*.rs`.
    Glob(glob::Pattern),
    /// A regular expression searched anywhere in the relative path.
    Regex(Regex),
}

impl FileMatcher {
    /// Compile a regular expression matcher.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(FileMatcher::Regex)
            .map_err(|err| PipelineError::Pattern {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })
    }

    pub fn matches(&self, relative: &str) -> bool {
        match self {
            FileMatcher::Suffix(suffix) => relative.ends_with(suffix.as_str()),
            FileMatcher::Glob(pattern) => pattern.matches(relative),
            FileMatcher::Regex(re) => re.is_match(relative),
        }
    }
}

impl FromStr for FileMatcher {
    type Err = PipelineError;

    /// `/text/` is a regex, text with glob metacharacters is a glob, anything
    /// else a suffix.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(pattern) = s.strip_prefix('/').and_then(|rest| rest.strip_suffix('/'))
            && !pattern.is_empty()
        {
            FileMatcher::regex(pattern)
        } else if s.contains(['?', '*', '[', ']']) {
            glob::Pattern::new(s)
                .map(FileMatcher::Glob)
                .map_err(|err| PipelineError::Pattern {
                    pattern: s.to_string(),
                    message: err.to_string(),
                })
        } else {
            Ok(FileMatcher::Suffix(s.to_string()))
        }
    }
}

/// Where and how to scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory to scan, relative to the working directory if not absolute.
    pub base: PathBuf,
    /// Include entries whose name starts with `.`.
    pub hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("."),
            hidden: false,
        }
    }
}

impl ScanConfig {
    pub fn base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// A file found by [`scan`].
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the scan base, `/`-separated.
    pub relative: String,
    pub metadata: Metadata,
}

struct Walk {
    base: PathBuf,
    matcher: FileMatcher,
    hidden: bool,
    pending: Vec<std::vec::IntoIter<PathBuf>>,
    visited: HashSet<PathBuf>,
}

impl Walk {
    fn open(config: &ScanConfig, matcher: FileMatcher) -> Result<Self> {
        let base = std::path::absolute(&config.base)?;
        let mut walk = Self {
            base: base.clone(),
            matcher,
            hidden: config.hidden,
            pending: Vec::new(),
            visited: HashSet::new(),
        };
        if let Ok(real) = fs::canonicalize(&base) {
            walk.visited.insert(real);
        }
        walk.descend(&base)?;
        Ok(walk)
    }

    fn descend(&mut self, dir: &Path) -> Result<()> {
        let mut children = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        children.sort();
        tracing::trace!(dir = %dir.display(), entries = children.len(), "scanning directory");
        self.pending.push(children.into_iter());
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.base)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn step(&mut self) -> Option<Result<ScanEntry>> {
        loop {
            let top = self.pending.last_mut()?;
            let Some(path) = top.next() else {
                self.pending.pop();
                continue;
            };
            let hidden = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            if hidden && !self.hidden {
                continue;
            }

            let link = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) => return Some(Err(err.into())),
            };
            let metadata = if link.file_type().is_symlink() {
                let Ok(real) = fs::canonicalize(&path) else {
                    tracing::debug!(path = %path.display(), "skipping dangling symlink");
                    continue;
                };
                if !self.visited.insert(real) {
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(meta) => meta,
                    Err(err) => return Some(Err(err.into())),
                }
            } else {
                link
            };

            if metadata.is_dir() {
                if let Err(err) = self.descend(&path) {
                    return Some(Err(err));
                }
                continue;
            }
            let relative = self.relative(&path);
            if self.matcher.matches(&relative) {
                return Some(Ok(ScanEntry {
                    path,
                    relative,
                    metadata,
                }));
            }
        }
    }
}

/// Walk `config.base` and yield the files accepted by `matcher`.
///
/// The directory is opened on first pull.
pub fn scan(matcher: FileMatcher, config: &ScanConfig) -> Sequence<ScanEntry> {
    let config = config.clone();
    let mut matcher = Some(matcher);
    let mut walk: Option<Walk> = None;
    Sequence::root(
        "dir",
        std::iter::from_fn(move || {
            if let Some(matcher) = matcher.take() {
                match Walk::open(&config, matcher) {
                    Ok(opened) => walk = Some(opened),
                    Err(err) => return Some(Err(err)),
                }
            }
            walk.as_mut()?.step()
        }),
    )
}

impl Sequence<String> {
    /// Treat each element as a file matcher and yield every matching entry.
    pub fn dir_entries(self, config: ScanConfig) -> Sequence<ScanEntry> {
        self.try_map(move |pattern| Ok(scan(pattern.parse()?, &config)))
            .flatten::<ScanEntry>()
    }

    /// Like [`dir_entries`](Self::dir_entries) but yields paths only.
    pub fn dir(self, config: ScanConfig) -> Sequence<String> {
        self.dir_entries(config)
            .map(|entry| entry.path.to_string_lossy().into_owned())
    }

    /// Treat each element as a file path and yield the file's contents.
    pub fn read(self, config: ReadConfig) -> Sequence<String> {
        self.try_map(move |path| bridge::read_file(path.trim(), &config))
            .flatten::<String>()
    }

    /// Like [`read`](Self::read) but yields raw byte chunks.
    pub fn read_bytes(self, config: ReadConfig) -> Sequence<Vec<u8>> {
        self.try_map(move |path| bridge::read_file_binary(path.trim(), &config))
            .flatten::<Vec<u8>>()
    }
}
