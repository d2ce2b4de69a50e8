// Input discovery - filename patterns and "latest file" selection
//
// Listing is separate from ordering: callers pass a `Recency` so that the
// choice of "latest" can be tested on plain `Candidate` values.

use crate::error::{Error, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::debug;

// ============================================================================
// FILE PATTERNS
// ============================================================================

/// Case-insensitive filename pattern, `*` and `?` wildcards.
///
/// Several globs may be given; a name matches when any of them does
/// (`*Shortages*.csv` or `*Shortages*.xls` ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    globs: Vec<String>,
}

impl FilePattern {
    pub fn new(glob: &str) -> Self {
        FilePattern {
            globs: vec![glob.to_string()],
        }
    }

    pub fn any_of(globs: &[&str]) -> Self {
        FilePattern {
            globs: globs.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Check if a bare file name matches. A glob that does not parse matches nothing.
    pub fn matches(&self, file_name: &str) -> bool {
        self.globs.iter().any(|glob| {
            Pattern::new(glob)
                .map(|p| p.matches_with(file_name, MATCH_OPTIONS))
                .unwrap_or(false)
        })
    }

    /// Pattern as shown to the operator
    pub fn describe(&self) -> String {
        self.globs.join(" | ")
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

// ============================================================================
// CANDIDATES
// ============================================================================

/// A file in the input directory that matched a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: Option<SystemTime>,
}

impl Candidate {
    pub fn new(path: PathBuf, modified: Option<SystemTime>) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Candidate {
            path,
            file_name,
            modified,
        }
    }
}

/// List regular files directly inside `dir` whose names match `pattern`.
///
/// A missing directory yields no candidates; the caller decides whether
/// that is fatal.
pub fn list_candidates(dir: &Path, pattern: &FilePattern) -> Result<Vec<Candidate>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "input directory does not exist");
            return Ok(Vec::new());
        }
        Err(err) => return Err(Error::io(dir, err)),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let metadata = entry.metadata().map_err(|e| Error::io(entry.path(), e))?;
        if !metadata.is_file() {
            continue;
        }

        let candidate = Candidate::new(entry.path(), metadata.modified().ok());
        if pattern.matches(&candidate.file_name) {
            candidates.push(candidate);
        }
    }

    // read_dir order is platform-dependent
    candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    debug!(
        dir = %dir.display(),
        pattern = %pattern.describe(),
        count = candidates.len(),
        "listed candidates"
    );
    Ok(candidates)
}

// ============================================================================
// RECENCY
// ============================================================================

/// Orders candidates so that the greatest one is the "latest"
pub trait Recency {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering;

    fn name(&self) -> &str;
}

/// Lexicographic file name order (the naming conventions embed sortable dates).
///
/// Case is folded to agree with `FilePattern` matching; the raw name breaks ties.
pub struct ByFileName;

impl Recency for ByFileName {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.file_name
            .to_lowercase()
            .cmp(&b.file_name.to_lowercase())
            .then_with(|| a.file_name.cmp(&b.file_name))
    }

    fn name(&self) -> &str {
        "name"
    }
}

/// Modification time, ties broken by file name. Unknown mtimes sort first.
pub struct ByModifiedTime;

impl Recency for ByModifiedTime {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.file_name.cmp(&b.file_name))
    }

    fn name(&self) -> &str {
        "modified"
    }
}

/// Configurable choice of `Recency`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyKind {
    #[default]
    Name,
    Modified,
}

impl RecencyKind {
    pub fn selector(&self) -> Box<dyn Recency> {
        match self {
            RecencyKind::Name => Box::new(ByFileName),
            RecencyKind::Modified => Box::new(ByModifiedTime),
        }
    }
}

impl FromStr for RecencyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" => Ok(RecencyKind::Name),
            "modified" | "mtime" => Ok(RecencyKind::Modified),
            other => Err(format!("unknown recency `{}` (expected name or modified)", other)),
        }
    }
}

/// Pick the greatest candidate under `recency`
pub fn latest<'a>(candidates: &'a [Candidate], recency: &dyn Recency) -> Option<&'a Candidate> {
    candidates.iter().max_by(|a, b| recency.compare(a, b))
}

/// List and select in one step; `NoInputFound` when nothing matches
pub fn find_latest(dir: &Path, pattern: &FilePattern, recency: &dyn Recency) -> Result<Candidate> {
    let candidates = list_candidates(dir, pattern)?;
    latest(&candidates, recency)
        .cloned()
        .ok_or_else(|| Error::NoInputFound {
            pattern: pattern.describe(),
            dir: dir.to_path_buf(),
        })
}
