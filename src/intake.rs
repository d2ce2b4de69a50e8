// Distribution Intake - NCTS archive members and the shortages export
//
// Archive members are described by a table of `MemberRule`s that is walked
// once; zero or several matches for a required rule fail the same way.

use crate::config::Config;
use crate::discovery::{find_latest, latest, list_candidates, Candidate, FilePattern, Recency};
use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

pub const ARCHIVE_PATTERN: &str = "NCTS_SCT_RF2_DISTRIBUTION_*.zip";
pub const SHORTAGES_GLOBS: &[&str] = &["*shortages*.csv", "*shortages*.xls", "*shortages*.xlsx"];
pub const SHORTAGES_TARGET: &str = "MedicineShortagesActiveResultSummaryExport.csv";

// ============================================================================
// MEMBER TABLE
// ============================================================================

/// Fixed subdirectory of the upload tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Destination {
    Terminology,
    Map,
}

impl Destination {
    pub fn relative_dir(&self) -> PathBuf {
        match self {
            Destination::Terminology => Path::new("AMTv4").join("Terminology"),
            Destination::Map => Path::new("AMTv4").join("Map"),
        }
    }
}

/// One archive member to pull out of the distribution
#[derive(Debug, Clone, Copy)]
pub struct MemberRule {
    /// Substring of the member's file name
    pub marker: &'static str,

    /// File name substrings that disqualify an otherwise matching member
    pub excludes: &'static [&'static str],

    /// Missing required members fail the run; others are skipped with a warning
    pub required: bool,

    pub destination: Destination,
}

pub const MEMBER_RULES: &[MemberRule] = &[
    MemberRule {
        marker: "Relationship_Snapshot",
        excludes: &["StatedRelationship"],
        required: true,
        destination: Destination::Terminology,
    },
    MemberRule {
        marker: "SimpleMapSnapshot",
        excludes: &[],
        required: true,
        destination: Destination::Map,
    },
];

impl MemberRule {
    /// Check an archive entry path (directories already excluded)
    pub fn matches(&self, entry_path: &str) -> bool {
        if is_auxiliary(entry_path) {
            return false;
        }

        let file_name = entry_file_name(entry_path);
        file_name.to_lowercase().ends_with(".txt")
            && file_name.contains(self.marker)
            && !self.excludes.iter().any(|ex| file_name.contains(ex))
    }
}

/// Last path segment; archives built on Windows may use `\`
fn entry_file_name(entry_path: &str) -> &str {
    entry_path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(entry_path)
}

/// macOS resource forks and similar archive noise
fn is_auxiliary(entry_path: &str) -> bool {
    entry_path
        .split(|c| c == '/' || c == '\\')
        .any(|segment| segment == "__MACOSX")
        || entry_file_name(entry_path).starts_with("._")
}

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

/// `_AU<module>_<YYYYMMDD>` followed by a non-digit or the end of the name
fn release_suffix() -> Option<&'static Regex> {
    static SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();
    SUFFIX
        .get_or_init(|| Regex::new(r"_AU\d+_\d{8}(\D|$)").ok())
        .as_ref()
}

/// Strip the `_AU<module>_<YYYYMMDD>` release suffix, keeping prefix and extension.
///
/// `xRelationship_Snapshot_AU1000_20250101.txt` → `xRelationship_Snapshot.txt`
pub fn normalize_name(file_name: &str) -> String {
    match release_suffix() {
        Some(suffix) => suffix.replace_all(file_name, "${1}").into_owned(),
        None => file_name.to_string(),
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PlacedFile {
    pub marker: String,
    pub source_entry: String,
    pub destination: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub archive: PathBuf,
    pub placed: Vec<PlacedFile>,
    /// Markers of non-required members that were absent
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShortagesCopy {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeReport {
    pub snapshots: SnapshotReport,
    /// None when no shortages file was present
    pub shortages: Option<ShortagesCopy>,
}

// ============================================================================
// INTAKE
// ============================================================================

/// Run both intake steps.
///
/// The snapshot and shortages steps do not depend on each other, so both run
/// before the first hard error is returned. Files placed before a failure
/// stay where they are.
pub fn run_intake(config: &Config) -> Result<IntakeReport> {
    let recency = config.recency.selector();
    info!(
        working_dir = %config.working_dir.display(),
        upload_dir = %config.upload_dir.display(),
        recency = recency.name(),
        "starting distribution intake"
    );

    let snapshots = place_snapshots(&config.working_dir, &config.upload_dir, recency.as_ref());
    let shortages = place_shortages(&config.working_dir, &config.upload_dir, recency.as_ref());

    match (snapshots, shortages) {
        (Ok(snapshots), Ok(shortages)) => Ok(IntakeReport {
            snapshots,
            shortages,
        }),
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(shortages_err)) => {
            error!(error = %shortages_err, "shortages step failed");
            Err(err)
        }
    }
}

/// Find the latest distribution archive and place its snapshot members
pub fn place_snapshots(
    working_dir: &Path,
    upload_dir: &Path,
    recency: &dyn Recency,
) -> Result<SnapshotReport> {
    let archive = find_latest(working_dir, &FilePattern::new(ARCHIVE_PATTERN), recency)?;
    info!(archive = %archive.path.display(), "using distribution archive");
    extract_members(&archive.path, upload_dir, MEMBER_RULES)
}

/// Extract the members named by `rules` from `archive_path` into `upload_dir`.
///
/// Every rule is resolved against the archive listing before anything is
/// written. Members are staged in a temporary directory that is removed on
/// every exit path, then copied over any existing destination file.
pub fn extract_members(
    archive_path: &Path,
    upload_dir: &Path,
    rules: &[MemberRule],
) -> Result<SnapshotReport> {
    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| Error::from_zip(archive_path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| Error::from_zip(archive_path, e))?;
        if !entry.is_dir() {
            entries.push((index, entry.name().to_string()));
        }
    }
    debug!(entries = entries.len(), "read archive listing");

    // 1. Resolve every rule to exactly one entry
    let mut resolved = Vec::new();
    let mut skipped = Vec::new();
    for rule in rules {
        let matches: Vec<&(usize, String)> =
            entries.iter().filter(|(_, name)| rule.matches(name)).collect();

        match matches.as_slice() {
            [(index, name)] => resolved.push((rule, *index, name.clone())),
            [] if !rule.required => {
                warn!(marker = rule.marker, "optional archive member not found, skipping");
                skipped.push(rule.marker.to_string());
            }
            _ => {
                return Err(Error::AmbiguousOrMissingEntry {
                    marker: rule.marker.to_string(),
                    archive: archive_path.to_path_buf(),
                    matches: matches.iter().map(|(_, name)| name.clone()).collect(),
                })
            }
        }
    }

    // 2. Destination directories (idempotent)
    for rule in rules {
        let dir = upload_dir.join(rule.destination.relative_dir());
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    }

    // 3. Stage and place
    let staging = tempfile::Builder::new()
        .prefix("ncts-extract-")
        .tempdir()
        .map_err(|e| Error::io(std::env::temp_dir(), e))?;

    let mut placed = Vec::with_capacity(resolved.len());
    for (rule, index, entry_name) in resolved {
        let file_name = normalize_name(entry_file_name(&entry_name));
        let staged = staging.path().join(&file_name);
        {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| Error::from_zip(archive_path, e))?;
            let mut out = File::create(&staged).map_err(|e| Error::io(&staged, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| Error::io(&staged, e))?;
        }

        let destination = upload_dir
            .join(rule.destination.relative_dir())
            .join(&file_name);
        let bytes = fs::copy(&staged, &destination).map_err(|e| Error::io(&destination, e))?;
        let sha256 = content_digest(&destination)?;

        info!(
            entry = %entry_name,
            destination = %destination.display(),
            bytes,
            "placed archive member"
        );
        placed.push(PlacedFile {
            marker: rule.marker.to_string(),
            source_entry: entry_name,
            destination,
            bytes,
            sha256,
        });
    }

    Ok(SnapshotReport {
        archive: archive_path.to_path_buf(),
        placed,
        skipped,
    })
}

// ============================================================================
// SHORTAGES
// ============================================================================

/// Copy the latest shortages export to `<output_root>/MedicineShortagesActiveResultSummaryExport.csv`.
///
/// Absence is not an error: a warning is logged and `None` returned.
pub fn place_shortages(
    working_dir: &Path,
    output_root: &Path,
    recency: &dyn Recency,
) -> Result<Option<ShortagesCopy>> {
    let destination = output_root.join(SHORTAGES_TARGET);
    let candidates: Vec<Candidate> = list_candidates(working_dir, &FilePattern::any_of(SHORTAGES_GLOBS))?
        .into_iter()
        .filter(|c| !same_file(&c.path, &destination))
        .collect();

    let Some(chosen) = latest(&candidates, recency) else {
        warn!(
            dir = %working_dir.display(),
            "no Medicine Shortages file found, skipping shortages export"
        );
        return Ok(None);
    };

    if candidates.len() > 1 {
        let others: Vec<&str> = candidates
            .iter()
            .filter(|c| c.path != chosen.path)
            .map(|c| c.file_name.as_str())
            .collect();
        warn!(chosen = %chosen.file_name, ?others, "several shortages files found, using the latest");
    }

    fs::create_dir_all(output_root).map_err(|e| Error::io(output_root, e))?;
    fs::copy(&chosen.path, &destination).map_err(|e| Error::io(&destination, e))?;
    let sha256 = content_digest(&destination)?;

    info!(
        source = %chosen.path.display(),
        destination = %destination.display(),
        "copied shortages file"
    );
    Ok(Some(ShortagesCopy {
        source: chosen.path.clone(),
        destination,
        sha256,
    }))
}

/// True when both paths resolve to the same existing file (`..`, symlinks)
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Hex SHA-256 of a file's bytes
pub fn content_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================
