//! Sample catalog
//!
//! Recursive audio sample discovery with cheap local signals: content hash,
//! byte size, duration, and a keyword category. Never talks to the analysis
//! service.
//!
//! Traversal is sorted by file name, so an unchanged collection always yields
//! the same samples in the same order. Two files with identical bytes share
//! one sample id; the first one in traversal order wins.

use crate::models::{FailureKind, Sample, SampleId};
use lofty::prelude::*;
use lofty::probe::Probe;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Hash read size
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Bytes handed to `infer` for header sniffing
const HEADER_LEN: usize = 64;

/// Sample catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Collection root cannot be listed
    #[error("Cannot read {0}: {1}")]
    Unreadable(PathBuf, String),

    /// Scan worker pool could not be created
    #[error("Scan worker pool error: {0}")]
    WorkerPool(String),
}

/// Keyword table for cheap categorization; first matching label wins
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("kick", &["kick", "kik", "bd", "bassdrum"]),
    ("snare", &["snare", "snr", "sd"]),
    ("hat", &["hat", "hihat", "hh", "openhat", "closedhat", "cymbal", "ride", "crash"]),
    ("clap", &["clap", "snap"]),
    ("perc", &["perc", "percussion", "shaker", "tom", "rim", "conga", "bongo"]),
    ("bass", &["bass", "sub", "808"]),
    ("pad", &["pad", "drone", "atmos"]),
    ("lead", &["lead", "synth", "pluck"]),
    ("vocal", &["vocal", "vox", "voice", "acapella"]),
    ("fx", &["fx", "sfx", "riser", "impact", "sweep", "noise"]),
    ("loop", &["loop", "break", "groove"]),
];

/// Sample catalog
#[derive(Debug, Clone)]
pub struct SampleCatalog {
    ignore_patterns: Vec<String>,
    scan_workers: usize,
}

impl SampleCatalog {
    /// Create new catalog with default ignore patterns
    ///
    /// Ignores system files like .DS_Store, Thumbs.db, .git, etc.
    pub fn new(scan_workers: usize) -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                "node_modules".to_string(),
            ],
            scan_workers: scan_workers.max(1),
        }
    }

    /// Lazily scan `root` for samples
    ///
    /// Files are hashed one at a time as the iterator is advanced.
    pub fn scan(&self, root: &Path) -> Result<CatalogScan<'_>, CatalogError> {
        let walker = self.walk(root)?;
        Ok(CatalogScan {
            candidates: Candidates { catalog: self, walker },
            seen: HashSet::new(),
        })
    }

    /// Scan `root` on a bounded worker pool
    ///
    /// Returns the same samples in the same order as `scan`.
    pub fn scan_parallel(&self, root: &Path) -> Result<Vec<Sample>, CatalogError> {
        // Phase 1: sequential traversal (cheap, order-defining)
        let candidates: Vec<PathBuf> = Candidates {
            catalog: self,
            walker: self.walk(root)?,
        }
        .collect();

        debug!(
            root = %root.display(),
            candidates = candidates.len(),
            workers = self.scan_workers,
            "Traversal complete, inspecting candidates"
        );

        // Phase 2: parallel hashing; collect keeps index order
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.scan_workers)
            .thread_name(|i| format!("sbe-scan-{}", i))
            .build()
            .map_err(|e| CatalogError::WorkerPool(e.to_string()))?;
        let inspected: Vec<Sample> = pool.install(|| candidates.par_iter().map(|p| inspect_file(p)).collect());

        let mut seen = HashSet::new();
        Ok(inspected.into_iter().filter(|s| keep_first(&mut seen, s)).collect())
    }

    fn walk(&self, root: &Path) -> Result<walkdir::IntoIter, CatalogError> {
        if !root.exists() {
            return Err(CatalogError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(CatalogError::NotADirectory(root.to_path_buf()));
        }
        std::fs::read_dir(root).map_err(|e| CatalogError::Unreadable(root.to_path_buf(), e.to_string()))?;

        Ok(WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter())
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        self.ignore_patterns.iter().any(|p| name == p.as_str())
    }
}

impl Default for SampleCatalog {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Audio-extension files in traversal order
struct Candidates<'a> {
    catalog: &'a SampleCatalog,
    walker: walkdir::IntoIter,
}

impl Iterator for Candidates<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    // Unlistable subdirectory; keep scanning
                    warn!(error = %e, "Error accessing entry");
                    continue;
                }
            };

            if self.catalog.is_ignored(&entry) {
                if entry.file_type().is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_file() && has_audio_extension(entry.path()) {
                return Some(entry.into_path());
            }
        }
    }
}

/// Lazy sample sequence returned by [`SampleCatalog::scan`]
pub struct CatalogScan<'a> {
    candidates: Candidates<'a>,
    seen: HashSet<SampleId>,
}

impl Iterator for CatalogScan<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        loop {
            let path = self.candidates.next()?;
            let sample = inspect_file(&path);
            if keep_first(&mut self.seen, &sample) {
                return Some(sample);
            }
        }
    }
}

fn keep_first(seen: &mut HashSet<SampleId>, sample: &Sample) -> bool {
    if seen.insert(sample.id.clone()) {
        true
    } else {
        warn!(
            sample_id = %sample.id,
            path = %sample.path.display(),
            "Duplicate content, keeping first occurrence"
        );
        false
    }
}

fn has_audio_extension(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    matches!(
        ext.to_string_lossy().to_lowercase().as_str(),
        "wav" | "aif" | "aiff" | "flac" | "mp3" | "ogg" | "oga" | "opus" | "m4a" | "aac"
    )
}

/// Whether the leading bytes look like an audio container
fn is_audio_header(header: &[u8]) -> bool {
    match infer::get(header) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Audio => true,
        // Plain ISO-BMFF brand on an .m4a
        Some(kind) => kind.mime_type() == "video/mp4",
        None => false,
    }
}

/// Hash the file in chunks, returning the hex digest and the leading bytes
fn hash_file(path: &Path) -> std::io::Result<(String, Vec<u8>)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut header = Vec::with_capacity(HEADER_LEN);

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        if header.len() < HEADER_LEN {
            let take = (HEADER_LEN - header.len()).min(bytes_read);
            header.extend_from_slice(&buffer[..take]);
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok((format!("{:x}", hasher.finalize()), header))
}

fn read_duration(path: &Path) -> Option<f64> {
    let tagged_file = Probe::open(path).ok()?.read().ok()?;
    let duration = tagged_file.properties().duration();
    (!duration.is_zero()).then(|| duration.as_secs_f64())
}

/// Build the sample record for one file
///
/// Never fails: unreadable files become samples carrying a local failure.
pub fn inspect_file(path: &Path) -> Sample {
    let category = categorize(path);

    let (size_bytes, hashed) = match std::fs::metadata(path) {
        Ok(meta) => (meta.len(), hash_file(path)),
        Err(e) => (0, Err(e)),
    };

    match hashed {
        Ok((hash, header)) => {
            let supported = is_audio_header(&header);
            if !supported {
                debug!(path = %path.display(), "Header is not a recognised audio format");
            }
            Sample {
                id: SampleId::from_content_hash(hash),
                path: path.to_path_buf(),
                size_bytes,
                duration_secs: if supported { read_duration(path) } else { None },
                category,
                local_failure: (!supported).then_some(FailureKind::UnsupportedFormat),
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Sample unreadable");
            Sample {
                id: SampleId::for_unreadable_path(path),
                path: path.to_path_buf(),
                size_bytes,
                duration_secs: None,
                category,
                local_failure: Some(FailureKind::Unreadable),
            }
        }
    }
}

/// Keyword category from the file stem, then parent directories nearest first
pub fn categorize(path: &Path) -> Option<String> {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_lowercase());
    let parents = path
        .parent()
        .into_iter()
        .flat_map(|p| p.iter().rev())
        .map(|c| c.to_string_lossy().to_lowercase());

    stem.into_iter()
        .chain(parents)
        .find_map(|name| category_for_name(&name))
        .map(str::to_string)
}

fn category_for_name(name: &str) -> Option<&'static str> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            let singular = token.strip_suffix('s').unwrap_or(token);
            CATEGORY_KEYWORDS
                .iter()
                .find(|(_, words)| words.contains(&token) || words.contains(&singular))
                .map(|(label, _)| *label)
        })
}
