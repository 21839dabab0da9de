//! On-disk layout: one directory per regulation under the data directory.

use std::path::{Path, PathBuf};

use regdoc_core::RegDocError;

/// File name of the page store database.
pub const PAGES_DB: &str = "pages.db";
/// File name of the keyword index segment.
pub const KEYWORD_DB: &str = "keyword.db";
/// File name of the vector index segment.
pub const VECTOR_DB: &str = "vector.db";

const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// Paths of one regulation's directory.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use regdoc_store::paths::RegulationPaths;
///
/// let paths = RegulationPaths::new(Path::new("/data"), "GB-50172").unwrap();
/// assert!(paths.pages_db().ends_with("GB-50172/pages.db"));
/// assert!(RegulationPaths::new(Path::new("/data"), "../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulationPaths {
    dir: PathBuf,
}

impl RegulationPaths {
    /// # Errors
    ///
    /// Returns [`RegDocError::Config`] if `reg_id` is not usable as a
    /// directory name.
    pub fn new(data_dir: &Path, reg_id: &str) -> Result<Self, RegDocError> {
        validate_reg_id(reg_id)?;
        Ok(Self {
            dir: data_dir.join(reg_id),
        })
    }

    /// Paths rooted at an arbitrary directory, e.g. a staging directory.
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pages_db(&self) -> PathBuf {
        self.dir.join(PAGES_DB)
    }

    pub fn keyword_db(&self) -> PathBuf {
        self.dir.join(KEYWORD_DB)
    }

    pub fn vector_db(&self) -> PathBuf {
        self.dir.join(VECTOR_DB)
    }

    pub fn exists(&self) -> bool {
        self.pages_db().is_file()
    }
}

/// Staging directory for a fresh ingest of `reg_id`.
pub fn staging_dir(data_dir: &Path, reg_id: &str, nonce: &str) -> PathBuf {
    data_dir.join(format!("{STAGING_PREFIX}{reg_id}-{nonce}"))
}

/// Where the previous version is parked during a swap.
pub fn retired_dir(data_dir: &Path, reg_id: &str, nonce: &str) -> PathBuf {
    data_dir.join(format!("{RETIRED_PREFIX}{reg_id}-{nonce}"))
}

/// Regulation ids are directory names: no separators, no dot-files.
pub fn validate_reg_id(reg_id: &str) -> Result<(), RegDocError> {
    let ok = !reg_id.is_empty()
        && reg_id.len() <= 128
        && !reg_id.starts_with('.')
        && reg_id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(RegDocError::Config(format!(
            "invalid regulation id '{reg_id}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

/// Ids of all regulations with a page store, sorted.
///
/// A missing data directory means no regulations.
pub fn list_reg_ids(data_dir: &Path) -> Result<Vec<String>, RegDocError> {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || !entry.path().join(PAGES_DB).is_file() {
            continue;
        }
        ids.push(name);
    }
    ids.sort();
    Ok(ids)
}
