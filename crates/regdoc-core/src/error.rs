use std::path::PathBuf;

/// Errors that can occur across the regdoc platform.
///
/// The lookup variants (`RegulationNotFound` through `ReferenceResolution`)
/// are the typed failures surfaced to query callers. The remaining variants
/// wrap a specific infrastructure domain. Library crates use this type
/// directly; the binary renders it through `miette`.
///
/// # Examples
///
/// ```
/// use regdoc_core::RegDocError;
///
/// let err = RegDocError::RegulationNotFound("GB-1234".into());
/// assert!(err.to_string().contains("GB-1234"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RegDocError {
    /// No regulation with this id has been ingested.
    #[error("regulation not found: {0}")]
    #[diagnostic(
        code(regdoc::regulation_not_found),
        help("run `regdoc list` to see ingested regulations")
    )]
    RegulationNotFound(String),

    /// The regulation exists but has no such page.
    #[error("page {page} not found in regulation {reg_id}")]
    #[diagnostic(code(regdoc::page_not_found))]
    PageNotFound { reg_id: String, page: u32 },

    /// No chapter with this section number exists in the regulation.
    #[error("chapter {section_number} not found in regulation {reg_id}")]
    #[diagnostic(
        code(regdoc::chapter_not_found),
        help("run `regdoc toc` to list section numbers")
    )]
    ChapterNotFound {
        reg_id: String,
        section_number: String,
    },

    /// No table with this id exists in the regulation.
    #[error("table {table_id} not found in regulation {reg_id}")]
    #[diagnostic(code(regdoc::table_not_found))]
    TableNotFound { reg_id: String, table_id: String },

    /// A page range was malformed or too wide.
    #[error("invalid page range {start}..={end}: {reason}")]
    #[diagnostic(code(regdoc::invalid_page_range))]
    InvalidPageRange { start: u32, end: u32, reason: String },

    /// Cross-reference text could not be parsed or its target is missing.
    #[error("could not resolve reference: {0}")]
    #[diagnostic(code(regdoc::reference_resolution))]
    ReferenceResolution(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed ingest input or unparsable stored content.
    #[error("parse error: {0}")]
    Parse(String),

    /// SQLite failure in a page store or index segment.
    #[error("database error: {0}")]
    Database(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A long-running batch was cancelled before completion.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl RegDocError {
    /// Returns `true` for the typed lookup failures that callers are
    /// expected to handle (as opposed to infrastructure faults).
    ///
    /// # Examples
    ///
    /// ```
    /// use regdoc_core::RegDocError;
    ///
    /// assert!(RegDocError::RegulationNotFound("x".into()).is_not_found());
    /// assert!(!RegDocError::Config("bad".into()).is_not_found());
    /// ```
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegDocError::RegulationNotFound(_)
                | RegDocError::PageNotFound { .. }
                | RegDocError::ChapterNotFound { .. }
                | RegDocError::TableNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RegDocError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = RegDocError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn invalid_range_shows_bounds_and_reason() {
        let err = RegDocError::InvalidPageRange {
            start: 5,
            end: 2,
            reason: "start is after end".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid page range 5..=2: start is after end"
        );
    }

    #[test]
    fn chapter_not_found_names_both_ids() {
        let err = RegDocError::ChapterNotFound {
            reg_id: "R1".into(),
            section_number: "4.2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4.2"));
        assert!(msg.contains("R1"));
        assert!(err.is_not_found());
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = RegDocError::FileNotFound(PathBuf::from("/tmp/missing.json"));
        assert!(err.to_string().contains("/tmp/missing.json"));
    }
}
