//! The seam between hybrid search and its retrieval backends.

use regdoc_core::{BlockType, RegDocError};
use serde::{Deserialize, Serialize};

/// One searchable content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub reg_id: String,
    pub page_num: u32,
    pub block_id: String,
    pub block_type: BlockType,
    pub section_number: Option<String>,
    /// Chapter labels, root first.
    pub chapter_path: Vec<String>,
    pub text: String,
}

impl IndexRecord {
    pub fn chapter_path_string(&self) -> String {
        self.chapter_path.join(" > ")
    }

    /// Dedup key shared by every backend.
    pub fn key(&self) -> (String, u32, String) {
        (self.reg_id.clone(), self.page_num, self.block_id.clone())
    }
}

/// Exact filters applied inside each backend.
///
/// # Examples
///
/// ```
/// use regdoc_core::BlockType;
/// use regdoc_search::backend::{IndexRecord, SearchFilters};
///
/// let record = IndexRecord {
///     reg_id: "GB-50172".into(),
///     page_num: 12,
///     block_id: "p0012-b001".into(),
///     block_type: BlockType::Table,
///     section_number: Some("4.2.1".into()),
///     chapter_path: vec!["4 DC system".into(), "4.2 Batteries".into()],
///     text: "capacity".into(),
/// };
/// let filters = SearchFilters {
///     chapter_scope: Some("4.2".into()),
///     block_types: vec![BlockType::Table],
///     ..SearchFilters::default()
/// };
/// assert!(filters.matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub reg_id: Option<String>,
    /// A section-number prefix (`4.2` matches `4.2` and `4.2.1`, not
    /// `4.21`), or otherwise a substring of the joined chapter path.
    pub chapter_scope: Option<String>,
    /// Empty means every block type.
    pub block_types: Vec<BlockType>,
    pub section_number: Option<String>,
}

impl SearchFilters {
    pub fn for_regulation(reg_id: &str) -> Self {
        Self {
            reg_id: Some(reg_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &IndexRecord) -> bool {
        if self.reg_id.as_ref().is_some_and(|r| *r != record.reg_id) {
            return false;
        }
        if !self.block_types.is_empty() && !self.block_types.contains(&record.block_type) {
            return false;
        }
        if let Some(wanted) = &self.section_number {
            if record.section_number.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        match &self.chapter_scope {
            Some(scope) => in_scope(scope, record),
            None => true,
        }
    }
}

fn in_scope(scope: &str, record: &IndexRecord) -> bool {
    let scope = scope.trim();
    if scope.is_empty() {
        return true;
    }
    if is_section_scope(scope) {
        record.section_number.as_deref().is_some_and(|s| {
            s == scope || s.strip_prefix(scope).is_some_and(|rest| rest.starts_with('.'))
        })
    } else {
        record.chapter_path_string().contains(scope)
    }
}

/// A scope made of section-number characters (`4.2`, `A.1`) selects by
/// number; anything else is matched against chapter titles.
pub(crate) fn is_section_scope(scope: &str) -> bool {
    !scope.contains(char::is_whitespace)
        && scope.chars().any(|c| c.is_ascii_digit())
        && scope.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// What a backend is asked for.
#[derive(Debug, Clone, Copy)]
pub enum SearchQuery<'a> {
    Text(&'a str),
    Embedding(&'a [f32]),
}

/// A backend hit, best first within its list.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: IndexRecord,
    /// Backend-specific relevance; only the order matters for fusion.
    pub score: f64,
}

/// A retrieval backend over one index segment.
pub trait SearchBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Add or replace records. `embeddings`, when given, is parallel to
    /// `records`; backends that do not use embeddings ignore it.
    fn index(
        &mut self,
        records: &[IndexRecord],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize, RegDocError>;

    /// Best `limit` hits for `query` that pass `filters`. A backend that
    /// cannot answer this kind of query returns nothing.
    fn search(
        &self,
        query: SearchQuery<'_>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RegDocError>;

    /// Remove every record of `reg_id`; returns how many were removed.
    fn delete(&mut self, reg_id: &str) -> Result<usize, RegDocError>;

    /// Flush and release the segment.
    fn close(self: Box<Self>) -> Result<(), RegDocError>;
}
