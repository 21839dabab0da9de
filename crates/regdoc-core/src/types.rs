use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::structure::{NodeId, TocEntry};

/// One block as emitted by the external document-conversion pipeline.
///
/// # Examples
///
/// ```
/// use regdoc_core::RawBlock;
///
/// let json = r#"{"text": "1. General Provisions", "page_num": 1, "y": 72.0, "label": "section_header"}"#;
/// let block: RawBlock = serde_json::from_str(json).unwrap();
/// assert_eq!(block.page_num, 1);
/// assert!(block.cells.is_none());
/// assert!(!block.continues_to_next);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    /// Text or markdown content.
    #[serde(default)]
    pub text: String,
    /// 1-based page number.
    pub page_num: u32,
    /// Vertical position on the page, used for reading order.
    #[serde(default)]
    pub y: f32,
    /// Table cell grid, row-major, when the block is a table.
    #[serde(default)]
    pub cells: Option<Vec<Vec<String>>>,
    /// Layout hint such as `section_header`, `table`, `list_item`,
    /// `caption`, `page_header` or `page_footer`.
    #[serde(default)]
    pub label: Option<String>,
    /// Explicit "this table continues on the next page" flag.
    #[serde(default)]
    pub continues_to_next: bool,
}

/// A complete ingest request for one regulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDocument {
    pub reg_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub blocks: Vec<RawBlock>,
}

/// Kind of an assembled content block.
///
/// # Examples
///
/// ```
/// use regdoc_core::BlockType;
///
/// let t: BlockType = "table".parse().unwrap();
/// assert_eq!(t, BlockType::Table);
/// assert_eq!(BlockType::Heading.to_string(), "heading");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Table,
    Heading,
    List,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::Heading => "heading",
            BlockType::List => "list",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(BlockType::Text),
            "table" => Ok(BlockType::Table),
            "heading" => Ok(BlockType::Heading),
            "list" => Ok(BlockType::List),
            other => Err(format!("unknown block type: {other}")),
        }
    }
}

/// Table details attached to a `table` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    /// Logical table this fragment belongs to; shared by all fragments.
    pub table_id: String,
    pub col_count: usize,
    /// Data rows in this fragment, excluding header rows.
    pub row_count: usize,
    /// Header row of this fragment, if it has one.
    pub header: Option<Vec<String>>,
    pub continues_from_prev: bool,
    pub continues_to_next: bool,
}

/// One block of a page after assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    /// Unique within a regulation: `p{page}-b{order}`.
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub order_in_page: u32,
    pub markdown: String,
    pub table: Option<TableMeta>,
    pub heading_level: Option<u32>,
    /// Labels of the owning chapter's ancestor chain, root first.
    pub chapter_path: Vec<String>,
    pub chapter_node_id: Option<NodeId>,
    /// Section number of the owning chapter.
    pub section_number: Option<String>,
}

impl ContentBlock {
    pub fn chapter_path_string(&self) -> String {
        self.chapter_path.join(" > ")
    }
}

/// A chapter considered in force on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChapter {
    pub node_id: NodeId,
    pub section_number: String,
    pub title: String,
    pub level: u32,
    /// `true` when the chapter was introduced on an earlier page.
    pub inherited: bool,
}

/// A fully assembled page, interpretable in isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDocument {
    pub reg_id: String,
    pub page_num: u32,
    /// Root to leaf.
    pub active_chapters: Vec<ActiveChapter>,
    /// Reading order.
    pub content_blocks: Vec<ContentBlock>,
    pub markdown: String,
    pub continues_from_prev: bool,
    pub continues_to_next: bool,
    pub annotations: Vec<String>,
}

impl PageDocument {
    /// First table block of the page.
    pub fn first_table(&self) -> Option<&ContentBlock> {
        self.content_blocks
            .iter()
            .find(|b| b.block_type == BlockType::Table)
    }

    /// Last table block of the page.
    pub fn last_table(&self) -> Option<&ContentBlock> {
        self.content_blocks
            .iter()
            .rev()
            .find(|b| b.block_type == BlockType::Table)
    }

    /// Breadcrumb of the chapters in force, e.g. `1 General > 1.2 Scope`.
    pub fn breadcrumb(&self) -> String {
        self.active_chapters
            .iter()
            .map(|c| {
                if c.title.is_empty() {
                    c.section_number.clone()
                } else {
                    format!("{} {}", c.section_number, c.title)
                }
            })
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// The part of a logical table found on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSegment {
    pub page_num: u32,
    pub block_id: String,
    pub markdown: String,
    pub row_count: usize,
}

/// A logical table, possibly spanning several pages.
///
/// # Examples
///
/// ```
/// use regdoc_core::TableEntry;
///
/// let entry = TableEntry::default();
/// assert!(!entry.is_cross_page());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEntry {
    pub table_id: String,
    pub page_start: u32,
    pub page_end: u32,
    /// One per page, ascending page order.
    pub segments: Vec<TableSegment>,
    pub merged_markdown: String,
    pub row_count: usize,
    pub col_count: usize,
    pub headers: Vec<String>,
    pub chapter_path: Vec<String>,
}

impl TableEntry {
    pub fn is_cross_page(&self) -> bool {
        self.segments.len() > 1
    }
}

/// One ranked hit returned by hybrid search.
///
/// # Examples
///
/// ```
/// use regdoc_core::{BlockType, SearchResult};
///
/// let result = SearchResult {
///     reg_id: "DL-T-5044".into(),
///     page_num: 12,
///     chapter_path: vec!["4 DC System".into()],
///     snippet: "bus voltage loss shall trigger ...".into(),
///     score: 0.032,
///     block_id: "p0012-b003".into(),
///     block_type: BlockType::Text,
///     section_number: Some("4".into()),
/// };
/// assert_eq!(result.page_num, 12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub reg_id: String,
    pub page_num: u32,
    pub chapter_path: Vec<String>,
    pub snippet: String,
    pub score: f64,
    pub block_id: String,
    pub block_type: BlockType,
    pub section_number: Option<String>,
}

/// Per-regulation metadata listed by `list_regulations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegulationSummary {
    pub reg_id: String,
    pub title: String,
    pub total_pages: u32,
    pub chapter_count: usize,
    pub table_count: usize,
    pub block_count: usize,
    pub has_keyword_index: bool,
    pub has_vector_index: bool,
    pub embedding_model: Option<String>,
    /// SHA-256 of the raw ingest input.
    pub source_checksum: String,
    /// RFC 3339 timestamp.
    pub indexed_at: String,
}

/// Table of contents of one regulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toc {
    pub reg_id: String,
    pub title: String,
    pub total_pages: u32,
    pub entries: Vec<TocEntry>,
}

/// Result of a page-range read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRangeContent {
    pub reg_id: String,
    pub start_page: u32,
    pub end_page: u32,
    pub markdown: String,
    pub has_merged_tables: bool,
    /// Ids of tables stitched together from several pages.
    pub merged_table_ids: Vec<String>,
    /// Pages actually found.
    pub pages: Vec<u32>,
    /// Pages in the range that are absent from the store.
    pub missing_pages: Vec<u32>,
}

/// Merged content of one chapter (optionally with its sub-chapters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterContent {
    pub reg_id: String,
    pub section_number: String,
    pub title: String,
    pub chapter_path: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub include_children: bool,
    pub block_count: usize,
    pub markdown: String,
}

/// Target of a resolved cross-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResolvedReference {
    #[serde(rename_all = "camelCase")]
    Chapter {
        section_number: String,
        title: String,
        chapter_path: Vec<String>,
        page_start: u32,
        page_end: u32,
    },
    #[serde(rename_all = "camelCase")]
    Table {
        table_id: String,
        page_start: u32,
        page_end: u32,
    },
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use regdoc_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable plain text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
    /// Markdown.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_round_trips_through_str() {
        for t in [
            BlockType::Text,
            BlockType::Table,
            BlockType::Heading,
            BlockType::List,
        ] {
            assert_eq!(t.as_str().parse::<BlockType>().unwrap(), t);
        }
        assert!("figure".parse::<BlockType>().is_err());
    }

    #[test]
    fn content_block_serializes_type_field() {
        let block = ContentBlock {
            id: "p0001-b000".into(),
            block_type: BlockType::Heading,
            order_in_page: 0,
            markdown: "## 1 General".into(),
            table: None,
            heading_level: Some(1),
            chapter_path: vec!["1 General".into()],
            chapter_node_id: Some(NodeId(0)),
            section_number: Some("1".into()),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "heading");
        assert_eq!(value["chapterNodeId"], 0);
    }

    #[test]
    fn breadcrumb_joins_active_chapters() {
        let page = PageDocument {
            reg_id: "R".into(),
            page_num: 2,
            active_chapters: vec![
                ActiveChapter {
                    node_id: NodeId(0),
                    section_number: "1".into(),
                    title: "General".into(),
                    level: 1,
                    inherited: true,
                },
                ActiveChapter {
                    node_id: NodeId(1),
                    section_number: "1.1".into(),
                    title: String::new(),
                    level: 2,
                    inherited: false,
                },
            ],
            content_blocks: Vec::new(),
            markdown: String::new(),
            continues_from_prev: false,
            continues_to_next: false,
            annotations: Vec::new(),
        };
        assert_eq!(page.breadcrumb(), "1 General > 1.1");
    }

    #[test]
    fn resolved_reference_is_tagged() {
        let r = ResolvedReference::Table {
            table_id: "t0003-001".into(),
            page_start: 3,
            page_end: 4,
        };
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["kind"], "table");
        assert_eq!(value["tableId"], "t0003-001");
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
