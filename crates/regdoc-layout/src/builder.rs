//! Chapter tree construction from the document's ordered headings.

use std::collections::{BTreeMap, HashSet};

use regdoc_core::{DocumentStructure, NodeId, RawBlock};
use tracing::{debug, trace};

use crate::parser::{SectionParser, SequenceGuard};

/// Layout labels that mark a block as a heading.
pub const HEADING_LABELS: &[&str] = &["title", "section_header", "heading"];

/// A heading line and the page it appears on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingLine {
    pub text: String,
    pub page_num: u32,
}

impl HeadingLine {
    pub fn new(text: impl Into<String>, page_num: u32) -> Self {
        Self {
            text: text.into(),
            page_num,
        }
    }
}

/// Whether a raw block should be offered to the section parser.
///
/// Labeled headings always are. Unlabeled (or plain `text`) blocks are
/// only when they are a single short line without a cell grid.
pub fn is_heading_candidate(block: &RawBlock, max_heading_chars: usize) -> bool {
    match block.label.as_deref() {
        Some(label) if HEADING_LABELS.contains(&label) => true,
        None | Some("text") | Some("paragraph") => {
            let text = block.text.trim();
            block.cells.is_none()
                && !text.is_empty()
                && !text.contains('\n')
                && text.chars().count() <= max_heading_chars
        }
        Some(_) => false,
    }
}

/// Headings a page needs before it can be taken for a table of contents.
const TOC_MIN_ENTRIES: usize = 3;

/// Build the chapter tree.
///
/// `headings` must be in document order. Headings the parser rejects, and
/// headings repeating a section number already present under the same
/// parent, are skipped. Numbers that restart per chapter (`第一节`,
/// `Section 1`) are kept under each chapter. Pages that only list headings
/// repeated later on are treated as a table of contents and ignored, so
/// every node carries the page its body starts on.
/// The result is deterministic: the same input always yields the same tree.
///
/// # Examples
///
/// ```
/// use regdoc_layout::builder::{build_structure, HeadingLine};
/// use regdoc_layout::parser::SectionParser;
///
/// let parser = SectionParser::new(80).unwrap();
/// let tree = build_structure(
///     &parser,
///     &[
///         HeadingLine::new("1. General", 1),
///         HeadingLine::new("1.1 Scope", 1),
///         HeadingLine::new("1. Items shall be labelled", 2),
///         HeadingLine::new("2. Equipment", 3),
///     ],
/// );
/// assert_eq!(tree.len(), 3);
/// assert_eq!(tree.roots().len(), 2);
/// ```
pub fn build_structure(parser: &SectionParser, headings: &[HeadingLine]) -> DocumentStructure {
    let contents_pages = toc_pages(parser, headings);
    let mut tree = DocumentStructure::new();
    let mut guard = SequenceGuard::new();
    let mut stack: Vec<(u32, NodeId)> = Vec::new();

    for heading in headings {
        if contents_pages.contains(&heading.page_num) {
            trace!(text = %heading.text, page = heading.page_num, "table of contents entry");
            continue;
        }
        let Some(m) = parser.parse_line(&heading.text, Some(&guard)) else {
            trace!(text = %heading.text, page = heading.page_num, "not a heading");
            continue;
        };

        let keep = stack
            .iter()
            .rposition(|(level, _)| *level < m.level)
            .map_or(0, |i| i + 1);
        let parent = keep.checked_sub(1).map(|i| stack[i].1);

        if tree.find_in_scope(parent, &m.section_number).is_some() {
            debug!(
                section = %m.section_number,
                page = heading.page_num,
                "skipping repeated section number"
            );
            continue;
        }

        match tree.add_node(&m.section_number, &m.title, m.level, heading.page_num, parent) {
            Ok(id) => {
                guard.observe(&m);
                stack.truncate(keep);
                stack.push((m.level, id));
            }
            Err(e) => debug!(section = %m.section_number, error = %e, "heading not linked"),
        }
    }

    debug!(chapters = tree.len(), roots = tree.roots().len(), "structure built");
    tree
}

/// Pages whose headings all reappear, number and title alike, on later pages.
fn toc_pages(parser: &SectionParser, headings: &[HeadingLine]) -> HashSet<u32> {
    let parsed: Vec<(u32, String, String)> = headings
        .iter()
        .filter_map(|h| {
            let m = parser.parse_line(&h.text, None)?;
            Some((h.page_num, m.section_number, title_key(&m.title)))
        })
        .collect();

    let mut by_page: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, (page, _, _)) in parsed.iter().enumerate() {
        by_page.entry(*page).or_default().push(i);
    }

    by_page
        .into_iter()
        .filter(|(page, entries)| {
            entries.len() >= TOC_MIN_ENTRIES
                && entries.iter().all(|&i| {
                    let (_, number, key) = &parsed[i];
                    parsed
                        .iter()
                        .any(|(p, n, k)| p > page && n == number && k == key)
                })
        })
        .map(|(page, _)| {
            debug!(page, "table of contents page");
            page
        })
        .collect()
}

/// A title with trailing page numbers and leaders removed.
fn title_key(title: &str) -> String {
    title
        .trim_end_matches(|c: char| {
            c.is_ascii_digit() || c.is_whitespace() || matches!(c, '.' | '·' | '…' | '-')
        })
        .to_lowercase()
}

/// Collect heading candidates from blocks already in document order.
pub fn heading_lines<'a>(
    blocks: impl IntoIterator<Item = &'a RawBlock>,
    max_heading_chars: usize,
) -> Vec<HeadingLine> {
    blocks
        .into_iter()
        .filter(|b| is_heading_candidate(b, max_heading_chars))
        .map(|b| HeadingLine::new(b.text.trim(), b.page_num))
        .collect()
}
