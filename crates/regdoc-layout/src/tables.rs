//! Table grids, cross-page continuation and the table registry.
//!
//! Fragments of one logical table are linked by `continues_to_next` /
//! `continues_from_prev` flags on their [`TableMeta`]. The registry builder
//! folds linked fragments into [`TableEntry`] records; the read path can do
//! the same from page data alone through [`merge_fragment_markdown`].

use std::collections::HashMap;

use regdoc_core::{BlockType, PageDocument, TableEntry, TableSegment};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A table as header plus data rows.
///
/// # Examples
///
/// ```
/// use regdoc_layout::tables::TableGrid;
///
/// let grid = TableGrid::from_cells(&[
///     vec!["Item".into(), "Value".into()],
///     vec!["Voltage".into(), "220 V".into()],
/// ])
/// .unwrap();
/// assert_eq!(grid.col_count(), 2);
/// assert_eq!(grid.rows.len(), 1);
/// assert!(grid.to_markdown().starts_with("| Item | Value |"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableGrid {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

impl TableGrid {
    /// Build from a row-major cell grid; the first row is the header.
    pub fn from_cells(cells: &[Vec<String>]) -> Option<Self> {
        let mut rows = cells
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.iter().map(|c| clean_cell(c)).collect::<Vec<_>>());
        let header = rows.next()?;
        Some(Self {
            header: Some(header),
            rows: rows.collect(),
        })
    }

    /// Parse a markdown pipe table.
    ///
    /// The row before the `|---|` separator is the header; an all-blank
    /// header row counts as no header. Returns `None` when `markdown`
    /// contains no pipe rows.
    pub fn from_markdown(markdown: &str) -> Option<Self> {
        let mut header = None;
        let mut rows: Vec<Vec<String>> = Vec::new();

        for line in markdown.lines().map(str::trim) {
            if !line.starts_with('|') {
                continue;
            }
            let cells = split_pipe_row(line);
            if is_separator_row(&cells) {
                if header.is_none() {
                    if let Some(candidate) = rows.pop() {
                        if candidate.iter().any(|c| !c.is_empty()) {
                            header = Some(candidate);
                        }
                    }
                }
                continue;
            }
            rows.push(cells);
        }

        if header.is_none() && rows.is_empty() {
            return None;
        }
        Some(Self { header, rows })
    }

    pub fn col_count(&self) -> usize {
        self.header
            .iter()
            .chain(self.rows.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// Render as a markdown pipe table. A headerless grid gets a blank
    /// header row so the output stays valid markdown.
    pub fn to_markdown(&self) -> String {
        let cols = self.col_count();
        if cols == 0 {
            return String::new();
        }
        let blank = vec![String::new(); cols];
        let header = self.header.as_ref().unwrap_or(&blank);

        let mut md = render_row(header, cols);
        md.push('|');
        for _ in 0..cols {
            md.push_str(" --- |");
        }
        md.push('\n');
        for row in &self.rows {
            md.push_str(&render_row(row, cols));
        }
        md
    }
}

fn clean_cell(cell: &str) -> String {
    cell.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn render_row(cells: &[String], cols: usize) -> String {
    let mut line = String::from("|");
    for i in 0..cols {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        line.push(' ');
        line.push_str(cell);
        line.push_str(" |");
    }
    line.push('\n');
    line
}

fn split_pipe_row(line: &str) -> Vec<String> {
    const PLACEHOLDER: char = '\u{0}';
    let protected = line.replace("\\|", &PLACEHOLDER.to_string());
    let inner = protected.trim().trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner
        .split('|')
        .map(|c| c.trim().replace(PLACEHOLDER, "\\|"))
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim();
            !c.is_empty() && c.contains('-') && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

/// Whether `next` can continue a table whose first fragment is `first`.
///
/// Compatible when the column counts agree, or when `next` does not open
/// with a header of its own (its first row is data).
pub fn is_compatible(first: &TableGrid, next: &TableGrid) -> bool {
    if first.col_count() == next.col_count() {
        return true;
    }
    match &next.header {
        None => true,
        Some(h) => first.header.as_ref() != Some(h) && !looks_like_header(h),
    }
}

/// Header rows are short label cells; data rows usually carry numbers.
fn looks_like_header(row: &[String]) -> bool {
    !row.is_empty()
        && row
            .iter()
            .all(|c| !c.is_empty() && !c.chars().any(|ch| ch.is_ascii_digit()))
}

/// A merged logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    pub grid: TableGrid,
    /// Data rows contributed by each fragment, in order.
    pub fragment_rows: Vec<usize>,
}

/// Merge fragments: the first fragment's header, then the data rows of
/// every fragment. A continuation's header row is dropped when it repeats
/// the first header and kept as data otherwise.
///
/// # Examples
///
/// ```
/// use regdoc_layout::tables::{merge_grids, TableGrid};
///
/// let head = TableGrid::from_markdown("| A | B |\n| --- | --- |\n| 1 | 2 |\n").unwrap();
/// let tail = TableGrid::from_markdown("| A | B |\n| --- | --- |\n| 3 | 4 |\n").unwrap();
/// let merged = merge_grids(&[head, tail]);
/// assert_eq!(merged.grid.rows.len(), 2);
/// assert_eq!(merged.fragment_rows, vec![1, 1]);
/// ```
pub fn merge_grids(fragments: &[TableGrid]) -> MergedTable {
    let Some(first) = fragments.first() else {
        return MergedTable {
            grid: TableGrid::default(),
            fragment_rows: Vec::new(),
        };
    };

    let mut grid = first.clone();
    let mut fragment_rows = vec![first.rows.len()];

    for fragment in &fragments[1..] {
        let mut contributed = 0;
        if let Some(h) = &fragment.header {
            if first.header.as_ref() != Some(h) {
                grid.rows.push(h.clone());
                contributed += 1;
            }
        }
        grid.rows.extend(fragment.rows.iter().cloned());
        contributed += fragment.rows.len();
        fragment_rows.push(contributed);
    }

    MergedTable {
        grid,
        fragment_rows,
    }
}

/// Merge rendered fragments straight from their markdown.
///
/// Used on the read path, where only page records are available.
pub fn merge_fragment_markdown<S: AsRef<str>>(fragments: &[S]) -> Option<MergedTable> {
    let grids: Vec<TableGrid> = fragments
        .iter()
        .map(|f| TableGrid::from_markdown(f.as_ref()))
        .collect::<Option<Vec<_>>>()?;
    if grids.is_empty() {
        return None;
    }
    Some(merge_grids(&grids))
}

/// Recognizes captions that open a new table and "continued" markers.
#[derive(Debug)]
pub struct CaptionMatcher {
    caption: Regex,
    continued: Regex,
}

impl CaptionMatcher {
    /// # Errors
    ///
    /// Returns [`regdoc_core::RegDocError::Parse`] if a pattern fails to compile.
    pub fn new() -> Result<Self, regdoc_core::RegDocError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| regdoc_core::RegDocError::Parse(format!("{p}: {e}")))
        };
        Ok(Self {
            caption: compile(r"^(?:Table|TABLE|表)\s*[0-9A-Z]")?,
            continued: compile(r"(?i)^续表|\(continued\)\s*$|\bcont(?:inued|'d)\.?\s*$")?,
        })
    }

    pub fn is_continued_marker(&self, text: &str) -> bool {
        self.continued.is_match(text.trim())
    }

    pub fn is_caption(&self, text: &str) -> bool {
        let text = text.trim();
        self.caption.is_match(text) && !self.is_continued_marker(text)
    }
}

/// Decide and set continuation flags between adjacent pages.
///
/// The last table of page `p` continues onto page `p + 1` when it is the
/// last block of `p` and `p + 1` opens with a table (optionally behind a
/// "continued" marker, never behind a fresh caption), or when it was
/// flagged explicitly by the converter. Incompatible fragments are never
/// linked. `pages` must be sorted by page number.
pub fn link_continuations(pages: &mut [PageDocument], captions: &CaptionMatcher) {
    for i in 0..pages.len().saturating_sub(1) {
        let (head, tail) = pages.split_at_mut(i + 1);
        let page = &mut head[i];
        let next = &mut tail[0];

        let Some(last_idx) = page
            .content_blocks
            .iter()
            .rposition(|b| b.block_type == BlockType::Table)
        else {
            continue;
        };
        let explicit = page.content_blocks[last_idx]
            .table
            .as_ref()
            .is_some_and(|t| t.continues_to_next);

        let adjacent = next.page_num == page.page_num + 1;
        let ends_page = last_idx + 1 == page.content_blocks.len();

        let candidate = if !adjacent {
            None
        } else if explicit {
            // The converter saw the split; running headers may sit in between.
            next_page_opening_table(next, captions).or_else(|| {
                next.content_blocks
                    .iter()
                    .position(|b| b.block_type == BlockType::Table)
            })
        } else if ends_page {
            next_page_opening_table(next, captions)
        } else {
            None
        };

        let linked = candidate.filter(|next_idx| {
            let a = TableGrid::from_markdown(&page.content_blocks[last_idx].markdown);
            let b = TableGrid::from_markdown(&next.content_blocks[*next_idx].markdown);
            matches!((a, b), (Some(a), Some(b)) if is_compatible(&a, &b))
        });

        match linked {
            Some(next_idx) => {
                if let Some(meta) = page.content_blocks[last_idx].table.as_mut() {
                    meta.continues_to_next = true;
                }
                if let Some(meta) = next.content_blocks[next_idx].table.as_mut() {
                    meta.continues_from_prev = true;
                }
                page.continues_to_next = true;
                next.continues_from_prev = true;
            }
            None => {
                if explicit {
                    if let Some(meta) = page.content_blocks[last_idx].table.as_mut() {
                        meta.continues_to_next = false;
                    }
                    page.annotations.push(
                        "table flagged as continuing has no compatible continuation".into(),
                    );
                    debug!(page = page.page_num, "dropping unmatched continuation flag");
                }
            }
        }
    }
}

/// Index of the table opening `page`: the first block, or the block right
/// after a "continued" marker. A leading caption means a new table.
fn next_page_opening_table(page: &PageDocument, captions: &CaptionMatcher) -> Option<usize> {
    let first = page.content_blocks.first()?;
    if first.block_type == BlockType::Table {
        return Some(0);
    }
    if captions.is_continued_marker(&first.markdown) {
        return page
            .content_blocks
            .get(1)
            .filter(|b| b.block_type == BlockType::Table)
            .map(|_| 1);
    }
    None
}

/// O(1) lookup of logical tables by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRegistry {
    pub reg_id: String,
    tables: Vec<TableEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TableRegistry {
    pub fn from_entries(reg_id: &str, tables: Vec<TableEntry>) -> Self {
        let index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.table_id.clone(), i))
            .collect();
        Self {
            reg_id: reg_id.to_string(),
            tables,
            index,
        }
    }

    /// Rebuild the lookup index after deserialization.
    pub fn reindex(self) -> Self {
        let Self { reg_id, tables, .. } = self;
        Self::from_entries(&reg_id, tables)
    }

    pub fn get(&self, table_id: &str) -> Option<&TableEntry> {
        self.index.get(table_id).and_then(|i| self.tables.get(*i))
    }

    pub fn tables(&self) -> &[TableEntry] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Table id of a fragment that opens a logical table.
pub fn table_id_for(page_num: u32, order_in_page: u32) -> String {
    format!("t{page_num:04}-{order_in_page:03}")
}

struct OpenTable {
    entry: TableEntry,
    grids: Vec<TableGrid>,
    /// (page index, block index) of every fragment.
    locations: Vec<(usize, usize)>,
}

/// One linear pass over sorted pages: accumulate linked fragments into
/// logical tables, assign table ids, and write ids and per-fragment data
/// row counts back into every fragment's metadata.
pub fn build_registry(reg_id: &str, pages: &mut [PageDocument]) -> TableRegistry {
    let mut finished: Vec<OpenTable> = Vec::new();
    let mut open: Option<OpenTable> = None;

    for (page_idx, page) in pages.iter().enumerate() {
        for (block_idx, block) in page.content_blocks.iter().enumerate() {
            let Some(meta) = block.table.as_ref() else {
                continue;
            };
            let grid = TableGrid::from_markdown(&block.markdown).unwrap_or_default();
            let segment = TableSegment {
                page_num: page.page_num,
                block_id: block.id.clone(),
                markdown: block.markdown.clone(),
                row_count: grid.rows.len(),
            };

            let continues = meta.continues_from_prev
                && open
                    .as_ref()
                    .is_some_and(|t| t.entry.page_end + 1 == page.page_num);

            if continues {
                if let Some(table) = open.as_mut() {
                    table.entry.page_end = page.page_num;
                    table.entry.segments.push(segment);
                    table.grids.push(grid);
                    table.locations.push((page_idx, block_idx));
                }
            } else {
                if let Some(done) = open.take() {
                    finished.push(done);
                }
                open = Some(OpenTable {
                    entry: TableEntry {
                        table_id: table_id_for(page.page_num, block.order_in_page),
                        page_start: page.page_num,
                        page_end: page.page_num,
                        segments: vec![segment],
                        chapter_path: block.chapter_path.clone(),
                        ..TableEntry::default()
                    },
                    grids: vec![grid],
                    locations: vec![(page_idx, block_idx)],
                });
            }

            if !meta.continues_to_next {
                if let Some(done) = open.take() {
                    finished.push(done);
                }
            }
        }
    }
    if let Some(done) = open.take() {
        finished.push(done);
    }

    let mut entries = Vec::with_capacity(finished.len());
    for mut table in finished {
        let merged = merge_grids(&table.grids);
        table.entry.merged_markdown = merged.grid.to_markdown();
        table.entry.row_count = merged.grid.rows.len();
        table.entry.col_count = merged.grid.col_count();
        table.entry.headers = merged.grid.header.clone().unwrap_or_default();

        for (i, (page_idx, block_idx)) in table.locations.iter().enumerate() {
            let rows = merged.fragment_rows.get(i).copied().unwrap_or(0);
            if let Some(segment) = table.entry.segments.get_mut(i) {
                segment.row_count = rows;
            }
            let repeated_header = i > 0
                && table.grids[i].header.is_some()
                && table.grids[i].header == table.grids[0].header;
            if let Some(meta) = pages[*page_idx].content_blocks[*block_idx].table.as_mut() {
                meta.table_id = table.entry.table_id.clone();
                meta.row_count = rows;
                if i > 0 && !repeated_header {
                    meta.header = None;
                }
            }
        }
        entries.push(table.entry);
    }

    debug!(
        tables = entries.len(),
        cross_page = entries.iter().filter(|t| t.is_cross_page()).count(),
        "table registry built"
    );
    TableRegistry::from_entries(reg_id, entries)
}
