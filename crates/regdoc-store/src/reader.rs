//! Read path: page ranges, chapters and tables, with cross-page tables
//! stitched back together from page records alone.

use std::collections::{BTreeMap, HashSet};

use regdoc_core::{
    BlockType, ChapterContent, ContentBlock, NodeId, PageDocument, PageRangeContent, RegDocError,
    TableEntry, TableSegment, MAX_PAGE_SPAN,
};
use regdoc_layout::tables::{merge_fragment_markdown, table_id_for};
use tracing::{debug, warn};

use crate::store::PageStore;

/// Check a requested page range.
///
/// # Errors
///
/// Returns [`RegDocError::InvalidPageRange`] when `start < 1`,
/// `start > end`, or the range covers more than [`MAX_PAGE_SPAN`] pages.
///
/// # Examples
///
/// ```
/// use regdoc_store::validate_page_range;
///
/// assert!(validate_page_range(1, 10).is_ok());
/// assert!(validate_page_range(1, 11).is_err());
/// assert!(validate_page_range(5, 4).is_err());
/// assert!(validate_page_range(0, 2).is_err());
/// ```
pub fn validate_page_range(start: u32, end: u32) -> Result<(), RegDocError> {
    let reason = if start < 1 {
        Some("pages are numbered from 1".to_string())
    } else if start > end {
        Some("start page is after end page".to_string())
    } else if end - start + 1 > MAX_PAGE_SPAN {
        Some(format!("a read may span at most {MAX_PAGE_SPAN} pages"))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegDocError::InvalidPageRange { start, end, reason }),
        None => Ok(()),
    }
}

/// One page's share of a logical table, as found on the page.
#[derive(Debug, Clone)]
struct Fragment {
    page_num: u32,
    block: ContentBlock,
}

impl Fragment {
    fn from_prev(&self) -> bool {
        self.block.table.as_ref().is_some_and(|t| t.continues_from_prev)
    }

    fn to_next(&self) -> bool {
        self.block.table.as_ref().is_some_and(|t| t.continues_to_next)
    }
}

/// A logical table reassembled from its fragments.
#[derive(Debug, Clone)]
struct Stitched {
    table_id: String,
    fragments: Vec<Fragment>,
    markdown: String,
    fragment_rows: Vec<usize>,
    row_count: usize,
    col_count: usize,
    headers: Vec<String>,
}

impl Stitched {
    fn page_span(&self) -> (u32, u32) {
        let first = self.fragments.first().map(|f| f.page_num).unwrap_or(0);
        let last = self.fragments.last().map(|f| f.page_num).unwrap_or(first);
        (first, last)
    }

    fn into_entry(self) -> TableEntry {
        let (page_start, page_end) = self.page_span();
        let chapter_path = self
            .fragments
            .first()
            .map(|f| f.block.chapter_path.clone())
            .unwrap_or_default();
        let segments = self
            .fragments
            .into_iter()
            .enumerate()
            .map(|(i, f)| TableSegment {
                page_num: f.page_num,
                block_id: f.block.id,
                markdown: f.block.markdown,
                row_count: self.fragment_rows.get(i).copied().unwrap_or(0),
            })
            .collect();
        TableEntry {
            table_id: self.table_id,
            page_start,
            page_end,
            segments,
            merged_markdown: self.markdown,
            row_count: self.row_count,
            col_count: self.col_count,
            headers: self.headers,
            chapter_path,
        }
    }
}

/// Pages loaded during one request, including ones outside the range that
/// a table walk had to visit.
struct PageCache<'s> {
    store: &'s PageStore,
    pages: BTreeMap<u32, Option<PageDocument>>,
}

impl<'s> PageCache<'s> {
    fn new(store: &'s PageStore, loaded: &[PageDocument]) -> Self {
        let pages = loaded
            .iter()
            .map(|p| (p.page_num, Some(p.clone())))
            .collect();
        Self { store, pages }
    }

    fn get(&mut self, page_num: u32) -> Result<Option<&PageDocument>, RegDocError> {
        if !self.pages.contains_key(&page_num) {
            let page = self.store.page(page_num)?;
            self.pages.insert(page_num, page);
        }
        Ok(self.pages.get(&page_num).and_then(Option::as_ref))
    }

    /// Follow continuation flags from the fragment at `(page_num, block)`
    /// back to the table head and forward to its last fragment.
    fn stitch(&mut self, page_num: u32, block: &ContentBlock) -> Result<Stitched, RegDocError> {
        let mut fragments = vec![Fragment {
            page_num,
            block: block.clone(),
        }];

        while let Some(head) = fragments.first().filter(|f| f.from_prev() && f.page_num > 1) {
            let prev_num = head.page_num - 1;
            let prev = self.get(prev_num)?.and_then(|p| {
                p.content_blocks
                    .iter()
                    .rev()
                    .find(|b| b.table.as_ref().is_some_and(|t| t.continues_to_next))
                    .cloned()
            });
            match prev {
                Some(block) => fragments.insert(
                    0,
                    Fragment {
                        page_num: prev_num,
                        block,
                    },
                ),
                None => break,
            }
        }

        while let Some(tail) = fragments.last().filter(|f| f.to_next()) {
            let next_num = tail.page_num + 1;
            let next = self.get(next_num)?.and_then(|p| {
                p.content_blocks
                    .iter()
                    .find(|b| b.table.as_ref().is_some_and(|t| t.continues_from_prev))
                    .cloned()
            });
            match next {
                Some(block) => fragments.push(Fragment {
                    page_num: next_num,
                    block,
                }),
                None => break,
            }
        }

        Ok(merge(fragments))
    }
}

fn merge(fragments: Vec<Fragment>) -> Stitched {
    let head = &fragments[0];
    let table_id = head
        .block
        .table
        .as_ref()
        .map(|t| t.table_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| table_id_for(head.page_num, head.block.order_in_page));

    let merged = {
        let markdowns: Vec<&str> = fragments.iter().map(|f| f.block.markdown.as_str()).collect();
        merge_fragment_markdown(&markdowns).ok_or_else(|| markdowns.join("\n"))
    };
    match merged {
        Ok(merged) => Stitched {
            table_id,
            markdown: merged.grid.to_markdown(),
            row_count: merged.grid.rows.len(),
            col_count: merged.grid.col_count(),
            headers: merged.grid.header.clone().unwrap_or_default(),
            fragment_rows: merged.fragment_rows,
            fragments,
        },
        Err(joined) => Stitched {
            table_id,
            markdown: joined,
            row_count: 0,
            col_count: 0,
            headers: Vec::new(),
            fragment_rows: Vec::new(),
            fragments,
        },
    }
}

fn is_linked_table(block: &ContentBlock) -> bool {
    block.block_type == BlockType::Table
        && block
            .table
            .as_ref()
            .is_some_and(|t| t.continues_from_prev || t.continues_to_next)
}

/// Renders blocks, emitting each cross-page table once in merged form.
struct Renderer {
    parts: Vec<String>,
    consumed: HashSet<String>,
    merged_table_ids: Vec<String>,
}

impl Renderer {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            consumed: HashSet::new(),
            merged_table_ids: Vec::new(),
        }
    }

    fn push_block(
        &mut self,
        cache: &mut PageCache<'_>,
        page_num: u32,
        block: &ContentBlock,
    ) -> Result<bool, RegDocError> {
        if self.consumed.contains(&block.id) {
            return Ok(false);
        }
        if !is_linked_table(block) {
            self.parts.push(block.markdown.clone());
            return Ok(true);
        }

        let stitched = cache.stitch(page_num, block)?;
        for f in &stitched.fragments {
            self.consumed.insert(f.block.id.clone());
        }
        if stitched.fragments.len() > 1 {
            let (first, last) = stitched.page_span();
            debug!(table = %stitched.table_id, first, last, "stitched cross-page table");
            self.parts.push(format!(
                "<!-- table {} merged from pages {first}-{last} -->",
                stitched.table_id
            ));
            if !self.merged_table_ids.contains(&stitched.table_id) {
                self.merged_table_ids.push(stitched.table_id.clone());
            }
        }
        self.parts.push(stitched.markdown);
        Ok(true)
    }

    fn finish(self) -> (String, Vec<String>) {
        (self.parts.join("\n\n"), self.merged_table_ids)
    }
}

impl PageStore {
    /// Render pages `start..=end` as one markdown document.
    ///
    /// Cross-page tables touching the range are rendered once, merged,
    /// even when fragments lie outside the range. Pages absent from the
    /// store are skipped and reported in `missing_pages`.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::InvalidPageRange`] for a malformed range,
    /// [`RegDocError::RegulationNotFound`] if nothing is stored, and
    /// [`RegDocError::PageNotFound`] if no page of the range exists.
    pub fn read_page_range(&self, start: u32, end: u32) -> Result<PageRangeContent, RegDocError> {
        validate_page_range(start, end)?;
        self.summary()?;

        let pages = self.pages_in(start, end)?;
        let found: Vec<u32> = pages.iter().map(|p| p.page_num).collect();
        let missing: Vec<u32> = (start..=end).filter(|n| !found.contains(n)).collect();
        if pages.is_empty() {
            return Err(RegDocError::PageNotFound {
                reg_id: self.reg_id().to_string(),
                page: start,
            });
        }
        if !missing.is_empty() {
            warn!(reg_id = self.reg_id(), ?missing, "pages missing from range");
        }

        let mut cache = PageCache::new(self, &pages);
        let mut renderer = Renderer::new();
        for page in &pages {
            let crumb = page.breadcrumb();
            renderer.parts.push(if crumb.is_empty() {
                format!("<!-- page {} -->", page.page_num)
            } else {
                format!("<!-- page {} | {crumb} -->", page.page_num)
            });
            for block in &page.content_blocks {
                renderer.push_block(&mut cache, page.page_num, block)?;
            }
        }

        let (markdown, merged_table_ids) = renderer.finish();
        Ok(PageRangeContent {
            reg_id: self.reg_id().to_string(),
            start_page: start,
            end_page: end,
            markdown,
            has_merged_tables: !merged_table_ids.is_empty(),
            merged_table_ids,
            pages: found,
            missing_pages: missing,
        })
    }

    /// Content of the chapter `section_number`, optionally with every
    /// sub-chapter.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::ChapterNotFound`] if no chapter has that
    /// section number.
    pub fn read_chapter_content(
        &self,
        section_number: &str,
        include_children: bool,
    ) -> Result<ChapterContent, RegDocError> {
        let summary = self.summary()?;
        let structure = self.structure()?;
        let node = structure
            .find_by_section_number(section_number)
            .ok_or_else(|| RegDocError::ChapterNotFound {
                reg_id: self.reg_id().to_string(),
                section_number: section_number.to_string(),
            })?;

        let members: HashSet<NodeId> = if include_children {
            structure.subtree(node.id).into_iter().collect()
        } else {
            HashSet::from([node.id])
        };
        let (page_start, page_end) = structure
            .page_ranges(summary.total_pages)
            .get(&node.id)
            .copied()
            .unwrap_or((node.page_num, node.page_num));

        let pages = self.pages_in(page_start, page_end)?;
        let mut cache = PageCache::new(self, &pages);
        let mut renderer = Renderer::new();
        let mut block_count = 0;
        for page in &pages {
            for block in &page.content_blocks {
                let owned = block.chapter_node_id.is_some_and(|id| members.contains(&id));
                if owned && renderer.push_block(&mut cache, page.page_num, block)? {
                    block_count += 1;
                }
            }
        }

        let (markdown, _) = renderer.finish();
        Ok(ChapterContent {
            reg_id: self.reg_id().to_string(),
            section_number: node.section_number.clone(),
            title: node.title.clone(),
            chapter_path: structure.path_labels(node.id),
            page_start,
            page_end,
            include_children,
            block_count,
            markdown,
        })
    }

    /// Look a logical table up by id.
    ///
    /// Uses the table registry when one is stored; otherwise scans every
    /// page for the table's fragments.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::TableNotFound`] if no table has that id.
    pub fn get_table_by_id(&self, table_id: &str) -> Result<TableEntry, RegDocError> {
        self.summary()?;
        let not_found = || RegDocError::TableNotFound {
            reg_id: self.reg_id().to_string(),
            table_id: table_id.to_string(),
        };

        if let Some(registry) = self.registry()? {
            return registry.get(table_id).cloned().ok_or_else(not_found);
        }

        debug!(reg_id = self.reg_id(), table_id, "no table registry, scanning pages");
        let pages = self.all_pages()?;
        let head = pages.iter().find_map(|p| {
            p.content_blocks
                .iter()
                .find(|b| b.table.as_ref().is_some_and(|t| t.table_id == table_id))
                .map(|b| (p.page_num, b.clone()))
        });
        let Some((page_num, block)) = head else {
            return Err(not_found());
        };
        let mut cache = PageCache::new(self, &pages);
        let mut entry = cache.stitch(page_num, &block)?.into_entry();
        entry.table_id = table_id.to_string();
        Ok(entry)
    }
}
