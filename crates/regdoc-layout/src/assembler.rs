//! Page assembly: raw blocks in, self-contained [`PageDocument`]s out.
//!
//! Pages are folded in page order. The only state crossing a page boundary
//! is the [`AssemblyCarry`], the chapter in force at the end of the
//! previous page.

use std::collections::{BTreeMap, HashSet};

use regdoc_core::{
    ActiveChapter, BlockType, ChapterNode, ContentBlock, DocumentStructure, NodeId, PageDocument,
    RawBlock, RegDocError, TableMeta,
};
use regex::Regex;
use tracing::{debug, trace};

use crate::builder::{is_heading_candidate, HEADING_LABELS};
use crate::parser::{normalize_line, SectionMatch, SectionParser};
use crate::tables::TableGrid;

/// Layout labels for running headers and footers.
pub const FURNITURE_LABELS: &[&str] = &["page_header", "page_footer"];

/// Group blocks by page and sort each page by vertical position.
///
/// The sort is stable, so blocks sharing a `y` keep their input order.
pub fn group_pages(blocks: Vec<RawBlock>) -> BTreeMap<u32, Vec<RawBlock>> {
    let mut pages: BTreeMap<u32, Vec<RawBlock>> = BTreeMap::new();
    for block in blocks {
        pages.entry(block.page_num).or_default().push(block);
    }
    for page in pages.values_mut() {
        page.sort_by(|a, b| a.y.total_cmp(&b.y));
    }
    pages
}

/// Whether a block is running page furniture.
pub fn is_furniture(block: &RawBlock) -> bool {
    block
        .label
        .as_deref()
        .is_some_and(|l| FURNITURE_LABELS.contains(&l))
}

/// Chapter in force at the end of the previous page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyCarry {
    pub current: Option<NodeId>,
}

/// Turns one page of raw blocks into a [`PageDocument`].
pub struct PageAssembler<'a> {
    reg_id: &'a str,
    structure: &'a DocumentStructure,
    parser: &'a SectionParser,
    max_heading_chars: usize,
    list_prefix: Regex,
}

impl<'a> PageAssembler<'a> {
    /// # Errors
    ///
    /// Returns [`RegDocError::Parse`] if the list pattern fails to compile.
    pub fn new(
        reg_id: &'a str,
        structure: &'a DocumentStructure,
        parser: &'a SectionParser,
        max_heading_chars: usize,
    ) -> Result<Self, RegDocError> {
        let list_prefix = Regex::new(
            r"^(?:[-*•·▪◦]\s+|\(?\d{1,3}[)）]\s*|\(?[a-zA-Z][)）]\s+|[（(][一二三四五六七八九十]+[)）]|\d{1,3}[.、]\s*[^\d\s.])",
        )
        .map_err(|e| RegDocError::Parse(format!("invalid list pattern: {e}")))?;
        Ok(Self {
            reg_id,
            structure,
            parser,
            max_heading_chars,
            list_prefix,
        })
    }

    /// Fold every page in page order.
    pub fn assemble_all(&self, pages: &BTreeMap<u32, Vec<RawBlock>>) -> Vec<PageDocument> {
        let mut carry = AssemblyCarry::default();
        let mut out = Vec::with_capacity(pages.len());
        for (page_num, blocks) in pages {
            let (page, next) = self.assemble_page(carry, *page_num, blocks);
            carry = next;
            out.push(page);
        }
        out
    }

    /// Assemble one page given the carry from the previous page.
    ///
    /// `blocks` must already be in reading order.
    pub fn assemble_page(
        &self,
        carry: AssemblyCarry,
        page_num: u32,
        blocks: &[RawBlock],
    ) -> (PageDocument, AssemblyCarry) {
        let mut current = carry.current;
        let mut introduced: Vec<NodeId> = Vec::new();
        let mut matched: HashSet<NodeId> = HashSet::new();
        let mut content_blocks = Vec::with_capacity(blocks.len());
        let mut annotations = Vec::new();
        let mut furniture = 0usize;

        for raw in blocks {
            if is_furniture(raw) {
                furniture += 1;
                continue;
            }
            if raw.text.trim().is_empty() && raw.cells.is_none() {
                continue;
            }

            let order = content_blocks.len() as u32;
            let mut block = match self.classify(raw, page_num, current, &mut matched) {
                Classified::Chapter(id, level, md) => {
                    current = Some(id);
                    introduced.push(id);
                    new_block(page_num, order, BlockType::Heading, md, Some(level))
                }
                Classified::Block(kind, md, table) => {
                    let mut b = new_block(page_num, order, kind, md, None);
                    b.table = table;
                    b
                }
            };
            self.stamp(&mut block, current);
            content_blocks.push(block);
        }

        if furniture > 0 {
            annotations.push(format!("dropped {furniture} page furniture blocks"));
        }

        let active_chapters = self.active_chapters(carry, &introduced);
        let markdown = content_blocks
            .iter()
            .map(|b| b.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        trace!(
            page = page_num,
            blocks = content_blocks.len(),
            introduced = introduced.len(),
            "page assembled"
        );

        let page = PageDocument {
            reg_id: self.reg_id.to_string(),
            page_num,
            active_chapters,
            content_blocks,
            markdown,
            continues_from_prev: false,
            continues_to_next: false,
            annotations,
        };
        (page, AssemblyCarry { current })
    }

    /// The tree node a recognized heading on this page introduces.
    ///
    /// The heading is looked up among the children of the deepest open
    /// chapter shallower than it, so restarted numbers resolve to the right
    /// chapter. Otherwise the first unmatched node with that number on this
    /// page wins.
    fn heading_node(
        &self,
        m: &SectionMatch,
        current: Option<NodeId>,
        page_num: u32,
        matched: &HashSet<NodeId>,
    ) -> Option<&ChapterNode> {
        let usable = |n: &&ChapterNode| n.page_num == page_num && !matched.contains(&n.id);
        let parent = current.and_then(|id| {
            self.structure
                .ancestors(id)
                .into_iter()
                .rev()
                .find(|a| self.structure.get(*a).is_some_and(|n| n.level < m.level))
        });
        self.structure
            .find_in_scope(parent, &m.section_number)
            .filter(usable)
            .or_else(|| {
                self.structure
                    .nodes()
                    .iter()
                    .filter(|n| n.section_number == m.section_number)
                    .find(usable)
            })
    }

    fn classify(
        &self,
        raw: &RawBlock,
        page_num: u32,
        current: Option<NodeId>,
        matched: &mut HashSet<NodeId>,
    ) -> Classified {
        let label = raw.label.as_deref();
        let text = raw.text.trim();

        if raw.cells.is_some() || label == Some("table") {
            let grid = match &raw.cells {
                Some(cells) => TableGrid::from_cells(cells),
                None => TableGrid::from_markdown(text),
            };
            if let Some(grid) = grid {
                let meta = TableMeta {
                    table_id: String::new(),
                    col_count: grid.col_count(),
                    row_count: grid.rows.len(),
                    header: grid.header.clone(),
                    continues_from_prev: false,
                    continues_to_next: raw.continues_to_next,
                };
                return Classified::Block(BlockType::Table, grid.to_markdown(), Some(meta));
            }
            debug!(page = page_num, "table block without a usable grid, keeping as text");
            return Classified::Block(BlockType::Text, text.to_string(), None);
        }

        let labeled_heading = label.is_some_and(|l| HEADING_LABELS.contains(&l));
        if is_heading_candidate(raw, self.max_heading_chars) {
            if let Some(node) = self
                .parser
                .parse_line(text, None)
                .and_then(|m| self.heading_node(&m, current, page_num, matched))
            {
                matched.insert(node.id);
                let hashes = "#".repeat(node.level.clamp(1, 6) as usize);
                return Classified::Chapter(
                    node.id,
                    node.level,
                    format!("{hashes} {}", normalize_line(text)),
                );
            }
            if labeled_heading {
                return Classified::Block(
                    BlockType::Heading,
                    format!("**{}**", normalize_line(text)),
                    None,
                );
            }
        }

        if label == Some("list_item") || self.list_prefix.is_match(text) {
            let md = if self.list_prefix.is_match(text) {
                text.to_string()
            } else {
                format!("- {text}")
            };
            return Classified::Block(BlockType::List, md, None);
        }

        Classified::Block(BlockType::Text, text.to_string(), None)
    }

    fn stamp(&self, block: &mut ContentBlock, current: Option<NodeId>) {
        let Some(node) = current.and_then(|id| self.structure.get(id)) else {
            return;
        };
        block.chapter_node_id = Some(node.id);
        block.section_number = Some(node.section_number.clone());
        block.chapter_path = self.structure.path_labels(node.id);
    }

    /// Inherited ancestors of the carry above the shallowest heading newly
    /// introduced on the page, then the newly introduced chapters.
    fn active_chapters(&self, carry: AssemblyCarry, introduced: &[NodeId]) -> Vec<ActiveChapter> {
        let min_new_level = introduced
            .iter()
            .filter_map(|id| self.structure.get(*id))
            .map(|n| n.level)
            .min()
            .unwrap_or(u32::MAX);

        let inherited = carry
            .current
            .map(|id| self.structure.ancestors(id))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.structure.get(id))
            .filter(|n| n.level < min_new_level)
            .map(|n| (n, true));
        let fresh = introduced
            .iter()
            .filter_map(|id| self.structure.get(*id))
            .map(|n| (n, false));

        inherited
            .chain(fresh)
            .map(|(n, inherited)| ActiveChapter {
                node_id: n.id,
                section_number: n.section_number.clone(),
                title: n.title.clone(),
                level: n.level,
                inherited,
            })
            .collect()
    }
}

enum Classified {
    Chapter(NodeId, u32, String),
    Block(BlockType, String, Option<TableMeta>),
}

/// Block id: `p{page:04}-b{order:03}`.
pub fn block_id(page_num: u32, order_in_page: u32) -> String {
    format!("p{page_num:04}-b{order_in_page:03}")
}

fn new_block(
    page_num: u32,
    order: u32,
    block_type: BlockType,
    markdown: String,
    heading_level: Option<u32>,
) -> ContentBlock {
    ContentBlock {
        id: block_id(page_num, order),
        block_type,
        order_in_page: order,
        markdown,
        table: None,
        heading_level,
        chapter_path: Vec::new(),
        chapter_node_id: None,
        section_number: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_structure, heading_lines};

    fn raw(text: &str, page: u32, y: f32, label: Option<&str>) -> RawBlock {
        RawBlock {
            text: text.into(),
            page_num: page,
            y,
            cells: None,
            label: label.map(str::to_string),
            continues_to_next: false,
        }
    }

    fn fixture() -> Vec<RawBlock> {
        vec![
            raw("1. General", 1, 10.0, Some("section_header")),
            raw("These rules apply to DC systems.", 1, 20.0, None),
            raw("1.1 Scope", 1, 30.0, Some("section_header")),
            raw("Scope text.", 1, 40.0, None),
            raw("Running header", 2, 1.0, Some("page_header")),
            raw("More scope text.", 2, 10.0, None),
            raw("1.2 Terms", 2, 20.0, Some("section_header")),
            raw("Terms text.", 2, 30.0, None),
            raw("Body continues.", 3, 10.0, None),
            raw("2. Equipment", 4, 10.0, Some("section_header")),
            raw("2.1 Batteries", 4, 20.0, Some("section_header")),
            raw("- keep dry", 4, 30.0, None),
            raw("42", 4, 99.0, Some("page_footer")),
        ]
    }

    fn assemble(blocks: Vec<RawBlock>) -> (DocumentStructure, Vec<PageDocument>) {
        let parser = SectionParser::new(80).unwrap();
        let pages = group_pages(blocks);
        let tree = build_structure(&parser, &heading_lines(pages.values().flatten(), 80));
        let assembler = PageAssembler::new("R", &tree, &parser, 80).unwrap();
        let docs = assembler.assemble_all(&pages);
        (tree, docs)
    }

    fn sections(page: &PageDocument) -> Vec<(&str, bool)> {
        page.active_chapters
            .iter()
            .map(|c| (c.section_number.as_str(), c.inherited))
            .collect()
    }

    #[test]
    fn group_pages_sorts_by_y_stably() {
        let pages = group_pages(vec![
            raw("b", 1, 20.0, None),
            raw("a", 1, 10.0, None),
            raw("c", 1, 20.0, None),
            raw("z", 2, 0.0, None),
        ]);
        let first: Vec<&str> = pages[&1].iter().map(|b| b.text.as_str()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn active_chapters_follow_inheritance_law() {
        let (_, pages) = assemble(fixture());
        assert_eq!(sections(&pages[0]), vec![("1", false), ("1.1", false)]);
        // 1.2 is level 2, so only the level-1 ancestor is inherited.
        assert_eq!(sections(&pages[1]), vec![("1", true), ("1.2", false)]);
        // No new headings: the full chain of the carry.
        assert_eq!(sections(&pages[2]), vec![("1", true), ("1.2", true)]);
        // A new level-1 chapter replaces everything.
        assert_eq!(sections(&pages[3]), vec![("2", false), ("2.1", false)]);
    }

    #[test]
    fn blocks_are_stamped_with_current_chapter() {
        let (_, pages) = assemble(fixture());
        let carried = &pages[1].content_blocks[0];
        assert_eq!(carried.markdown, "More scope text.");
        assert_eq!(carried.section_number.as_deref(), Some("1.1"));
        assert_eq!(carried.chapter_path, vec!["1 General", "1.1 Scope"]);

        let terms = &pages[1].content_blocks[2];
        assert_eq!(terms.section_number.as_deref(), Some("1.2"));
    }

    #[test]
    fn headings_carry_node_level() {
        let (_, pages) = assemble(fixture());
        let heading = &pages[0].content_blocks[2];
        assert_eq!(heading.block_type, BlockType::Heading);
        assert_eq!(heading.heading_level, Some(2));
        assert_eq!(heading.markdown, "## 1.1 Scope");
    }

    #[test]
    fn furniture_is_dropped_and_noted() {
        let (_, pages) = assemble(fixture());
        assert!(pages[1]
            .content_blocks
            .iter()
            .all(|b| b.markdown != "Running header"));
        assert_eq!(pages[1].annotations, vec!["dropped 1 page furniture blocks"]);
        assert!(pages[3].content_blocks.iter().all(|b| b.markdown != "42"));
    }

    #[test]
    fn list_and_text_classification() {
        let (_, pages) = assemble(fixture());
        let list = pages[3].content_blocks.last().unwrap();
        assert_eq!(list.block_type, BlockType::List);
        assert_eq!(pages[0].content_blocks[1].block_type, BlockType::Text);
    }

    #[test]
    fn unmatched_labeled_heading_does_not_move_chapter() {
        let mut blocks = fixture();
        blocks.push(raw("Annex notes", 3, 20.0, Some("section_header")));
        blocks.push(raw("after annex", 3, 30.0, None));
        let (_, pages) = assemble(blocks);
        let annex = &pages[2].content_blocks[1];
        assert_eq!(annex.block_type, BlockType::Heading);
        assert_eq!(annex.heading_level, None);
        assert_eq!(pages[2].content_blocks[2].section_number.as_deref(), Some("1.2"));
    }

    #[test]
    fn enumerated_item_restarting_at_one_is_a_list() {
        let mut blocks = fixture();
        blocks.push(raw("1. Operators shall keep records", 3, 50.0, None));
        let (tree, pages) = assemble(blocks);
        assert_eq!(tree.len(), 5);
        let item = pages[2].content_blocks.last().unwrap();
        assert_eq!(item.block_type, BlockType::List);
        assert_eq!(item.section_number.as_deref(), Some("1.2"));
    }

    #[test]
    fn cell_grid_becomes_table_block() {
        let mut table = raw("", 3, 30.0, Some("table"));
        table.cells = Some(vec![
            vec!["Item".into(), "Value".into()],
            vec!["Float".into(), "2.23 V".into()],
        ]);
        table.continues_to_next = true;
        let mut blocks = fixture();
        blocks.push(table);
        let (_, pages) = assemble(blocks);
        let block = pages[2].content_blocks.last().unwrap();
        assert_eq!(block.block_type, BlockType::Table);
        let meta = block.table.as_ref().unwrap();
        assert_eq!((meta.col_count, meta.row_count), (2, 1));
        assert!(meta.continues_to_next);
    }

    #[test]
    fn document_without_headings_has_no_chapters() {
        let (tree, pages) = assemble(vec![raw("Foreword text", 1, 0.0, None)]);
        assert!(tree.is_empty());
        assert!(pages[0].active_chapters.is_empty());
        assert!(pages[0].content_blocks[0].chapter_path.is_empty());
    }

    #[test]
    fn block_ids_are_page_and_order() {
        let (_, pages) = assemble(fixture());
        assert_eq!(pages[0].content_blocks[0].id, "p0001-b000");
        assert_eq!(pages[3].content_blocks[2].id, "p0004-b002");
    }
}
