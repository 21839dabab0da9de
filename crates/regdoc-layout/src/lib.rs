//! Document layout reconstruction for regdoc.
//!
//! Turns the flat, per-page block stream of a converted regulation into
//! its global structure:
//! - [`parser`]: heading recognition for a single line
//! - [`builder`]: the chapter tree from all headings in document order
//! - [`assembler`]: self-contained pages with chapter context stamped in
//! - [`tables`]: cross-page table continuation and the table registry
//!
//! [`layout_document`] runs all four in order.

pub mod assembler;
pub mod builder;
pub mod parser;
pub mod tables;

use regdoc_core::{DocumentStructure, IngestConfig, PageDocument, RawBlock, Result};
use tracing::info;

use crate::assembler::{group_pages, is_furniture, PageAssembler};
use crate::builder::{build_structure, heading_lines};
use crate::parser::SectionParser;
use crate::tables::{build_registry, link_continuations, CaptionMatcher, TableRegistry};

/// Everything layout produces for one regulation.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub structure: DocumentStructure,
    /// Sorted by page number.
    pub pages: Vec<PageDocument>,
    pub registry: TableRegistry,
    /// Highest page number seen in the input.
    pub total_pages: u32,
}

/// Reconstruct structure, pages and tables from raw blocks.
///
/// # Examples
///
/// ```
/// use regdoc_core::{IngestConfig, RawBlock};
/// use regdoc_layout::layout_document;
///
/// let block = |text: &str, page: u32, y: f32| RawBlock {
///     text: text.into(),
///     page_num: page,
///     y,
///     cells: None,
///     label: None,
///     continues_to_next: false,
/// };
/// let doc = layout_document(
///     "GB-50172",
///     vec![block("1. General", 1, 0.0), block("Rules.", 1, 1.0), block("More.", 2, 0.0)],
///     &IngestConfig::default(),
/// )
/// .unwrap();
/// assert_eq!(doc.structure.len(), 1);
/// assert_eq!(doc.pages.len(), 2);
/// assert!(doc.pages[1].active_chapters[0].inherited);
/// ```
pub fn layout_document(
    reg_id: &str,
    blocks: Vec<RawBlock>,
    config: &IngestConfig,
) -> Result<AssembledDocument> {
    let parser = SectionParser::new(config.max_heading_chars)?;
    let captions = CaptionMatcher::new()?;

    let grouped = group_pages(blocks);
    let total_pages = grouped.keys().next_back().copied().unwrap_or(0);

    let headings = heading_lines(
        grouped.values().flatten().filter(|b| !is_furniture(b)),
        config.max_heading_chars,
    );
    let structure = build_structure(&parser, &headings);

    let assembler = PageAssembler::new(reg_id, &structure, &parser, config.max_heading_chars)?;
    let mut pages = assembler.assemble_all(&grouped);

    link_continuations(&mut pages, &captions);
    let registry = build_registry(reg_id, &mut pages);

    info!(
        reg_id,
        pages = pages.len(),
        chapters = structure.len(),
        tables = registry.len(),
        "layout complete"
    );

    Ok(AssembledDocument {
        structure,
        pages,
        registry,
        total_pages,
    })
}
