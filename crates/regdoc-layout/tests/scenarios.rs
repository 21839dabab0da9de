//! End-to-end layout scenarios: raw blocks → tree, pages, table registry.

use regdoc_core::{BlockType, IngestConfig, RawBlock};
use regdoc_layout::layout_document;
use regdoc_layout::tables::TableGrid;

fn text(text: &str, page: u32, y: f32) -> RawBlock {
    RawBlock {
        text: text.into(),
        page_num: page,
        y,
        cells: None,
        label: None,
        continues_to_next: false,
    }
}

fn heading(text: &str, page: u32, y: f32) -> RawBlock {
    RawBlock {
        label: Some("section_header".into()),
        ..self::text(text, page, y)
    }
}

fn table(rows: &[&[&str]], page: u32, y: f32) -> RawBlock {
    RawBlock {
        cells: Some(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        ),
        label: Some("table".into()),
        ..self::text("", page, y)
    }
}

/// A 3-page table with the header repeated on page 2 and not on page 3.
fn three_page_table() -> Vec<RawBlock> {
    vec![
        heading("1. General", 1, 0.0),
        heading("1.1 Battery ratings", 1, 10.0),
        text("Ratings are listed below.", 1, 20.0),
        table(
            &[
                &["Type", "Voltage", "Capacity"],
                &["VRLA", "2 V", "300 Ah"],
                &["VRLA", "12 V", "100 Ah"],
            ],
            1,
            30.0,
        ),
        table(
            &[
                &["Type", "Voltage", "Capacity"],
                &["NiCd", "1.2 V", "200 Ah"],
            ],
            2,
            0.0,
        ),
        table(
            &[&["Flooded", "2 V", "1000 Ah"], &["Li-ion", "3.2 V", "280 Ah"]],
            3,
            0.0,
        ),
        text("Capacities are at C10.", 3, 50.0),
        heading("1.2 Chargers", 3, 60.0),
    ]
}

#[test]
fn three_page_table_merges_into_one_entry() {
    let doc = layout_document("DL-T-5044", three_page_table(), &IngestConfig::default()).unwrap();

    assert_eq!(doc.total_pages, 3);
    assert_eq!(doc.registry.len(), 1);

    let entry = &doc.registry.tables()[0];
    assert_eq!(entry.table_id, "t0001-003");
    assert_eq!((entry.page_start, entry.page_end), (1, 3));
    assert_eq!(entry.segments.len(), 3);
    assert!(entry.is_cross_page());
    assert_eq!(entry.headers, vec!["Type", "Voltage", "Capacity"]);
    assert_eq!(entry.chapter_path, vec!["1 General", "1.1 Battery ratings"]);

    // Header once, then 2 + 1 + 2 data rows.
    assert_eq!(entry.row_count, 5);
    let merged = TableGrid::from_markdown(&entry.merged_markdown).unwrap();
    assert_eq!(merged.rows.len(), 5);
    assert_eq!(merged.rows[2][0], "NiCd");
    assert_eq!(merged.rows[3][0], "Flooded");
    assert_eq!(entry.merged_markdown.matches("| Type |").count(), 1);
}

#[test]
fn merged_row_count_equals_sum_of_fragment_rows() {
    let doc = layout_document("R", three_page_table(), &IngestConfig::default()).unwrap();
    let entry = &doc.registry.tables()[0];

    let from_pages: usize = doc
        .pages
        .iter()
        .flat_map(|p| p.content_blocks.iter())
        .filter_map(|b| b.table.as_ref())
        .filter(|t| t.table_id == entry.table_id)
        .map(|t| t.row_count)
        .sum();
    assert_eq!(from_pages, entry.row_count);
}

#[test]
fn continuation_flags_mirror_on_pages() {
    let doc = layout_document("R", three_page_table(), &IngestConfig::default()).unwrap();
    let flags: Vec<(bool, bool)> = doc
        .pages
        .iter()
        .map(|p| (p.continues_from_prev, p.continues_to_next))
        .collect();
    assert_eq!(flags, vec![(false, true), (true, true), (true, false)]);

    let page2 = &doc.pages[1];
    assert_eq!(page2.content_blocks[0].block_type, BlockType::Table);
    assert_eq!(
        page2.content_blocks[0].section_number.as_deref(),
        Some("1.1")
    );
    assert_eq!(page2.breadcrumb(), "1 General > 1.1 Battery ratings");
}

#[test]
fn layout_is_deterministic() {
    let a = layout_document("R", three_page_table(), &IngestConfig::default()).unwrap();
    let b = layout_document("R", three_page_table(), &IngestConfig::default()).unwrap();
    assert_eq!(a.structure, b.structure);
    assert_eq!(a.pages, b.pages);
    assert_eq!(a.registry.tables(), b.registry.tables());
}

#[test]
fn blocks_arrive_out_of_order() {
    let mut blocks = three_page_table();
    blocks.reverse();
    let doc = layout_document("R", blocks, &IngestConfig::default()).unwrap();
    assert_eq!(doc.structure.len(), 3);
    assert_eq!(doc.registry.len(), 1);
    assert_eq!(doc.pages[0].content_blocks[0].markdown, "# 1. General");
}

#[test]
fn empty_input_yields_empty_document() {
    let doc = layout_document("R", Vec::new(), &IngestConfig::default()).unwrap();
    assert!(doc.structure.is_empty());
    assert!(doc.pages.is_empty());
    assert!(doc.registry.is_empty());
    assert_eq!(doc.total_pages, 0);
}

#[test]
fn restarted_section_markers_stay_under_their_chapter() {
    let blocks = vec![
        heading("第一章 总则", 1, 0.0),
        heading("第一节 一般规定", 1, 10.0),
        text("本规范适用于变电站直流系统设计。", 1, 20.0),
        heading("第二节 术语", 1, 30.0),
        heading("第二章 设备", 2, 0.0),
        heading("第一节 充电装置", 2, 10.0),
        text("充电装置应满足浮充电要求。", 2, 20.0),
        heading("第二节 蓄电池", 2, 30.0),
    ];
    let doc = layout_document("DL-T-5044", blocks, &IngestConfig::default()).unwrap();

    assert_eq!(doc.structure.len(), 6);
    let charger = doc.structure.find_by_section_number("第二章 > 第一节").unwrap();
    assert_eq!(charger.title, "充电装置");

    let page2 = &doc.pages[1];
    let body = page2
        .content_blocks
        .iter()
        .find(|b| b.markdown.starts_with("充电装置应"))
        .unwrap();
    assert_eq!(body.chapter_path, vec!["第二章 设备", "第一节 充电装置"]);

    let active: Vec<_> = page2
        .active_chapters
        .iter()
        .map(|c| (c.node_id, c.inherited))
        .collect();
    let chapter = doc.structure.find_by_section_number("第二章").unwrap();
    assert_eq!(active, vec![(chapter.id, false), (charger.id, false)]);

    let battery = doc.structure.find_by_section_number("第二章 > 第二节").unwrap();
    assert_eq!(battery.parent_id, Some(chapter.id));
    assert_eq!(battery.page_num, 2);
}

#[test]
fn contents_page_does_not_claim_chapters() {
    let blocks = vec![
        text("Contents", 1, 0.0),
        text("1. General 2", 1, 10.0),
        text("1.1 Scope 2", 1, 20.0),
        text("2. Equipment 3", 1, 30.0),
        heading("1. General", 2, 0.0),
        heading("1.1 Scope", 2, 10.0),
        text("This code applies to substations.", 2, 20.0),
        heading("2. Equipment", 3, 0.0),
        text("Equipment shall be rated for the site.", 3, 10.0),
    ];
    let doc = layout_document("GB-50060", blocks, &IngestConfig::default()).unwrap();

    let pages: Vec<(&str, u32)> = doc
        .structure
        .nodes()
        .iter()
        .map(|n| (n.section_number.as_str(), n.page_num))
        .collect();
    assert_eq!(pages, vec![("1", 2), ("1.1", 2), ("2", 3)]);

    let contents = &doc.pages[0];
    assert!(contents.active_chapters.is_empty());
    assert!(contents
        .content_blocks
        .iter()
        .all(|b| b.block_type != BlockType::Heading && b.chapter_path.is_empty()));

    let sections: Vec<&str> = doc.pages[1]
        .active_chapters
        .iter()
        .map(|c| c.section_number.as_str())
        .collect();
    assert_eq!(sections, vec!["1", "1.1"]);
    assert_eq!(doc.structure.roots().len(), 2);
}
