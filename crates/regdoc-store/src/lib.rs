//! Persistent page store for regdoc.
//!
//! Each regulation lives in its own directory (see [`paths`]). The page
//! store database holds the regulation summary, the chapter tree, one
//! record per assembled page and the table registry. The read path
//! ([`PageStore::read_page_range`], [`PageStore::read_chapter_content`],
//! [`PageStore::get_table_by_id`]) reassembles cross-page tables from the
//! page records themselves.

pub mod paths;
mod reader;
mod store;

pub use reader::validate_page_range;
pub use store::PageStore;
