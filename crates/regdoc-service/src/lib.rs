//! Regulation ingest and query service.
//!
//! [`RegulationService`] is the single entry point used by the CLI and the
//! MCP server. It owns the per-regulation lock table, runs the ingest
//! pipeline (layout, page store, keyword and vector segments) into a
//! staging directory and serves the read operations:
//!
//! - [`RegulationService::get_toc`]
//! - [`RegulationService::smart_search`]
//! - [`RegulationService::read_page_range`]
//! - [`RegulationService::read_chapter_content`]
//! - [`RegulationService::get_table_by_id`]
//! - [`RegulationService::list_regulations`]
//! - [`RegulationService::resolve_reference`]

mod ingest;
mod locks;
pub mod reference;
mod service;

pub use ingest::{parse_ingest_input, CancelToken, IngestReport};
pub use service::{RegulationService, SearchRequest};
