//! Core types, configuration, and error handling for regdoc.
//!
//! This crate provides the shared foundation used by all other regdoc crates:
//! - [`RegDocError`]: unified error type using `thiserror`
//! - [`RegDocConfig`]: configuration loaded from `.regdoc.toml`
//! - [`DocumentStructure`]: the arena-backed chapter tree
//! - Page, table and search types shared by the store, index and service

mod config;
mod error;
mod structure;
mod types;

pub use config::{EmbeddingConfig, IngestConfig, RegDocConfig, SearchConfig, StorageConfig};
pub use error::RegDocError;
pub use structure::{ChapterNode, DocumentStructure, NodeId, TocEntry};
pub use types::{
    ActiveChapter, BlockType, ChapterContent, ContentBlock, IngestDocument, OutputFormat,
    PageDocument, PageRangeContent, RawBlock, RegulationSummary, ResolvedReference, SearchResult,
    TableEntry, TableMeta, TableSegment, Toc,
};

/// A convenience `Result` type for regdoc operations.
pub type Result<T> = std::result::Result<T, RegDocError>;

/// Maximum number of pages a single range read may span.
pub const MAX_PAGE_SPAN: u32 = 10;
