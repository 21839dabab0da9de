//! MCP server interface exposing regdoc retrieval to agents.
//!
//! Implements a Model Context Protocol server using rmcp with one tool per
//! query operation: `list_regulations`, `get_toc`, `smart_search`,
//! `read_page_range`, `read_chapter_content`, `get_table_by_id` and
//! `resolve_reference`, over stdio transport.
//!
//! # Examples
//!
//! ```no_run
//! use regdoc_core::RegDocConfig;
//!
//! # async fn example() -> Result<(), regdoc_core::RegDocError> {
//! regdoc_mcp::server::run_server(RegDocConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
