//! Tool implementations for the regdoc MCP server.
//!
//! One tool per query operation of [`RegulationService`]. Every tool
//! returns pretty-printed camelCase JSON in a single text content item.

use std::sync::Arc;

use regdoc_core::{BlockType, RegDocError};
use regdoc_service::{RegulationService, SearchRequest};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// MCP server exposing regulation retrieval tools.
#[derive(Clone)]
pub struct RegDocServer {
    pub(crate) service: Arc<RegulationService>,
    pub(crate) tool_router: ToolRouter<Self>,
}

// --- Parameter structs ---

/// Parameters for the `get_toc` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetTocParams {
    /// Regulation id, as listed by `list_regulations`.
    pub reg_id: String,
}

/// Parameters for the `smart_search` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SmartSearchParams {
    /// Search query (keywords or natural language, any language).
    pub query: String,
    /// Restrict to one regulation (default: all).
    pub reg_id: Option<String>,
    /// Section-number prefix such as "4.2", or text found in chapter titles.
    pub chapter_scope: Option<String>,
    /// Block types to keep: "heading", "text", "table", "list".
    pub block_types: Option<Vec<String>>,
    /// Exact section number of the owning chapter.
    pub section_number: Option<String>,
    /// Maximum results (default: 10).
    pub limit: Option<usize>,
}

/// Parameters for the `read_page_range` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadPageRangeParams {
    pub reg_id: String,
    /// First page, 1-based.
    pub start_page: u32,
    /// Last page, inclusive; at most 9 pages after `start_page`.
    pub end_page: u32,
}

/// Parameters for the `read_chapter_content` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadChapterContentParams {
    pub reg_id: String,
    /// Section number as shown by `get_toc`, e.g. "3.2".
    pub section_number: String,
    /// Include sub-chapters (default: true).
    pub include_children: Option<bool>,
}

/// Parameters for the `get_table_by_id` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetTableParams {
    pub reg_id: String,
    /// Table id such as "t0012-003", from search results or page markdown.
    pub table_id: String,
}

/// Parameters for the `resolve_reference` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResolveReferenceParams {
    pub reg_id: String,
    /// Reference text, e.g. "see 4.2.1" or "Table t0003-001".
    pub text: String,
}

// --- Response structs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    results: Vec<regdoc_core::SearchResult>,
    total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegulationsResponse {
    regulations: Vec<regdoc_core::RegulationSummary>,
    total: usize,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

/// Caller mistakes become `invalid_params`; everything else is internal.
fn to_mcp(err: RegDocError) -> McpError {
    match err {
        RegDocError::InvalidPageRange { .. } | RegDocError::ReferenceResolution(_) => {
            McpError::invalid_params(err.to_string(), None)
        }
        e if e.is_not_found() => McpError::invalid_params(e.to_string(), None),
        e => mcp_err(e.to_string()),
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| mcp_err(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_router]
impl RegDocServer {
    /// Create a server over a shared service.
    pub fn new(service: Arc<RegulationService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "list_regulations",
        description = "List every ingested regulation with its title, page count, chapter and table counts, and which indexes exist. Call this first to learn valid reg_id values."
    )]
    pub fn list_regulations(&self) -> Result<CallToolResult, McpError> {
        let regulations = self.service.list_regulations().map_err(to_mcp)?;
        let total = regulations.len();
        json_result(&RegulationsResponse { regulations, total })
    }

    #[tool(
        name = "get_toc",
        description = "Get the chapter tree of a regulation with the page range of every chapter. Use this to navigate before reading pages or chapters."
    )]
    pub fn get_toc(
        &self,
        Parameters(params): Parameters<GetTocParams>,
    ) -> Result<CallToolResult, McpError> {
        let toc = self.service.get_toc(&params.reg_id).map_err(to_mcp)?;
        json_result(&toc)
    }

    #[tool(
        name = "smart_search",
        description = "Hybrid keyword + semantic search over regulation content blocks. Each result carries the regulation id, page number, chapter path and block id so the surrounding pages can be read next. Supports filters by regulation, chapter scope, block type and section number."
    )]
    pub async fn smart_search(
        &self,
        Parameters(params): Parameters<SmartSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let block_types = params
            .block_types
            .unwrap_or_default()
            .iter()
            .map(|t| {
                t.parse::<BlockType>()
                    .map_err(|e| McpError::invalid_params(e, None))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let request = SearchRequest {
            query: params.query,
            reg_id: params.reg_id,
            chapter_scope: params.chapter_scope,
            block_types,
            section_number: params.section_number,
            limit: params.limit,
        };

        // SQLite connections and the embedder block; keep them off the runtime.
        let service = Arc::clone(&self.service);
        let results = tokio::task::spawn_blocking(move || service.smart_search(&request))
            .await
            .map_err(|e| mcp_err(format!("Search task failed: {e}")))?
            .map_err(to_mcp)?;
        debug!(results = results.len(), "smart_search");

        let total = results.len();
        json_result(&SearchResponse { results, total })
    }

    #[tool(
        name = "read_page_range",
        description = "Read up to 10 consecutive pages as markdown. Tables that continue across pages are returned whole, even when only part of them lies inside the range. Each page starts with a comment giving its number and chapter breadcrumb."
    )]
    pub fn read_page_range(
        &self,
        Parameters(params): Parameters<ReadPageRangeParams>,
    ) -> Result<CallToolResult, McpError> {
        let content = self
            .service
            .read_page_range(&params.reg_id, params.start_page, params.end_page)
            .map_err(to_mcp)?;
        json_result(&content)
    }

    #[tool(
        name = "read_chapter_content",
        description = "Read one chapter by section number as markdown, optionally including its sub-chapters."
    )]
    pub fn read_chapter_content(
        &self,
        Parameters(params): Parameters<ReadChapterContentParams>,
    ) -> Result<CallToolResult, McpError> {
        let content = self
            .service
            .read_chapter_content(
                &params.reg_id,
                &params.section_number,
                params.include_children.unwrap_or(true),
            )
            .map_err(to_mcp)?;
        json_result(&content)
    }

    #[tool(
        name = "get_table_by_id",
        description = "Get a complete table by id, merged across every page it spans, with per-page segments and row counts."
    )]
    pub fn get_table_by_id(
        &self,
        Parameters(params): Parameters<GetTableParams>,
    ) -> Result<CallToolResult, McpError> {
        let table = self
            .service
            .get_table_by_id(&params.reg_id, &params.table_id)
            .map_err(to_mcp)?;
        json_result(&table)
    }

    #[tool(
        name = "resolve_reference",
        description = "Resolve a cross-reference such as \"see 4.2.1\", \"Chapter 2\" or \"Table t0003-001\" to the chapter or table it names, with its page range."
    )]
    pub fn resolve_reference(
        &self,
        Parameters(params): Parameters<ResolveReferenceParams>,
    ) -> Result<CallToolResult, McpError> {
        let resolved = self
            .service
            .resolve_reference(&params.reg_id, &params.text)
            .map_err(to_mcp)?;
        json_result(&resolved)
    }
}
