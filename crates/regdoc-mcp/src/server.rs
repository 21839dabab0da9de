//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which starts the stdio-based MCP server,
//! registering all regdoc tools and blocking until the client disconnects.

use std::sync::Arc;

use regdoc_core::{RegDocConfig, RegDocError};
use regdoc_service::RegulationService;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};
use tracing::info;

use crate::tools::RegDocServer;

const SERVER_INSTRUCTIONS: &str = "\
regdoc serves ingested regulatory documents page-faithfully. Typical flow:\n\
- list_regulations: find the reg_id of the regulation you need\n\
- get_toc: see its chapter tree with page ranges\n\
- smart_search: find relevant blocks (returns page numbers and chapter paths)\n\
- read_page_range: read the surrounding pages (max 10); split tables come back whole\n\
- read_chapter_content: read a whole chapter by section number\n\
- get_table_by_id: fetch one complete table across all its pages\n\
- resolve_reference: follow a cross-reference like \"see 4.2.1\"";

#[tool_handler]
impl ServerHandler for RegDocServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "regdoc".to_string(),
                title: Some("regdoc regulation retrieval".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Chapter-aware, page-faithful retrieval over regulatory documents".to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `regdoc mcp` CLI subcommand. It blocks until
/// the client closes stdin.
///
/// # Errors
///
/// Returns [`RegDocError`] if the service cannot be built, or the server
/// fails to initialize or hits a transport error.
///
/// # Examples
///
/// ```no_run
/// use regdoc_core::RegDocConfig;
///
/// # async fn example() -> Result<(), regdoc_core::RegDocError> {
/// regdoc_mcp::server::run_server(RegDocConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(config: RegDocConfig) -> Result<(), RegDocError> {
    let data_dir = config.storage.data_dir.clone();
    let service = Arc::new(RegulationService::new(config)?);
    let server = RegDocServer::new(service);
    info!(data_dir = %data_dir.display(), "starting MCP server on stdio");

    let running = server
        .serve(stdio())
        .await
        .map_err(|e| RegDocError::Config(format!("MCP server failed to start: {e}")))?;

    running
        .waiting()
        .await
        .map_err(|e| RegDocError::Config(format!("MCP server error: {e}")))?;

    Ok(())
}
