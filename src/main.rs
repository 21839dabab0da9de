use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use regdoc_core::{
    BlockType, OutputFormat, RegDocConfig, ResolvedReference, SearchResult, TocEntry,
};
use regdoc_service::{parse_ingest_input, CancelToken, RegulationService, SearchRequest};

#[derive(Parser)]
#[command(
    name = "regdoc",
    version,
    about = "Chapter-aware retrieval over regulatory documents",
    long_about = "regdoc ingests layout-analyzed regulatory documents and serves them\n\
                   page-faithfully: chapter trees, tables merged across pages, and\n\
                   hybrid keyword + vector search.\n\n\
                   Examples:\n  \
                     regdoc ingest blocks.json              Ingest a converted document\n  \
                     regdoc toc GB-50217                    Show the chapter tree\n  \
                     regdoc search 'cable ampacity'         Search every regulation\n  \
                     regdoc pages GB-50217 12 14            Read pages 12 to 14\n  \
                     regdoc table GB-50217 t0012-001        Fetch a merged table\n  \
                     regdoc mcp                             Serve tools over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .regdoc.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  Markdown, page content as stored"
    )]
    format: OutputFormat,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default .regdoc.toml configuration file
    #[command(long_about = "Create a default .regdoc.toml configuration file.\n\n\
        Every option is listed commented out with its default.\n\
        Fails if .regdoc.toml already exists.")]
    Init,
    /// Ingest a layout-analyzed document (JSON) and build its indexes
    #[command(long_about = "Ingest a layout-analyzed document and build its indexes.\n\n\
        Input is either {\"reg_id\", \"title\", \"blocks\": [...]} or a bare array of\n\
        blocks together with --reg-id. Re-ingesting an id replaces the previous\n\
        version once the new one is complete; Ctrl-C leaves the old one in place.\n\n\
        Examples:\n  regdoc ingest gb50217.json\n  converter out.pdf | regdoc ingest --reg-id GB-50217")]
    Ingest {
        /// Read input from this file instead of stdin
        file: Option<PathBuf>,
        /// Regulation id (required for a bare block array, overrides the document's)
        #[arg(long)]
        reg_id: Option<String>,
    },
    /// List ingested regulations
    List,
    /// Show the chapter tree of a regulation
    Toc {
        reg_id: String,
    },
    /// Hybrid keyword + vector search over content blocks
    Search {
        /// Search query
        query: String,
        /// Restrict to one regulation
        #[arg(long)]
        reg_id: Option<String>,
        /// Section-number prefix ("4.2") or chapter title text
        #[arg(long)]
        scope: Option<String>,
        /// Keep only these block types (repeatable): heading, text, table, list
        #[arg(long = "type", value_name = "TYPE")]
        block_types: Vec<BlockType>,
        /// Exact section number of the owning chapter
        #[arg(long)]
        section: Option<String>,
        /// Maximum number of results (default from config)
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Read a range of pages (at most 10) as markdown
    Pages {
        reg_id: String,
        start: u32,
        /// Last page, inclusive (default: same as start)
        end: Option<u32>,
    },
    /// Read one chapter by section number
    Chapter {
        reg_id: String,
        section: String,
        /// Leave out sub-chapters
        #[arg(long)]
        no_children: bool,
    },
    /// Fetch a table merged across every page it spans
    Table {
        reg_id: String,
        table_id: String,
    },
    /// Resolve a cross-reference such as "see 4.2.1"
    Resolve {
        reg_id: String,
        text: String,
    },
    /// Delete a regulation and all of its indexes
    Delete {
        reg_id: String,
    },
    /// Start the MCP server on stdio
    #[command(long_about = "Start the MCP (Model Context Protocol) server.\n\n\
        Exposes list_regulations, get_toc, smart_search, read_page_range,\n\
        read_chapter_content, get_table_by_id and resolve_reference over\n\
        stdio for AI agents. Logs go to stderr.")]
    Mcp,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# regdoc configuration
# All values shown are defaults; uncomment to change.

[storage]
# data_dir = ".regdoc/data"

[embedding]
# "hash" is local and deterministic; "openai" calls any OpenAI-compatible
# /embeddings endpoint (api_key falls back to REGDOC_EMBEDDING_API_KEY,
# then OPENAI_API_KEY).
# provider = "hash"
# model = "text-embedding-3-small"
# base_url = "https://api.openai.com/v1"
# dimensions = 256
# batch_size = 64
# parallel_batches = 2

[search]
# keyword_weight = 1.0
# vector_weight = 1.0
# default_limit = 10
# fetch_multiplier = 2
# snippet_chars = 240

[ingest]
# max_heading_chars = 80
"#;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries command output and the MCP transport.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<RegDocConfig> {
    match path {
        Some(path) => RegDocConfig::from_file(path)
            .wrap_err_with(|| format!("failed to load {}", path.display())),
        None => {
            let default_path = Path::new(".regdoc.toml");
            if default_path.exists() {
                Ok(RegDocConfig::from_file(default_path)?)
            } else {
                Ok(RegDocConfig::default())
            }
        }
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .into_diagnostic()
                .wrap_err("failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_toc_text(entries: &[TocEntry], depth: usize) {
    for entry in entries {
        println!(
            "{}{} {}  (pp. {}-{})",
            "  ".repeat(depth),
            entry.section_number,
            entry.title,
            entry.page_start,
            entry.page_end
        );
        print_toc_text(&entry.children, depth + 1);
    }
}

fn print_toc_markdown(entries: &[TocEntry], depth: usize) {
    for entry in entries {
        println!(
            "{}- **{}** {} (pp. {}-{})",
            "  ".repeat(depth),
            entry.section_number,
            entry.title,
            entry.page_start,
            entry.page_end
        );
        print_toc_markdown(&entry.children, depth + 1);
    }
}

fn print_results(results: &[SearchResult], format: OutputFormat) {
    if results.is_empty() {
        eprintln!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let path = r.chapter_path.join(" > ");
        match format {
            OutputFormat::Markdown => {
                println!(
                    "{}. **{}** p.{} `{}` ({}, {:.4})",
                    i + 1,
                    r.reg_id,
                    r.page_num,
                    r.block_id,
                    r.block_type,
                    r.score
                );
                if !path.is_empty() {
                    println!("   _{path}_");
                }
                println!("   > {}", r.snippet);
            }
            _ => {
                println!(
                    "{:>2}. [{:.4}] {} p.{} {} ({})",
                    i + 1,
                    r.score,
                    r.reg_id,
                    r.page_num,
                    r.block_id,
                    r.block_type
                );
                if !path.is_empty() {
                    println!("    {path}");
                }
                println!("    {}", r.snippet);
            }
        }
    }
}

fn run_ingest(
    service: Arc<RegulationService>,
    file: Option<&Path>,
    reg_id: Option<&str>,
    runtime: &tokio::runtime::Handle,
    format: OutputFormat,
) -> Result<()> {
    let input = read_input(file)?;
    let doc = parse_ingest_input(&input, reg_id)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_style(
        indicatif::ProgressStyle::default_spinner()
            .template("{spinner} {msg} [{elapsed}]")
            .into_diagnostic()?,
    );
    spinner.set_message(format!("Ingesting {} ({} blocks)", doc.reg_id, doc.blocks.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = service.ingest(&doc, &cancel);
    spinner.finish_and_clear();
    let report = result?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        _ => {
            println!(
                "{} {}: {} pages, {} chapters, {} tables ({} cross-page), {} blocks",
                if report.replaced { "Replaced" } else { "Ingested" },
                report.reg_id,
                report.total_pages,
                report.chapter_count,
                report.table_count,
                report.cross_page_tables,
                report.block_count,
            );
            match &report.embedding_model {
                Some(model) => println!(
                    "Embedded {} blocks with {model} in {} ms",
                    report.embedded_blocks, report.elapsed_ms
                ),
                None => println!("Keyword index only, {} ms", report.elapsed_ms),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let format = cli.format;

    match cli.command {
        Command::Init => {
            let path = Path::new(".regdoc.toml");
            if path.exists() {
                miette::bail!(".regdoc.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .regdoc.toml with default configuration");
            return Ok(());
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "regdoc", &mut std::io::stdout());
            return Ok(());
        }
        Command::Mcp => {
            let config = load_config(cli.config.as_deref())?;
            regdoc_mcp::server::run_server(config).await?;
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(data_dir = %config.storage.data_dir.display(), provider = %config.embedding.provider, "loaded configuration");
    let service = Arc::new(RegulationService::new(config)?);
    let runtime = tokio::runtime::Handle::current();

    // The service blocks on SQLite and embedding calls.
    tokio::task::spawn_blocking(move || run_command(cli.command, service, &runtime, format))
        .await
        .into_diagnostic()?
}

fn run_command(
    command: Command,
    service: Arc<RegulationService>,
    runtime: &tokio::runtime::Handle,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Command::Ingest { file, reg_id } => {
            run_ingest(service, file.as_deref(), reg_id.as_deref(), runtime, format)?;
        }
        Command::List => {
            let regulations = service.list_regulations()?;
            match format {
                OutputFormat::Json => print_json(&regulations)?,
                OutputFormat::Markdown => {
                    println!("| Regulation | Title | Pages | Chapters | Tables | Vectors |");
                    println!("| --- | --- | --- | --- | --- | --- |");
                    for r in &regulations {
                        println!(
                            "| {} | {} | {} | {} | {} | {} |",
                            r.reg_id,
                            r.title,
                            r.total_pages,
                            r.chapter_count,
                            r.table_count,
                            r.embedding_model.as_deref().unwrap_or("-"),
                        );
                    }
                }
                OutputFormat::Text => {
                    if regulations.is_empty() {
                        eprintln!("No regulations ingested.");
                    }
                    for r in &regulations {
                        println!(
                            "{}  {}  ({} pages, {} chapters, {} tables, indexed {})",
                            r.reg_id,
                            r.title,
                            r.total_pages,
                            r.chapter_count,
                            r.table_count,
                            r.indexed_at
                        );
                    }
                }
            }
        }
        Command::Toc { reg_id } => {
            let toc = service.get_toc(&reg_id)?;
            match format {
                OutputFormat::Json => print_json(&toc)?,
                OutputFormat::Markdown => {
                    println!("# {} ({} pages)\n", toc.title, toc.total_pages);
                    print_toc_markdown(&toc.entries, 0);
                }
                OutputFormat::Text => {
                    println!("{}  {} ({} pages)", toc.reg_id, toc.title, toc.total_pages);
                    if toc.entries.is_empty() {
                        println!("(no chapters detected)");
                    }
                    print_toc_text(&toc.entries, 1);
                }
            }
        }
        Command::Search {
            query,
            reg_id,
            scope,
            block_types,
            section,
            limit,
        } => {
            let request = SearchRequest {
                reg_id,
                chapter_scope: scope,
                block_types,
                section_number: section,
                limit,
                ..SearchRequest::new(query)
            };
            let results = service.smart_search(&request)?;
            match format {
                OutputFormat::Json => print_json(&results)?,
                _ => print_results(&results, format),
            }
        }
        Command::Pages { reg_id, start, end } => {
            let content = service.read_page_range(&reg_id, start, end.unwrap_or(start))?;
            match format {
                OutputFormat::Json => print_json(&content)?,
                _ => {
                    for page in &content.missing_pages {
                        eprintln!("page {page} not stored, skipped");
                    }
                    print!("{}", content.markdown);
                }
            }
        }
        Command::Chapter {
            reg_id,
            section,
            no_children,
        } => {
            let chapter = service.read_chapter_content(&reg_id, &section, !no_children)?;
            match format {
                OutputFormat::Json => print_json(&chapter)?,
                _ => print!("{}", chapter.markdown),
            }
        }
        Command::Table { reg_id, table_id } => {
            let table = service.get_table_by_id(&reg_id, &table_id)?;
            match format {
                OutputFormat::Json => print_json(&table)?,
                _ => {
                    if format == OutputFormat::Text {
                        println!(
                            "{} pp. {}-{}, {} rows x {} columns",
                            table.table_id,
                            table.page_start,
                            table.page_end,
                            table.row_count,
                            table.col_count
                        );
                    }
                    print!("{}", table.merged_markdown);
                }
            }
        }
        Command::Resolve { reg_id, text } => {
            let resolved = service.resolve_reference(&reg_id, &text)?;
            match (format, &resolved) {
                (OutputFormat::Json, _) => print_json(&resolved)?,
                (
                    _,
                    ResolvedReference::Chapter {
                        chapter_path,
                        page_start,
                        page_end,
                        ..
                    },
                ) => println!("{} (pp. {page_start}-{page_end})", chapter_path.join(" > ")),
                (
                    _,
                    ResolvedReference::Table {
                        table_id,
                        page_start,
                        page_end,
                    },
                ) => println!("table {table_id} (pp. {page_start}-{page_end})"),
            }
        }
        Command::Delete { reg_id } => {
            service.delete_regulation(&reg_id)?;
            println!("Deleted {reg_id}");
        }
        Command::Init | Command::Mcp | Command::Completions { .. } => {}
    }
    Ok(())
}
