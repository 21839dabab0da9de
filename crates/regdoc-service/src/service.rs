//! The query and administration surface shared by the CLI and MCP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regdoc_core::{
    BlockType, ChapterContent, IngestDocument, PageRangeContent, RegDocConfig, RegDocError,
    RegulationSummary, ResolvedReference, SearchResult, TableEntry, Toc,
};
use regdoc_search::backend::{SearchBackend, SearchFilters};
use regdoc_search::embedding::{self, Embedder};
use regdoc_search::hybrid::{HybridSearch, Segment};
use regdoc_search::keyword::KeywordIndex;
use regdoc_search::vector::VectorIndex;
use regdoc_store::paths::{list_reg_ids, retired_dir, staging_dir, RegulationPaths};
use regdoc_store::PageStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ingest::{build_regulation, remove_dir_if_present, CancelToken, IngestReport};
use crate::locks::LockTable;
use crate::reference::{ReferenceParser, ReferenceTarget};

/// Parameters of [`RegulationService::smart_search`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    /// Restrict to one regulation; all regulations when `None`.
    #[serde(default)]
    pub reg_id: Option<String>,
    #[serde(default)]
    pub chapter_scope: Option<String>,
    #[serde(default)]
    pub block_types: Vec<BlockType>,
    #[serde(default)]
    pub section_number: Option<String>,
    /// Defaults to `search.default_limit`.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Regulation retrieval service over one data directory.
///
/// Every read takes the regulation's shared lock and opens its databases
/// for the duration of the call. Ingest builds into a staging directory
/// and swaps it in under the exclusive lock, so readers see either the
/// old or the new version, never a mix.
///
/// # Examples
///
/// ```
/// use regdoc_core::RegDocConfig;
/// use regdoc_service::RegulationService;
///
/// let tmp = tempfile::tempdir().unwrap();
/// let mut config = RegDocConfig::default();
/// config.storage.data_dir = tmp.path().to_path_buf();
/// let service = RegulationService::new(config).unwrap();
/// assert!(service.list_regulations().unwrap().is_empty());
/// ```
pub struct RegulationService {
    config: RegDocConfig,
    data_dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    locks: LockTable,
    references: ReferenceParser,
}

impl RegulationService {
    /// Create a service with the embedder named in `config.embedding`.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Config`] if the embedder cannot be built.
    pub fn new(config: RegDocConfig) -> Result<Self, RegDocError> {
        let embedder = embedding::from_config(&config.embedding)?;
        Self::with_embedder(config, Some(embedder))
    }

    /// Create a service with an explicit embedder; `None` disables the
    /// vector index.
    pub fn with_embedder(
        config: RegDocConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, RegDocError> {
        Ok(Self {
            data_dir: config.storage.data_dir.clone(),
            config,
            embedder,
            locks: LockTable::new(),
            references: ReferenceParser::new()?,
        })
    }

    pub fn config(&self) -> &RegDocConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Paths of an ingested regulation.
    fn existing(&self, reg_id: &str) -> Result<RegulationPaths, RegDocError> {
        let paths = RegulationPaths::new(&self.data_dir, reg_id)
            .map_err(|_| RegDocError::RegulationNotFound(reg_id.to_string()))?;
        if paths.exists() {
            Ok(paths)
        } else {
            Err(RegDocError::RegulationNotFound(reg_id.to_string()))
        }
    }

    /// Run `read` against the page store of `reg_id` under its shared lock.
    fn with_store<T>(
        &self,
        reg_id: &str,
        read: impl FnOnce(&PageStore) -> Result<T, RegDocError>,
    ) -> Result<T, RegDocError> {
        let locks = self.locks.get(reg_id);
        let _read = locks.state.read();
        let paths = self.existing(reg_id)?;
        let store = PageStore::open(&paths.pages_db(), reg_id)?;
        read(&store)
    }

    /// Chapter tree with page ranges. A regulation without recognizable
    /// headings has an empty tree.
    pub fn get_toc(&self, reg_id: &str) -> Result<Toc, RegDocError> {
        self.with_store(reg_id, |store| {
            let summary = store.summary()?;
            let structure = store.structure()?;
            Ok(Toc {
                reg_id: summary.reg_id,
                title: summary.title,
                total_pages: summary.total_pages,
                entries: structure.toc(summary.total_pages),
            })
        })
    }

    /// Hybrid keyword + vector search.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::RegulationNotFound`] when `request.reg_id`
    /// names a regulation that does not exist.
    pub fn smart_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, RegDocError> {
        let limit = request.limit.unwrap_or(self.config.search.default_limit);
        let reg_ids = match &request.reg_id {
            Some(reg_id) => {
                self.existing(reg_id)?;
                vec![reg_id.clone()]
            }
            None => list_reg_ids(&self.data_dir)?,
        };

        // Sorted acquisition: searches never wait on each other in a cycle.
        let locks: Vec<_> = reg_ids.iter().map(|id| self.locks.get(id)).collect();
        let _guards: Vec<_> = locks.iter().map(|l| l.state.read()).collect();

        let mut segments = Vec::with_capacity(reg_ids.len());
        for reg_id in &reg_ids {
            match self.open_segment(reg_id) {
                Ok(Some(segment)) => segments.push(segment),
                Ok(None) => {}
                Err(e) if request.reg_id.is_none() => {
                    warn!(reg_id = %reg_id, error = %e, "regulation skipped in search");
                }
                Err(e) => return Err(e),
            }
        }

        let filters = SearchFilters {
            reg_id: request.reg_id.clone(),
            chapter_scope: request.chapter_scope.clone(),
            block_types: request.block_types.clone(),
            section_number: request.section_number.clone(),
        };
        HybridSearch::new(&self.config.search, self.embedder.as_deref()).search(
            &segments,
            &request.query,
            &filters,
            limit,
        )
    }

    fn open_segment(&self, reg_id: &str) -> Result<Option<Segment>, RegDocError> {
        let Ok(paths) = self.existing(reg_id) else {
            return Ok(None);
        };
        let summary = PageStore::open(&paths.pages_db(), reg_id)?.summary()?;

        let keyword = KeywordIndex::open_existing(&paths.keyword_db())?
            .map(|k| Box::new(k) as Box<dyn SearchBackend>);

        let model_matches = match (&summary.embedding_model, &self.embedder) {
            (Some(indexed), Some(embedder)) => indexed == embedder.model(),
            _ => false,
        };
        let vector = if summary.has_vector_index && model_matches {
            VectorIndex::open_existing(&paths.vector_db())?
                .map(|v| Box::new(v) as Box<dyn SearchBackend>)
        } else {
            if summary.has_vector_index {
                warn!(
                    reg_id,
                    indexed = summary.embedding_model.as_deref().unwrap_or("none"),
                    "vector segment built with a different embedder; keyword results only"
                );
            }
            None
        };

        Ok(Some(Segment {
            reg_id: reg_id.to_string(),
            keyword,
            vector,
        }))
    }

    /// Pages `start..=end` (at most ten) as one markdown document, with
    /// cross-page tables merged in full.
    pub fn read_page_range(
        &self,
        reg_id: &str,
        start: u32,
        end: u32,
    ) -> Result<PageRangeContent, RegDocError> {
        regdoc_store::validate_page_range(start, end)?;
        self.with_store(reg_id, |store| store.read_page_range(start, end))
    }

    pub fn read_chapter_content(
        &self,
        reg_id: &str,
        section_number: &str,
        include_children: bool,
    ) -> Result<ChapterContent, RegDocError> {
        self.with_store(reg_id, |store| {
            store.read_chapter_content(section_number, include_children)
        })
    }

    pub fn get_table_by_id(&self, reg_id: &str, table_id: &str) -> Result<TableEntry, RegDocError> {
        self.with_store(reg_id, |store| store.get_table_by_id(table_id))
    }

    /// Summaries of every ingested regulation, sorted by id.
    pub fn list_regulations(&self) -> Result<Vec<RegulationSummary>, RegDocError> {
        let mut summaries = Vec::new();
        for reg_id in list_reg_ids(&self.data_dir)? {
            match self.with_store(&reg_id, PageStore::summary) {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(reg_id = %reg_id, error = %e, "unreadable regulation skipped"),
            }
        }
        Ok(summaries)
    }

    /// Resolve a textual cross-reference to a chapter or table.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::ReferenceResolution`] when `text` holds no
    /// recognizable reference or its target does not exist.
    pub fn resolve_reference(
        &self,
        reg_id: &str,
        text: &str,
    ) -> Result<ResolvedReference, RegDocError> {
        let target = self.references.parse(text).ok_or_else(|| {
            RegDocError::ReferenceResolution(format!(
                "no section number or table id in '{text}'"
            ))
        })?;

        self.with_store(reg_id, |store| match target {
            ReferenceTarget::Section(spellings) => {
                let summary = store.summary()?;
                let structure = store.structure()?;
                let node = spellings
                    .iter()
                    .find_map(|s| structure.find_by_section_number(s))
                    .ok_or_else(|| {
                        RegDocError::ReferenceResolution(format!(
                            "section {} not found in {reg_id}",
                            spellings.first().map(String::as_str).unwrap_or_default()
                        ))
                    })?;
                let (page_start, page_end) = structure
                    .page_ranges(summary.total_pages)
                    .get(&node.id)
                    .copied()
                    .unwrap_or((node.page_num, node.page_num));
                Ok(ResolvedReference::Chapter {
                    section_number: node.section_number.clone(),
                    title: node.title.clone(),
                    chapter_path: structure.path_labels(node.id),
                    page_start,
                    page_end,
                })
            }
            ReferenceTarget::Table(table_id) => match store.get_table_by_id(&table_id) {
                Ok(entry) => Ok(ResolvedReference::Table {
                    table_id: entry.table_id,
                    page_start: entry.page_start,
                    page_end: entry.page_end,
                }),
                Err(RegDocError::TableNotFound { .. }) => Err(RegDocError::ReferenceResolution(
                    format!("table {table_id} not found in {reg_id}"),
                )),
                Err(e) => Err(e),
            },
        })
    }

    /// Ingest `doc`, replacing any previous version of the regulation.
    ///
    /// On cancellation or failure nothing visible changes: the staging
    /// directory is discarded and the previous version stays in place.
    pub fn ingest(
        &self,
        doc: &IngestDocument,
        cancel: &CancelToken,
    ) -> Result<IngestReport, RegDocError> {
        let reg_id = doc.reg_id.as_str();
        let paths = RegulationPaths::new(&self.data_dir, reg_id)?;
        if doc.blocks.is_empty() {
            return Err(RegDocError::Parse(format!(
                "ingest document for {reg_id} has no blocks"
            )));
        }

        let locks = self.locks.get(reg_id);
        let _serial = locks.ingest.lock();
        std::fs::create_dir_all(&self.data_dir)?;

        let nonce = nonce();
        let staging = RegulationPaths::at(staging_dir(&self.data_dir, reg_id, &nonce));
        info!(reg_id, blocks = doc.blocks.len(), "ingest started");

        let built = build_regulation(
            doc,
            &self.config,
            self.embedder.as_deref(),
            &staging,
            cancel,
        )
        .and_then(|report| cancel.check("swap").map(|()| report));
        let mut report = match built {
            Ok(report) => report,
            Err(e) => {
                discard(staging.dir());
                warn!(reg_id, error = %e, "ingest aborted; previous version kept");
                return Err(e);
            }
        };

        let swapped = {
            let _write = locks.state.write();
            swap_in(staging.dir(), paths.dir(), &retired_dir(&self.data_dir, reg_id, &nonce))
        };
        match swapped {
            Ok(replaced) => report.replaced = replaced,
            Err(e) => {
                discard(staging.dir());
                return Err(e);
            }
        }

        info!(
            reg_id,
            replaced = report.replaced,
            elapsed_ms = report.elapsed_ms,
            "ingest complete"
        );
        Ok(report)
    }

    /// Remove a regulation and all of its indexes.
    pub fn delete_regulation(&self, reg_id: &str) -> Result<(), RegDocError> {
        let locks = self.locks.get(reg_id);
        let _serial = locks.ingest.lock();
        let _write = locks.state.write();
        let paths = self.existing(reg_id)?;

        let retired = retired_dir(&self.data_dir, reg_id, &nonce());
        std::fs::rename(paths.dir(), &retired)?;
        remove_dir_if_present(&retired)?;
        info!(reg_id, "regulation deleted");
        Ok(())
    }
}

/// Move `staging` to `target`, parking any previous version at `retired`
/// until the move succeeded. Returns whether a version was replaced.
fn swap_in(staging: &Path, target: &Path, retired: &Path) -> Result<bool, RegDocError> {
    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, retired)?;
    }
    if let Err(e) = std::fs::rename(staging, target) {
        if had_previous {
            if let Err(restore) = std::fs::rename(retired, target) {
                warn!(error = %restore, "failed to restore previous version");
            }
        }
        return Err(e.into());
    }
    if had_previous {
        if let Err(e) = remove_dir_if_present(retired) {
            warn!(dir = %retired.display(), error = %e, "failed to remove retired version");
        }
    }
    Ok(had_previous)
}

fn discard(dir: &Path) {
    if let Err(e) = remove_dir_if_present(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to remove staging directory");
    }
}

fn nonce() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}-{nanos}", std::process::id())
}
