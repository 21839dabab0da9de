//! Ingest pipeline: layout, page store, keyword and vector segments, all
//! written into a staging directory that the service swaps in afterwards.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use regdoc_core::{IngestDocument, PageDocument, RegDocConfig, RegDocError, RegulationSummary};
use regdoc_layout::layout_document;
use regdoc_search::backend::{IndexRecord, SearchBackend};
use regdoc_search::embedding::Embedder;
use regdoc_search::keyword::KeywordIndex;
use regdoc_search::vector::VectorIndex;
use regdoc_store::paths::RegulationPaths;
use regdoc_store::PageStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Records per index write transaction.
const INDEX_BATCH: usize = 256;

/// Best-effort cancellation flag shared with a running ingest.
///
/// # Examples
///
/// ```
/// use regdoc_service::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self, stage: &str) -> Result<(), RegDocError> {
        if self.is_cancelled() {
            Err(RegDocError::Cancelled(format!("ingest cancelled during {stage}")))
        } else {
            Ok(())
        }
    }
}

/// What an ingest produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub reg_id: String,
    pub total_pages: u32,
    pub chapter_count: usize,
    pub table_count: usize,
    pub cross_page_tables: usize,
    pub block_count: usize,
    pub embedded_blocks: usize,
    pub embedding_model: Option<String>,
    /// Whether a previously indexed version was replaced.
    pub replaced: bool,
    pub elapsed_ms: u64,
}

/// Parse ingest input: a `{ "reg_id", "title"?, "blocks" }` object or a
/// bare array of raw blocks. `reg_id` overrides the id in the object and
/// is required for a bare array.
///
/// # Errors
///
/// Returns [`RegDocError::Parse`] for malformed input or a missing id.
///
/// # Examples
///
/// ```
/// use regdoc_service::parse_ingest_input;
///
/// let doc = parse_ingest_input(r#"[{"text": "1. Scope", "page_num": 1}]"#, Some("GB-1")).unwrap();
/// assert_eq!(doc.reg_id, "GB-1");
/// assert_eq!(doc.blocks.len(), 1);
/// assert!(parse_ingest_input("[]", None).is_err());
/// ```
pub fn parse_ingest_input(json: &str, reg_id: Option<&str>) -> Result<IngestDocument, RegDocError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| RegDocError::Parse(format!("ingest input is not valid JSON: {e}")))?;
    let mut doc = if value.is_array() {
        let blocks = serde_json::from_value(value)
            .map_err(|e| RegDocError::Parse(format!("invalid block array: {e}")))?;
        let reg_id = reg_id.ok_or_else(|| {
            RegDocError::Parse("a bare block array needs a regulation id".into())
        })?;
        IngestDocument {
            reg_id: reg_id.to_string(),
            title: None,
            blocks,
        }
    } else {
        serde_json::from_value::<IngestDocument>(value)
            .map_err(|e| RegDocError::Parse(format!("invalid ingest document: {e}")))?
    };
    if let Some(reg_id) = reg_id {
        doc.reg_id = reg_id.to_string();
    }
    if doc.blocks.is_empty() {
        return Err(RegDocError::Parse(format!(
            "ingest document for {} has no blocks",
            doc.reg_id
        )));
    }
    Ok(doc)
}

/// Build every artifact of `doc` under `paths` (a staging directory).
pub(crate) fn build_regulation(
    doc: &IngestDocument,
    config: &RegDocConfig,
    embedder: Option<&dyn Embedder>,
    paths: &RegulationPaths,
    cancel: &CancelToken,
) -> Result<IngestReport, RegDocError> {
    let started = Instant::now();
    let reg_id = doc.reg_id.as_str();
    let checksum = source_checksum(doc)?;

    cancel.check("layout")?;
    let assembled = layout_document(reg_id, doc.blocks.clone(), &config.ingest)?;
    let block_count: usize = assembled.pages.iter().map(|p| p.content_blocks.len()).sum();
    let cross_page_tables = assembled
        .registry
        .tables()
        .iter()
        .filter(|t| t.is_cross_page())
        .count();

    let records = index_records(&assembled.pages);
    let embeddings = match embedder {
        Some(embedder) if !records.is_empty() => {
            Some(embed_records(&records, embedder, config, cancel)?)
        }
        _ => None,
    };

    std::fs::create_dir_all(paths.dir())?;
    let store = PageStore::create(&paths.pages_db(), reg_id)?;
    let summary = RegulationSummary {
        reg_id: reg_id.to_string(),
        title: doc.title.clone().unwrap_or_else(|| reg_id.to_string()),
        total_pages: assembled.total_pages,
        chapter_count: assembled.structure.len(),
        table_count: assembled.registry.len(),
        block_count,
        has_keyword_index: true,
        has_vector_index: embeddings.is_some(),
        embedding_model: embeddings
            .as_ref()
            .and(embedder)
            .map(|e| e.model().to_string()),
        source_checksum: checksum,
        indexed_at: chrono::Utc::now().to_rfc3339(),
    };

    store.write_structure(&assembled.structure)?;
    store.write_registry(&assembled.registry)?;
    for page in &assembled.pages {
        cancel.check("page writes")?;
        store.write_page(page)?;
    }
    // Written last: a store without a summary is never listed as complete.
    store.write_summary(&summary)?;
    drop(store);
    debug!(reg_id, pages = assembled.pages.len(), "page store written");

    let mut keyword: Box<dyn SearchBackend> = Box::new(KeywordIndex::open(&paths.keyword_db())?);
    write_segment(keyword.as_mut(), &records, None, cancel)?;
    keyword.close()?;

    if let Some(embeddings) = &embeddings {
        let mut vector: Box<dyn SearchBackend> = Box::new(VectorIndex::open(&paths.vector_db())?);
        write_segment(vector.as_mut(), &records, Some(embeddings), cancel)?;
        vector.close()?;
    }

    info!(
        reg_id,
        pages = assembled.total_pages,
        chapters = summary.chapter_count,
        tables = summary.table_count,
        blocks = block_count,
        "regulation built"
    );

    Ok(IngestReport {
        reg_id: reg_id.to_string(),
        total_pages: summary.total_pages,
        chapter_count: summary.chapter_count,
        table_count: summary.table_count,
        cross_page_tables,
        block_count,
        embedded_blocks: embeddings.as_ref().map_or(0, Vec::len),
        embedding_model: summary.embedding_model,
        replaced: false,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// One index record per non-empty content block.
pub(crate) fn index_records(pages: &[PageDocument]) -> Vec<IndexRecord> {
    pages
        .iter()
        .flat_map(|page| {
            page.content_blocks
                .iter()
                .filter(|b| !b.markdown.trim().is_empty())
                .map(|block| IndexRecord {
                    reg_id: page.reg_id.clone(),
                    page_num: page.page_num,
                    block_id: block.id.clone(),
                    block_type: block.block_type,
                    section_number: block.section_number.clone(),
                    chapter_path: block.chapter_path.clone(),
                    text: block.markdown.clone(),
                })
        })
        .collect()
}

/// Embed in `batch_size` chunks, at most `parallel_batches` in flight.
fn embed_records(
    records: &[IndexRecord],
    embedder: &dyn Embedder,
    config: &RegDocConfig,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f32>>, RegDocError> {
    let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
    let batch_size = config.embedding.batch_size.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.embedding.parallel_batches.max(1))
        .build()
        .map_err(|e| RegDocError::Embedding(format!("failed to start embedding pool: {e}")))?;

    let batches: Vec<Vec<Vec<f32>>> = pool.install(|| {
        texts
            .par_chunks(batch_size)
            .map(|batch| {
                cancel.check("embedding")?;
                let vectors = embedder.embed_batch(batch)?;
                if vectors.len() != batch.len() {
                    return Err(RegDocError::Embedding(format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok(vectors)
            })
            .collect::<Result<_, RegDocError>>()
    })?;
    cancel.check("embedding")?;

    let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
    debug!(count = embeddings.len(), model = embedder.model(), "blocks embedded");
    Ok(embeddings)
}

fn write_segment(
    backend: &mut dyn SearchBackend,
    records: &[IndexRecord],
    embeddings: Option<&Vec<Vec<f32>>>,
    cancel: &CancelToken,
) -> Result<(), RegDocError> {
    for (i, batch) in records.chunks(INDEX_BATCH).enumerate() {
        cancel.check("indexing")?;
        let start = i * INDEX_BATCH;
        let vectors = embeddings.map(|e| &e[start..start + batch.len()]);
        backend.index(batch, vectors)?;
    }
    debug!(backend = backend.name(), records = records.len(), "segment written");
    Ok(())
}

/// SHA-256 of the ingest input as JSON.
fn source_checksum(doc: &IngestDocument) -> Result<String, RegDocError> {
    let bytes = serde_json::to_vec(doc)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Remove a directory tree, ignoring a missing one.
pub(crate) fn remove_dir_if_present(dir: &Path) -> Result<(), RegDocError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regdoc_core::RawBlock;
    use regdoc_search::embedding::HashEmbedder;

    fn doc() -> IngestDocument {
        let block = |text: &str, page: u32, y: f32, label: Option<&str>| RawBlock {
            text: text.into(),
            page_num: page,
            y,
            cells: None,
            label: label.map(str::to_string),
            continues_to_next: false,
        };
        IngestDocument {
            reg_id: "T-1".into(),
            title: Some("Test code".into()),
            blocks: vec![
                block("1. General", 1, 0.0, Some("section_header")),
                block("Applies to substations.", 1, 10.0, None),
                block("2. Batteries", 2, 0.0, Some("section_header")),
                block("Battery rooms need ventilation.", 2, 10.0, None),
            ],
        }
    }

    #[test]
    fn builds_all_segments_into_the_given_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = RegulationPaths::at(tmp.path().join("stage"));
        let embedder = HashEmbedder::new(32);
        let report = build_regulation(
            &doc(),
            &RegDocConfig::default(),
            Some(&embedder),
            &paths,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.total_pages, 2);
        assert_eq!(report.chapter_count, 2);
        assert_eq!(report.block_count, 4);
        assert_eq!(report.embedded_blocks, 4);
        assert_eq!(report.embedding_model.as_deref(), Some("hash-32"));
        assert!(paths.pages_db().is_file());
        assert!(paths.keyword_db().is_file());
        assert!(paths.vector_db().is_file());

        let summary = PageStore::open(&paths.pages_db(), "T-1").unwrap().summary().unwrap();
        assert_eq!(summary.title, "Test code");
        assert_eq!(summary.source_checksum.len(), 64);
        assert!(summary.has_vector_index);
    }

    #[test]
    fn without_embedder_no_vector_segment_is_written() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = RegulationPaths::at(tmp.path().join("stage"));
        let report = build_regulation(
            &doc(),
            &RegDocConfig::default(),
            None,
            &paths,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.embedded_blocks, 0);
        assert!(report.embedding_model.is_none());
        assert!(!paths.vector_db().exists());
    }

    #[test]
    fn cancelled_token_stops_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = RegulationPaths::at(tmp.path().join("stage"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = build_regulation(&doc(), &RegDocConfig::default(), None, &paths, &cancel)
            .unwrap_err();
        assert!(matches!(err, RegDocError::Cancelled(_)));
        assert!(!paths.pages_db().exists());
    }

    #[test]
    fn object_input_keeps_its_id_unless_overridden() {
        let json = r#"{"reg_id": "A", "title": "T", "blocks": [{"text": "x", "page_num": 1}]}"#;
        assert_eq!(parse_ingest_input(json, None).unwrap().reg_id, "A");
        assert_eq!(parse_ingest_input(json, Some("B")).unwrap().reg_id, "B");
        assert!(matches!(
            parse_ingest_input(r#"{"reg_id": "A", "blocks": []}"#, None),
            Err(RegDocError::Parse(_))
        ));
        assert!(parse_ingest_input("not json", None).is_err());
    }

    #[test]
    fn checksum_is_stable() {
        assert_eq!(source_checksum(&doc()).unwrap(), source_checksum(&doc()).unwrap());
    }
}
