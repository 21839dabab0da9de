//! Exact nearest-neighbour backend over block embeddings stored as
//! little-endian f32 BLOBs.

use std::path::Path;

use regdoc_core::{BlockType, RegDocError};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::backend::{IndexRecord, SearchBackend, SearchFilters, SearchHit, SearchQuery};

/// Vector index segment.
pub struct VectorIndex {
    conn: Connection,
}

impl VectorIndex {
    /// Open or create a vector segment at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, RegDocError> {
        let conn = Connection::open(path)
            .map_err(|e| RegDocError::Database(format!("failed to open vector index: {e}")))?;
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    /// Open an existing segment read-only, or `None` if there is none at
    /// `path`.
    pub fn open_existing(path: &Path) -> Result<Option<Self>, RegDocError> {
        if !path.is_file() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RegDocError::Database(format!("failed to open vector index: {e}")))?;
        Ok(Some(Self { conn }))
    }

    /// Create an in-memory segment (for testing).
    pub fn in_memory() -> Result<Self, RegDocError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RegDocError::Database(format!("failed to create in-memory vector index: {e}"))
        })?;
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), RegDocError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS vectors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    reg_id TEXT NOT NULL,
                    page_num INTEGER NOT NULL,
                    block_id TEXT NOT NULL,
                    block_type TEXT NOT NULL,
                    section_number TEXT,
                    chapter_json TEXT NOT NULL,
                    text TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    UNIQUE (reg_id, block_id)
                );

                CREATE INDEX IF NOT EXISTS idx_vectors_reg ON vectors(reg_id);
                ",
            )
            .map_err(|e| RegDocError::Database(format!("failed to create vector schema: {e}")))
    }

    /// Record the embedding width. A segment keeps one width for life.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Embedding`] if a different width is already
    /// stored.
    pub fn set_dimensions(&self, dimensions: usize) -> Result<(), RegDocError> {
        if let Some(stored) = self.dimensions()? {
            if stored != dimensions {
                return Err(RegDocError::Embedding(format!(
                    "vector index holds {stored}-dimensional embeddings, got {dimensions}"
                )));
            }
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('embedding_dimensions', ?1)",
                params![dimensions.to_string()],
            )
            .map_err(|e| RegDocError::Database(format!("failed to store dimensions: {e}")))?;
        Ok(())
    }

    /// Stored embedding width, if any vector was indexed.
    pub fn dimensions(&self) -> Result<Option<usize>, RegDocError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'embedding_dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegDocError::Database(format!("failed to read dimensions: {e}")))?;
        value
            .map(|v| {
                v.parse().map_err(|_| {
                    RegDocError::Database(format!("corrupted dimension metadata: '{v}'"))
                })
            })
            .transpose()
    }

    /// Number of stored vectors.
    pub fn count(&self) -> Result<usize, RegDocError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
            .map_err(|e| RegDocError::Database(format!("failed to count vectors: {e}")))?;
        Ok(n as usize)
    }

    fn candidates(
        &self,
        reg_id: Option<&str>,
    ) -> Result<Vec<(IndexRecord, Vec<f32>)>, RegDocError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT reg_id, page_num, block_id, block_type, section_number,
                        chapter_json, text, embedding
                 FROM vectors
                 WHERE ?1 IS NULL OR reg_id = ?1",
            )
            .map_err(|e| RegDocError::Database(format!("failed to prepare vector scan: {e}")))?;
        let rows = stmt
            .query_map(params![reg_id], |row| {
                let block_type: String = row.get(3)?;
                let chapter_json: String = row.get(5)?;
                let blob: Vec<u8> = row.get(7)?;
                Ok((
                    IndexRecord {
                        reg_id: row.get(0)?,
                        page_num: row.get(1)?,
                        block_id: row.get(2)?,
                        block_type: block_type.parse().unwrap_or(BlockType::Text),
                        section_number: row.get(4)?,
                        chapter_path: serde_json::from_str(&chapter_json).unwrap_or_default(),
                        text: row.get(6)?,
                    },
                    bytes_to_floats(&blob),
                ))
            })
            .map_err(|e| RegDocError::Database(format!("vector scan failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegDocError::Database(format!("failed to read vector row: {e}")))
    }
}

impl SearchBackend for VectorIndex {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn index(
        &mut self,
        records: &[IndexRecord],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize, RegDocError> {
        let embeddings = embeddings.ok_or_else(|| {
            RegDocError::Embedding("vector index requires one embedding per record".into())
        })?;
        if embeddings.len() != records.len() {
            return Err(RegDocError::Embedding(format!(
                "got {} embeddings for {} records",
                embeddings.len(),
                records.len()
            )));
        }
        let Some(first) = embeddings.first() else {
            return Ok(0);
        };
        if embeddings.iter().any(|e| e.len() != first.len()) {
            return Err(RegDocError::Embedding(
                "embeddings in one batch differ in width".into(),
            ));
        }
        self.set_dimensions(first.len())?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| RegDocError::Database(format!("failed to begin transaction: {e}")))?;
        for (record, embedding) in records.iter().zip(embeddings) {
            tx.execute(
                "INSERT OR REPLACE INTO vectors
                 (reg_id, page_num, block_id, block_type, section_number,
                  chapter_json, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.reg_id,
                    record.page_num,
                    record.block_id,
                    record.block_type.as_str(),
                    record.section_number,
                    serde_json::to_string(&record.chapter_path)?,
                    record.text,
                    floats_to_bytes(embedding),
                ],
            )
            .map_err(|e| RegDocError::Database(format!("failed to store vector: {e}")))?;
        }
        tx.commit()
            .map_err(|e| RegDocError::Database(format!("failed to commit vector batch: {e}")))?;
        Ok(records.len())
    }

    fn search(
        &self,
        query: SearchQuery<'_>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RegDocError> {
        let SearchQuery::Embedding(query) = query else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        match self.dimensions()? {
            None => return Ok(Vec::new()),
            Some(dims) if dims != query.len() => {
                return Err(RegDocError::Embedding(format!(
                    "query embedding has {} dimensions, index has {dims}",
                    query.len()
                )));
            }
            Some(_) => {}
        }

        let mut hits: Vec<SearchHit> = self
            .candidates(filters.reg_id.as_deref())?
            .into_iter()
            .filter(|(record, _)| filters.matches(record))
            .map(|(record, embedding)| SearchHit {
                score: cosine_similarity(query, &embedding),
                record,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.key().cmp(&b.record.key()))
        });
        hits.truncate(limit);
        debug!(hits = hits.len(), "vector search");
        Ok(hits)
    }

    fn delete(&mut self, reg_id: &str) -> Result<usize, RegDocError> {
        self.conn
            .execute("DELETE FROM vectors WHERE reg_id = ?1", params![reg_id])
            .map_err(|e| RegDocError::Database(format!("failed to delete vectors: {e}")))
    }

    fn close(self: Box<Self>) -> Result<(), RegDocError> {
        self.conn
            .close()
            .map_err(|(_, e)| RegDocError::Database(format!("failed to close vector index: {e}")))
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity; 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(block: &str, block_type: BlockType) -> IndexRecord {
        IndexRecord {
            reg_id: "R".into(),
            page_num: 1,
            block_id: block.into(),
            block_type,
            section_number: Some("1".into()),
            chapter_path: vec!["1 General".into()],
            text: block.into(),
        }
    }

    fn seeded() -> VectorIndex {
        let mut index = VectorIndex::in_memory().unwrap();
        index
            .index(
                &[
                    record("p0001-b000", BlockType::Text),
                    record("p0001-b001", BlockType::Table),
                    record("p0001-b002", BlockType::Text),
                ],
                Some(vec![vec![1.0, 0.0, 0.0], vec![0.8, 0.6, 0.0], vec![0.0, 0.0, 1.0]].as_slice()),
            )
            .unwrap();
        index
    }

    #[test]
    fn nearest_vectors_rank_first() {
        let index = seeded();
        let hits = index
            .search(SearchQuery::Embedding(&[1.0, 0.1, 0.0]), &SearchFilters::default(), 2)
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.block_id.as_str()).collect();
        assert_eq!(ids, vec!["p0001-b000", "p0001-b001"]);
    }

    #[test]
    fn filters_drop_candidates() {
        let index = seeded();
        let filters = SearchFilters {
            block_types: vec![BlockType::Table],
            ..SearchFilters::default()
        };
        let hits = index
            .search(SearchQuery::Embedding(&[1.0, 0.0, 0.0]), &filters, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.block_type, BlockType::Table);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut index = seeded();
        assert_eq!(index.dimensions().unwrap(), Some(3));
        assert!(index
            .search(SearchQuery::Embedding(&[1.0, 0.0]), &SearchFilters::default(), 5)
            .is_err());
        assert!(index
            .index(&[record("p0002-b000", BlockType::Text)], Some(vec![vec![1.0]].as_slice()))
            .is_err());
        assert!(index.index(&[record("p0002-b000", BlockType::Text)], None).is_err());
    }

    #[test]
    fn delete_removes_regulation() {
        let mut index = seeded();
        assert_eq!(index.delete("R").unwrap(), 3);
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn existing_segment_opens_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector.db");
        assert!(VectorIndex::open_existing(&path).unwrap().is_none());

        let mut writer = VectorIndex::open(&path).unwrap();
        writer
            .index(
                &[record("p0001-b000", BlockType::Text)],
                Some(vec![vec![0.0, 1.0]].as_slice()),
            )
            .unwrap();
        Box::new(writer).close().unwrap();

        let mut reader = VectorIndex::open_existing(&path).unwrap().unwrap();
        assert_eq!(reader.dimensions().unwrap(), Some(2));
        let hits = reader
            .search(SearchQuery::Embedding(&[0.0, 1.0]), &SearchFilters::default(), 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(reader.delete("R").is_err());
    }

    #[test]
    fn cosine_similarity_correct() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn floats_bytes_roundtrip() {
        let floats = vec![1.5f32, -0.25, 3.0e-7];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&floats)), floats);
    }
}
