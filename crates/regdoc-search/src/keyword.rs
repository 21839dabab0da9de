//! SQLite FTS5 keyword backend ranked by BM25.

use std::path::Path;

use regdoc_core::{BlockType, RegDocError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use tracing::debug;

use crate::backend::{
    is_section_scope, IndexRecord, SearchBackend, SearchFilters, SearchHit, SearchQuery,
};
use crate::tokenize::{fts_query, segment_for_index};

/// BM25 weight of the chapter path relative to the block body.
const CHAPTER_WEIGHT: f64 = 0.2;

/// Keyword index segment.
///
/// Block text and the block's chapter path are separate FTS5 columns, so a
/// term that only appears in a heading ranks below blocks that contain it.
///
/// # Examples
///
/// ```
/// use regdoc_core::BlockType;
/// use regdoc_search::backend::{IndexRecord, SearchBackend, SearchFilters, SearchQuery};
/// use regdoc_search::keyword::KeywordIndex;
///
/// let mut index = KeywordIndex::in_memory().unwrap();
/// let record = IndexRecord {
///     reg_id: "GB-50172".into(),
///     page_num: 3,
///     block_id: "p0003-b002".into(),
///     block_type: BlockType::Text,
///     section_number: Some("3.1".into()),
///     chapter_path: vec!["3 Batteries".into(), "3.1 Capacity".into()],
///     text: "Battery capacity shall be verified annually.".into(),
/// };
/// index.index(&[record], None).unwrap();
///
/// let hits = index
///     .search(SearchQuery::Text("capacity"), &SearchFilters::default(), 5)
///     .unwrap();
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].record.block_id, "p0003-b002");
/// ```
pub struct KeywordIndex {
    conn: Connection,
}

impl KeywordIndex {
    /// Open or create a keyword segment at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, RegDocError> {
        let conn = Connection::open(path)
            .map_err(|e| RegDocError::Database(format!("failed to open keyword index: {e}")))?;
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    /// Open an existing segment read-only, or `None` if there is none at
    /// `path`. No schema is created; writes through the handle fail.
    pub fn open_existing(path: &Path) -> Result<Option<Self>, RegDocError> {
        if !path.is_file() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RegDocError::Database(format!("failed to open keyword index: {e}")))?;
        Ok(Some(Self { conn }))
    }

    /// Create an in-memory segment (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, RegDocError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RegDocError::Database(format!("failed to create in-memory keyword index: {e}"))
        })?;
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), RegDocError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS blocks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    reg_id TEXT NOT NULL,
                    page_num INTEGER NOT NULL,
                    block_id TEXT NOT NULL,
                    block_type TEXT NOT NULL,
                    section_number TEXT,
                    chapter_path TEXT NOT NULL,
                    chapter_json TEXT NOT NULL,
                    text TEXT NOT NULL,
                    body TEXT NOT NULL,
                    heading TEXT NOT NULL,
                    UNIQUE (reg_id, block_id)
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5(
                    body, heading,
                    content='blocks', content_rowid='id'
                );

                CREATE TRIGGER IF NOT EXISTS blocks_ai AFTER INSERT ON blocks BEGIN
                    INSERT INTO blocks_fts(rowid, body, heading)
                    VALUES (new.id, new.body, new.heading);
                END;

                CREATE TRIGGER IF NOT EXISTS blocks_ad AFTER DELETE ON blocks BEGIN
                    INSERT INTO blocks_fts(blocks_fts, rowid, body, heading)
                    VALUES ('delete', old.id, old.body, old.heading);
                END;

                CREATE TRIGGER IF NOT EXISTS blocks_au AFTER UPDATE ON blocks BEGIN
                    INSERT INTO blocks_fts(blocks_fts, rowid, body, heading)
                    VALUES ('delete', old.id, old.body, old.heading);
                    INSERT INTO blocks_fts(rowid, body, heading)
                    VALUES (new.id, new.body, new.heading);
                END;
                ",
            )
            .map_err(|e| RegDocError::Database(format!("failed to create keyword schema: {e}")))
    }

    /// Number of indexed blocks.
    pub fn count(&self) -> Result<usize, RegDocError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .map_err(|e| RegDocError::Database(format!("failed to count blocks: {e}")))?;
        Ok(n as usize)
    }
}

impl SearchBackend for KeywordIndex {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn index(
        &mut self,
        records: &[IndexRecord],
        _embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize, RegDocError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| RegDocError::Database(format!("failed to begin transaction: {e}")))?;
        for record in records {
            // Delete first: REPLACE would bypass the FTS delete trigger.
            tx.execute(
                "DELETE FROM blocks WHERE reg_id = ?1 AND block_id = ?2",
                params![record.reg_id, record.block_id],
            )
            .map_err(|e| RegDocError::Database(format!("failed to replace block: {e}")))?;

            let chapter = record.chapter_path_string();
            tx.execute(
                "INSERT INTO blocks
                 (reg_id, page_num, block_id, block_type, section_number,
                  chapter_path, chapter_json, text, body, heading)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.reg_id,
                    record.page_num,
                    record.block_id,
                    record.block_type.as_str(),
                    record.section_number,
                    chapter,
                    serde_json::to_string(&record.chapter_path)?,
                    record.text,
                    segment_for_index(&record.text),
                    segment_for_index(&chapter),
                ],
            )
            .map_err(|e| RegDocError::Database(format!("failed to index block: {e}")))?;
        }
        tx.commit()
            .map_err(|e| RegDocError::Database(format!("failed to commit keyword batch: {e}")))?;
        Ok(records.len())
    }

    fn search(
        &self,
        query: SearchQuery<'_>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RegDocError> {
        let SearchQuery::Text(text) = query else {
            return Ok(Vec::new());
        };
        let match_expr = fts_query(text);
        if match_expr.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT b.reg_id, b.page_num, b.block_id, b.block_type, b.section_number,
                    b.chapter_json, b.text, bm25(blocks_fts, 1.0, {CHAPTER_WEIGHT:.1}) AS rank
             FROM blocks_fts
             JOIN blocks b ON b.id = blocks_fts.rowid
             WHERE blocks_fts MATCH ?",
        );
        let mut values = vec![Value::Text(match_expr)];
        push_filters(&mut sql, &mut values, filters);
        sql.push_str(" ORDER BY rank, b.reg_id, b.page_num, b.block_id LIMIT ?");
        values.push(Value::Integer(limit as i64));

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| RegDocError::Database(format!("failed to prepare FTS query: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let block_type: String = row.get(3)?;
                let chapter_json: String = row.get(5)?;
                let rank: f64 = row.get(7)?;
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
                    rank,
                ))
            })
            .map_err(|e| RegDocError::Database(format!("FTS query failed: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            let (record, rank) =
                row.map_err(|e| RegDocError::Database(format!("failed to read FTS row: {e}")))?;
            // bm25() is lower-is-better; flip it so higher scores rank first.
            hits.push(SearchHit {
                record,
                score: -rank,
            });
        }
        debug!(hits = hits.len(), "keyword search");
        Ok(hits)
    }

    fn delete(&mut self, reg_id: &str) -> Result<usize, RegDocError> {
        self.conn
            .execute("DELETE FROM blocks WHERE reg_id = ?1", params![reg_id])
            .map_err(|e| RegDocError::Database(format!("failed to delete blocks: {e}")))
    }

    fn close(self: Box<Self>) -> Result<(), RegDocError> {
        self.conn
            .close()
            .map_err(|(_, e)| RegDocError::Database(format!("failed to close keyword index: {e}")))
    }
}

fn push_filters(sql: &mut String, values: &mut Vec<Value>, filters: &SearchFilters) {
    if let Some(reg_id) = &filters.reg_id {
        sql.push_str(" AND b.reg_id = ?");
        values.push(Value::Text(reg_id.clone()));
    }
    if !filters.block_types.is_empty() {
        let marks = vec!["?"; filters.block_types.len()].join(", ");
        sql.push_str(&format!(" AND b.block_type IN ({marks})"));
        values.extend(
            filters
                .block_types
                .iter()
                .map(|t| Value::Text(t.as_str().to_string())),
        );
    }
    if let Some(section) = &filters.section_number {
        sql.push_str(" AND b.section_number = ?");
        values.push(Value::Text(section.clone()));
    }
    if let Some(scope) = filters.chapter_scope.as_deref().map(str::trim) {
        if is_section_scope(scope) {
            sql.push_str(" AND (b.section_number = ? OR substr(b.section_number, 1, ?) = ?)");
            values.push(Value::Text(scope.to_string()));
            values.push(Value::Integer(scope.len() as i64 + 1));
            values.push(Value::Text(format!("{scope}.")));
        } else if !scope.is_empty() {
            sql.push_str(" AND instr(b.chapter_path, ?) > 0");
            values.push(Value::Text(scope.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(block: &str, section: &str, block_type: BlockType, text: &str) -> IndexRecord {
        IndexRecord {
            reg_id: "R".into(),
            page_num: block[1..5].parse().unwrap(),
            block_id: block.into(),
            block_type,
            section_number: Some(section.into()),
            chapter_path: vec![format!("{section} Chapter")],
            text: text.into(),
        }
    }

    fn seeded() -> KeywordIndex {
        let mut index = KeywordIndex::in_memory().unwrap();
        index
            .index(
                &[
                    record("p0001-b000", "1", BlockType::Text, "General provisions for DC systems"),
                    record("p0002-b000", "2.1", BlockType::Text, "Battery float voltage and ripple"),
                    record("p0002-b001", "2.1", BlockType::Table, "| Type | Voltage |"),
                    record("p0003-b000", "2.10", BlockType::Text, "Charger voltage limits"),
                    record("p0004-b000", "3", BlockType::Text, "直流系统的蓄电池容量"),
                ],
                None,
            )
            .unwrap();
        index
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.block_id.as_str()).collect()
    }

    #[test]
    fn bm25_ranks_matching_blocks() {
        let index = seeded();
        let hits = index
            .search(SearchQuery::Text("voltage"), &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn filters_apply_in_sql() {
        let index = seeded();
        let tables = SearchFilters {
            block_types: vec![BlockType::Table],
            ..SearchFilters::default()
        };
        let hits = index.search(SearchQuery::Text("voltage"), &tables, 10).unwrap();
        assert_eq!(ids(&hits), vec!["p0002-b001"]);

        let scoped = SearchFilters {
            chapter_scope: Some("2.1".into()),
            ..SearchFilters::default()
        };
        let hits = index.search(SearchQuery::Text("voltage"), &scoped, 10).unwrap();
        let mut found = ids(&hits);
        found.sort();
        assert_eq!(found, vec!["p0002-b000", "p0002-b001"]);
    }

    #[test]
    fn cjk_query_matches_by_character() {
        let index = seeded();
        let hits = index
            .search(SearchQuery::Text("蓄电池"), &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(ids(&hits), vec!["p0004-b000"]);
    }

    #[test]
    fn reindexing_replaces_and_delete_removes() {
        let mut index = seeded();
        index
            .index(
                &[record("p0001-b000", "1", BlockType::Text, "Replaced wording")],
                None,
            )
            .unwrap();
        assert_eq!(index.count().unwrap(), 5);
        let hits = index
            .search(SearchQuery::Text("provisions"), &SearchFilters::default(), 10)
            .unwrap();
        assert!(hits.is_empty());

        assert_eq!(index.delete("R").unwrap(), 5);
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn body_matches_outrank_chapter_path_matches() {
        let mut index = KeywordIndex::in_memory().unwrap();
        let in_path = IndexRecord {
            chapter_path: vec!["4 Batteries".into(), "4.2 Battery rooms".into()],
            ..record("p0005-b000", "4.2", BlockType::Text, "Rooms shall be ventilated outside.")
        };
        index
            .index(
                &[
                    in_path,
                    record("p0006-b000", "5", BlockType::Text, "Each battery shall be labelled."),
                    record("p0007-b000", "6", BlockType::Text, "Cables shall be fire retardant."),
                    record("p0007-b001", "6", BlockType::Text, "Trays shall be earthed."),
                    record("p0008-b000", "7", BlockType::Text, "Lighting shall be provided."),
                ],
                None,
            )
            .unwrap();

        let hits = index
            .search(SearchQuery::Text("battery"), &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(ids(&hits), vec!["p0006-b000", "p0005-b000"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn existing_segment_opens_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyword.db");
        assert!(KeywordIndex::open_existing(&path).unwrap().is_none());
        assert!(!path.exists());

        let mut writer = KeywordIndex::open(&path).unwrap();
        writer
            .index(&[record("p0001-b000", "1", BlockType::Text, "Earthing conductors")], None)
            .unwrap();
        Box::new(writer).close().unwrap();

        let mut reader = KeywordIndex::open_existing(&path).unwrap().unwrap();
        let hits = reader
            .search(SearchQuery::Text("earthing"), &SearchFilters::default(), 5)
            .unwrap();
        assert_eq!(ids(&hits), vec!["p0001-b000"]);
        assert!(matches!(reader.delete("R"), Err(RegDocError::Database(_))));
        assert_eq!(reader.count().unwrap(), 1);
    }

    #[test]
    fn embedding_queries_and_empty_text_return_nothing() {
        let index = seeded();
        let filters = SearchFilters::default();
        assert!(index
            .search(SearchQuery::Embedding(&[1.0]), &filters, 10)
            .unwrap()
            .is_empty());
        assert!(index.search(SearchQuery::Text("?!"), &filters, 10).unwrap().is_empty());
    }
}
