//! SQLite page store for one regulation.
//!
//! Every record (summary, structure, page, table registry) is a JSON
//! document written by a single statement, so each write is atomic on its
//! own. Readers open their own connection per request.

use std::path::Path;

use regdoc_core::{DocumentStructure, PageDocument, RegDocError, RegulationSummary};
use regdoc_layout::tables::TableRegistry;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Persisted pages, chapter tree and table registry of one regulation.
///
/// # Examples
///
/// ```
/// use regdoc_store::PageStore;
///
/// let store = PageStore::in_memory("GB-50172").unwrap();
/// assert!(store.page_numbers().unwrap().is_empty());
/// assert!(store.registry().unwrap().is_none());
/// ```
pub struct PageStore {
    conn: Connection,
    reg_id: String,
}

impl PageStore {
    /// Open or create the store at `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if the database cannot be opened.
    pub fn create(path: &Path, reg_id: &str) -> Result<Self, RegDocError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegDocError::Database(format!("failed to create store directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RegDocError::Database(format!("failed to open page store: {e}")))?;
        let store = Self {
            conn,
            reg_id: reg_id.to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing store read-only.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::RegulationNotFound`] if there is no store at
    /// `path`, or [`RegDocError::Database`] if it cannot be opened.
    pub fn open(path: &Path, reg_id: &str) -> Result<Self, RegDocError> {
        if !path.is_file() {
            return Err(RegDocError::RegulationNotFound(reg_id.to_string()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RegDocError::Database(format!("failed to open page store: {e}")))?;
        Ok(Self {
            conn,
            reg_id: reg_id.to_string(),
        })
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if schema creation fails.
    pub fn in_memory(reg_id: &str) -> Result<Self, RegDocError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RegDocError::Database(format!("failed to create in-memory page store: {e}"))
        })?;
        let store = Self {
            conn,
            reg_id: reg_id.to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RegDocError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS regulation (
                    reg_id TEXT PRIMARY KEY,
                    record TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS structure (
                    reg_id TEXT PRIMARY KEY,
                    record TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pages (
                    reg_id TEXT NOT NULL,
                    page_num INTEGER NOT NULL,
                    record TEXT NOT NULL,
                    PRIMARY KEY (reg_id, page_num)
                );

                CREATE TABLE IF NOT EXISTS table_registry (
                    reg_id TEXT PRIMARY KEY,
                    record TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| RegDocError::Database(format!("failed to create schema: {e}")))
    }

    pub fn reg_id(&self) -> &str {
        &self.reg_id
    }

    pub fn write_summary(&self, summary: &RegulationSummary) -> Result<(), RegDocError> {
        self.put_singleton("regulation", summary)
    }

    pub fn write_structure(&self, structure: &DocumentStructure) -> Result<(), RegDocError> {
        self.put_singleton("structure", structure)
    }

    pub fn write_registry(&self, registry: &TableRegistry) -> Result<(), RegDocError> {
        self.put_singleton("table_registry", registry)
    }

    pub fn write_page(&self, page: &PageDocument) -> Result<(), RegDocError> {
        let record = serde_json::to_string(page)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO pages (reg_id, page_num, record) VALUES (?1, ?2, ?3)",
                params![self.reg_id, page.page_num, record],
            )
            .map_err(|e| {
                RegDocError::Database(format!("failed to write page {}: {e}", page.page_num))
            })?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegDocError::RegulationNotFound`] if no summary was written.
    pub fn summary(&self) -> Result<RegulationSummary, RegDocError> {
        self.get_singleton("regulation")?
            .ok_or_else(|| RegDocError::RegulationNotFound(self.reg_id.clone()))
    }

    /// The chapter tree; an empty tree if none was written.
    pub fn structure(&self) -> Result<DocumentStructure, RegDocError> {
        Ok(self.get_singleton("structure")?.unwrap_or_default())
    }

    /// The table registry, if one was written.
    pub fn registry(&self) -> Result<Option<TableRegistry>, RegDocError> {
        Ok(self
            .get_singleton::<TableRegistry>("table_registry")?
            .map(TableRegistry::reindex))
    }

    pub fn page(&self, page_num: u32) -> Result<Option<PageDocument>, RegDocError> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM pages WHERE reg_id = ?1 AND page_num = ?2",
                params![self.reg_id, page_num],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegDocError::Database(format!("failed to read page {page_num}: {e}")))?;
        record
            .map(|r| serde_json::from_str(&r).map_err(RegDocError::from))
            .transpose()
    }

    /// Pages with `start <= page_num <= end`, ascending.
    pub fn pages_in(&self, start: u32, end: u32) -> Result<Vec<PageDocument>, RegDocError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT record FROM pages
                 WHERE reg_id = ?1 AND page_num BETWEEN ?2 AND ?3
                 ORDER BY page_num",
            )
            .map_err(|e| RegDocError::Database(format!("failed to prepare page query: {e}")))?;

        let rows = stmt
            .query_map(params![self.reg_id, start, end], |row| row.get::<_, String>(0))
            .map_err(|e| RegDocError::Database(format!("failed to query pages: {e}")))?;

        let mut pages = Vec::new();
        for row in rows {
            let record =
                row.map_err(|e| RegDocError::Database(format!("failed to read page row: {e}")))?;
            pages.push(serde_json::from_str(&record)?);
        }
        Ok(pages)
    }

    /// Every stored page, ascending.
    pub fn all_pages(&self) -> Result<Vec<PageDocument>, RegDocError> {
        self.pages_in(0, u32::MAX)
    }

    pub fn page_numbers(&self) -> Result<Vec<u32>, RegDocError> {
        let mut stmt = self
            .conn
            .prepare("SELECT page_num FROM pages WHERE reg_id = ?1 ORDER BY page_num")
            .map_err(|e| RegDocError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![self.reg_id], |row| row.get(0))
            .map_err(|e| RegDocError::Database(format!("failed to query page numbers: {e}")))?;

        let mut nums = Vec::new();
        for row in rows {
            nums.push(row.map_err(|e| RegDocError::Database(format!("failed to read row: {e}")))?);
        }
        Ok(nums)
    }

    fn put_singleton<T: Serialize>(&self, table: &str, value: &T) -> Result<(), RegDocError> {
        let record = serde_json::to_string(value)?;
        self.conn
            .execute(
                &format!("INSERT OR REPLACE INTO {table} (reg_id, record) VALUES (?1, ?2)"),
                params![self.reg_id, record],
            )
            .map_err(|e| RegDocError::Database(format!("failed to write {table}: {e}")))?;
        Ok(())
    }

    fn get_singleton<T: DeserializeOwned>(&self, table: &str) -> Result<Option<T>, RegDocError> {
        let record: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT record FROM {table} WHERE reg_id = ?1"),
                params![self.reg_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RegDocError::Database(format!("failed to read {table}: {e}")))?;
        record
            .map(|r| serde_json::from_str(&r).map_err(RegDocError::from))
            .transpose()
    }
}
