//! Hybrid keyword + vector search over regulation content blocks.
//!
//! - [`keyword::KeywordIndex`]: SQLite FTS5 with BM25 ranking; CJK text is
//!   indexed one character per term
//! - [`vector::VectorIndex`]: exact cosine search over f32 BLOB embeddings
//! - [`embedding`]: the [`embedding::Embedder`] trait and its providers
//! - [`hybrid`]: weighted Reciprocal Rank Fusion across backends and
//!   regulations
//!
//! Both indexes implement [`backend::SearchBackend`], one segment file per
//! regulation.

pub mod backend;
pub mod embedding;
pub mod hybrid;
pub mod keyword;
pub mod tokenize;
pub mod vector;
