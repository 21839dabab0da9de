//! Hybrid search: weighted Reciprocal Rank Fusion over the keyword and
//! vector backends of one or more regulations.

use std::collections::{HashMap, HashSet};

use regdoc_core::{RegDocError, SearchConfig, SearchResult};
use tracing::{debug, warn};

use crate::backend::{IndexRecord, SearchBackend, SearchFilters, SearchHit, SearchQuery};
use crate::embedding::Embedder;
use crate::tokenize::tokens;

/// RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// One backend's result list and its fusion weight.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub weight: f64,
    pub hits: Vec<SearchHit>,
}

/// A deduplicated, fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub record: IndexRecord,
    pub score: f64,
    /// Best 0-based rank this record reached in any input list.
    pub best_rank: usize,
}

/// Fuse ranked lists: a hit at 0-based rank `r` adds
/// `weight / (RRF_K + r + 1)` to its record. Records are deduplicated by
/// `(reg_id, page_num, block_id)`; a record repeated within one list only
/// counts at its first rank.
///
/// The output's scores are non-increasing. Equal scores are ordered by the
/// lower `best_rank`, then by ascending `(reg_id, page_num, block_id)`, so
/// the same lists always fuse to the same order.
///
/// # Examples
///
/// ```
/// use regdoc_search::hybrid::{reciprocal_rank_fusion, RankedList};
///
/// let fused = reciprocal_rank_fusion(&[RankedList { weight: 1.0, hits: vec![] }], 10);
/// assert!(fused.is_empty());
/// ```
pub fn reciprocal_rank_fusion(lists: &[RankedList], limit: usize) -> Vec<FusedHit> {
    let mut fused: HashMap<(String, u32, String), FusedHit> = HashMap::new();

    for list in lists {
        let mut seen = HashSet::new();
        for (rank, hit) in list.hits.iter().enumerate() {
            let key = hit.record.key();
            if !seen.insert(key.clone()) {
                continue;
            }
            let contribution = list.weight / (RRF_K + rank as f64 + 1.0);
            let entry = fused.entry(key).or_insert_with(|| FusedHit {
                record: hit.record.clone(),
                score: 0.0,
                best_rank: rank,
            });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
        }
    }

    let mut results: Vec<FusedHit> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.record.key().cmp(&b.record.key()))
    });
    results.truncate(limit);
    results
}

/// The backends of one regulation. Either may be absent.
pub struct Segment {
    pub reg_id: String,
    pub keyword: Option<Box<dyn SearchBackend>>,
    pub vector: Option<Box<dyn SearchBackend>>,
}

/// Hybrid search over a set of regulation segments.
pub struct HybridSearch<'a> {
    config: &'a SearchConfig,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> HybridSearch<'a> {
    pub fn new(config: &'a SearchConfig, embedder: Option<&'a dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    /// Search `segments` for `query`.
    ///
    /// The query embedding is computed only when some segment has a vector
    /// backend. A failing vector backend degrades to keyword-only results.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Database`] if a keyword segment cannot be
    /// queried.
    pub fn search(
        &self,
        segments: &[Segment],
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>, RegDocError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let fetch = limit.saturating_mul(self.config.fetch_multiplier.max(1));

        let mut keyword_hits = Vec::new();
        for segment in segments {
            if let Some(backend) = &segment.keyword {
                keyword_hits.extend(backend.search(SearchQuery::Text(query), filters, fetch)?);
            }
        }
        let keyword_hits = merge_by_score(keyword_hits, fetch);

        let vector_hits = self.vector_hits(segments, query, filters, fetch);

        debug!(
            keyword = keyword_hits.len(),
            vector = vector_hits.len(),
            segments = segments.len(),
            "fusing backend results"
        );
        let fused = reciprocal_rank_fusion(
            &[
                RankedList {
                    weight: self.config.keyword_weight,
                    hits: keyword_hits,
                },
                RankedList {
                    weight: self.config.vector_weight,
                    hits: vector_hits,
                },
            ],
            limit,
        );

        let terms = tokens(query);
        Ok(fused
            .into_iter()
            .map(|hit| SearchResult {
                snippet: snippet(&hit.record.text, &terms, self.config.snippet_chars),
                score: hit.score,
                reg_id: hit.record.reg_id,
                page_num: hit.record.page_num,
                chapter_path: hit.record.chapter_path,
                block_id: hit.record.block_id,
                block_type: hit.record.block_type,
                section_number: hit.record.section_number,
            })
            .collect())
    }

    fn vector_hits(
        &self,
        segments: &[Segment],
        query: &str,
        filters: &SearchFilters,
        fetch: usize,
    ) -> Vec<SearchHit> {
        if self.config.vector_weight <= 0.0 || segments.iter().all(|s| s.vector.is_none()) {
            return Vec::new();
        }
        let Some(embedder) = self.embedder else {
            warn!("vector segments present but no embedder configured; keyword results only");
            return Vec::new();
        };
        let embedding = match embedder.embed_query(query) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "query embedding failed; keyword results only");
                return Vec::new();
            }
        };

        let mut hits = Vec::new();
        for segment in segments {
            let Some(backend) = &segment.vector else {
                continue;
            };
            match backend.search(SearchQuery::Embedding(&embedding), filters, fetch) {
                Ok(found) => hits.extend(found),
                Err(e) => warn!(reg_id = %segment.reg_id, error = %e, "vector backend skipped"),
            }
        }
        merge_by_score(hits, fetch)
    }
}

/// Merge one backend's hits from several segments into one ranked list.
fn merge_by_score(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.key().cmp(&b.record.key()))
    });
    hits.truncate(limit);
    hits
}

/// At most `max_chars` characters of `text` with whitespace collapsed,
/// starting shortly before the first query term when one occurs.
pub fn snippet(text: &str, terms: &[String], max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    if chars.len() <= max_chars {
        return collapsed;
    }

    let lowered: String = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let first_hit = terms
        .iter()
        .filter_map(|t| lowered.find(t.as_str()))
        .min()
        .map(|byte| lowered[..byte].chars().count())
        .unwrap_or(0);

    let start = first_hit
        .saturating_sub(max_chars / 4)
        .min(chars.len() - max_chars);
    let end = start + max_chars;
    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use regdoc_core::BlockType;

    fn hit(block: &str, score: f64) -> SearchHit {
        SearchHit {
            record: IndexRecord {
                reg_id: "R".into(),
                page_num: 1,
                block_id: block.into(),
                block_type: BlockType::Text,
                section_number: None,
                chapter_path: Vec::new(),
                text: String::new(),
            },
            score,
        }
    }

    fn list(blocks: &[&str]) -> RankedList {
        RankedList {
            weight: 1.0,
            hits: blocks
                .iter()
                .enumerate()
                .map(|(i, b)| hit(b, 100.0 - i as f64))
                .collect(),
        }
    }

    fn order(fused: &[FusedHit]) -> Vec<&str> {
        fused.iter().map(|h| h.record.block_id.as_str()).collect()
    }

    #[test]
    fn fusion_is_deterministic() {
        let lists = [list(&["a", "b", "c", "d"]), list(&["e", "c", "a", "f"])];
        let first = reciprocal_rank_fusion(&lists, 10);
        let second = reciprocal_rank_fusion(&lists, 10);
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn block_in_both_lists_outranks_single_list_blocks_at_its_position() {
        let keyword = list(&["a", "b", "c", "d", "e"]);
        let vector = list(&["f", "g", "d", "h", "i"]);
        let fused = reciprocal_rank_fusion(&[keyword.clone(), vector.clone()], 20);
        let pos = |id: &str| fused.iter().position(|h| h.record.block_id == id).unwrap();

        // "d" sits at rank 2 in the vector list and rank 3 in keyword.
        let best = 2;
        for single in ["c", "e", "h", "i"] {
            assert!(pos("d") < pos(single), "{single} outranked d");
        }
        assert!(pos("d") <= best + 2);
        assert_eq!(fused[pos("d")].best_rank, best);
    }

    #[test]
    fn ties_break_by_best_rank_then_key() {
        let fused = reciprocal_rank_fusion(&[list(&["b"]), list(&["a"])], 10);
        assert_eq!(order(&fused), vec!["a", "b"]);
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn fused_scores_never_increase() {
        let lists = [
            list(&["a", "b", "c", "d", "e", "f"]),
            list(&["f", "e", "x", "a", "y"]),
            RankedList {
                weight: 0.3,
                ..list(&["y", "c", "z"])
            },
        ];
        let fused = reciprocal_rank_fusion(&lists, 20);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
        for w in fused.windows(2).filter(|w| w[0].score == w[1].score) {
            assert!(
                (w[0].best_rank, w[0].record.key()) < (w[1].best_rank, w[1].record.key())
            );
        }
    }

    #[test]
    fn weights_scale_contributions() {
        let mut keyword = list(&["a"]);
        keyword.weight = 0.5;
        let fused = reciprocal_rank_fusion(&[keyword, list(&["b"])], 10);
        assert_eq!(order(&fused), vec!["b", "a"]);
        assert!((fused[1].score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn duplicates_within_a_list_count_once_and_limit_applies() {
        let fused = reciprocal_rank_fusion(&[list(&["a", "a", "b", "c"])], 2);
        assert_eq!(order(&fused), vec!["a", "b"]);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn snippet_centers_near_first_term() {
        let text = format!("{} battery capacity test {}", "x ".repeat(100), "y ".repeat(100));
        let s = snippet(&text, &["capacity".to_string()], 40);
        assert!(s.starts_with('…'));
        assert!(s.ends_with('…'));
        assert!(s.contains("capacity"));
        assert_eq!(s.chars().count(), 42);
    }

    #[test]
    fn short_text_is_returned_whole() {
        assert_eq!(snippet("a  b\n c", &[], 40), "a b c");
    }
}
