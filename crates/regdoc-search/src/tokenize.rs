//! Tokenization shared by the keyword index and the hash embedder.
//!
//! CJK text has no word separators, so every CJK character becomes a token
//! of its own. Everything else splits on non-alphanumeric characters.

/// Whether `c` belongs to a CJK script block.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // kana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // compatibility ideographs
        | 0x20000..=0x2A6DF) // extension B
}

/// Lowercased tokens of `text`.
///
/// # Examples
///
/// ```
/// use regdoc_search::tokenize::tokens;
///
/// assert_eq!(tokens("DC-bus 直流"), vec!["dc", "bus", "直", "流"]);
/// assert_eq!(tokens("2.1.4 Ripple"), vec!["2", "1", "4", "ripple"]);
/// ```
pub fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.push(c.to_string());
        } else if c.is_alphanumeric() || c == '_' {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Text as the FTS5 `unicode61` tokenizer should see it: CJK characters
/// separated by spaces so each one is indexed as a term.
pub fn segment_for_index(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 2);
    for c in text.chars() {
        if is_cjk(c) {
            out.push(' ');
            out.push(c);
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// FTS5 query matching any token of `query`. Each token is quoted so
/// FTS5 operators in user input are inert. Empty when nothing remains.
///
/// # Examples
///
/// ```
/// use regdoc_search::tokenize::fts_query;
///
/// assert_eq!(fts_query("ripple AND voltage*"), r#""ripple" OR "and" OR "voltage""#);
/// assert_eq!(fts_query("  \"*\" "), "");
/// ```
pub fn fts_query(query: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    tokens(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_characters_are_separate_tokens() {
        assert_eq!(tokens("蓄电池容量"), vec!["蓄", "电", "池", "容", "量"]);
        assert_eq!(tokens("VRLA蓄电池"), vec!["vrla", "蓄", "电", "池"]);
    }

    #[test]
    fn segmentation_spaces_out_cjk_only() {
        assert_eq!(segment_for_index("DC 直流"), "DC  直  流 ");
    }

    #[test]
    fn duplicate_query_tokens_collapse() {
        assert_eq!(fts_query("bus Bus BUS"), "\"bus\"");
    }

    #[test]
    fn cjk_query_becomes_disjunction() {
        assert_eq!(fts_query("直流"), "\"直\" OR \"流\"");
    }
}
