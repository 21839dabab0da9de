//! Cross-reference parsing: "see 4.2.1", "clause 3.1", "Chapter 2",
//! "第5章", "Table t0003-001".

use regex::Regex;
use regdoc_core::RegDocError;

/// What a reference points at, before lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    /// Section-number spellings to try in order.
    Section(Vec<String>),
    Table(String),
}

/// Recognizes reference phrases in free text.
///
/// # Examples
///
/// ```
/// use regdoc_service::reference::{ReferenceParser, ReferenceTarget};
///
/// let parser = ReferenceParser::new().unwrap();
/// assert_eq!(
///     parser.parse("as required by clause 3.1.2"),
///     Some(ReferenceTarget::Section(vec!["3.1.2".into()]))
/// );
/// assert_eq!(
///     parser.parse("see Table t0004-002"),
///     Some(ReferenceTarget::Table("t0004-002".into()))
/// );
/// assert_eq!(parser.parse("no reference here"), None);
/// ```
pub struct ReferenceParser {
    table_id: Regex,
    marker_en: Regex,
    keyword: Regex,
    marker_zh: Regex,
    dotted: Regex,
}

impl ReferenceParser {
    pub fn new() -> Result<Self, RegDocError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| RegDocError::Config(format!("invalid reference pattern: {e}")))
        };
        Ok(Self {
            table_id: compile(r"\b(t\d{4}-\d{3})\b")?,
            marker_en: compile(r"(?i)\b(chapter|section)\s+(\d{1,3}(?:\.\d{1,3})*)")?,
            keyword: compile(
                r"(?i)(?:\b(?:see|clause|article|paragraph|item|per)\s+|§\s*)(\d{1,3}(?:\.\d{1,3})*)",
            )?,
            marker_zh: compile(r"第\s*(\d{1,3}(?:\.\d{1,3})*)\s*([章节条款])")?,
            dotted: compile(r"\b(\d{1,3}(?:\.\d{1,3})+)\b")?,
        })
    }

    /// The earliest recognizable target in `text`.
    pub fn parse(&self, text: &str) -> Option<ReferenceTarget> {
        let mut found: Vec<(usize, ReferenceTarget)> = Vec::new();

        if let Some(caps) = self.table_id.captures(text) {
            let m = caps.get(1)?;
            found.push((m.start(), ReferenceTarget::Table(m.as_str().to_string())));
        }
        if let Some(caps) = self.marker_en.captures(text) {
            let start = caps.get(0)?.start();
            let number = caps.get(2)?.as_str();
            let marker = if caps.get(1)?.as_str().eq_ignore_ascii_case("chapter") {
                "Chapter"
            } else {
                "Section"
            };
            found.push((
                start,
                ReferenceTarget::Section(vec![number.to_string(), format!("{marker} {number}")]),
            ));
        }
        if let Some(caps) = self.keyword.captures(text) {
            let start = caps.get(0)?.start();
            found.push((start, ReferenceTarget::Section(vec![caps.get(1)?.as_str().to_string()])));
        }
        if let Some(caps) = self.marker_zh.captures(text) {
            let start = caps.get(0)?.start();
            let number = caps.get(1)?.as_str();
            let mut spellings = vec![number.to_string()];
            match caps.get(2)?.as_str() {
                "章" => spellings.push(format!("第{number}章")),
                "节" => spellings.push(format!("第{number}节")),
                _ => {}
            }
            found.push((start, ReferenceTarget::Section(spellings)));
        }
        if let Some(m) = self.dotted.find(text) {
            found.push((m.start(), ReferenceTarget::Section(vec![m.as_str().to_string()])));
        }

        // Stable sort keeps the more specific pattern first on equal starts.
        found.sort_by_key(|(start, _)| *start);
        found.into_iter().next().map(|(_, target)| target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<ReferenceTarget> {
        ReferenceParser::new().unwrap().parse(text)
    }

    fn section(spellings: &[&str]) -> Option<ReferenceTarget> {
        Some(ReferenceTarget::Section(
            spellings.iter().map(|s| s.to_string()).collect(),
        ))
    }

    #[test]
    fn english_markers_try_number_then_marker() {
        assert_eq!(parse("Chapter 2"), section(&["2", "Chapter 2"]));
        assert_eq!(parse("refer to section 4"), section(&["4", "Section 4"]));
    }

    #[test]
    fn chinese_markers() {
        assert_eq!(parse("详见第5章"), section(&["5", "第5章"]));
        assert_eq!(parse("按第4.2.1条执行"), section(&["4.2.1"]));
    }

    #[test]
    fn first_reference_wins() {
        assert_eq!(
            parse("see 4.2.1 and Table t0003-001"),
            section(&["4.2.1"])
        );
        assert_eq!(
            parse("Table t0003-001, see also 4.2"),
            Some(ReferenceTarget::Table("t0003-001".into()))
        );
    }

    #[test]
    fn bare_dotted_numbers_resolve_but_plain_numbers_do_not() {
        assert_eq!(parse("4.2 applies"), section(&["4.2"]));
        assert_eq!(parse("rated 220 volts"), None);
    }
}
