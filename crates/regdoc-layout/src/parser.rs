//! Heading recognition for regulation text.
//!
//! [`SectionParser::parse_line`] is a pure classifier: one normalized line
//! in, at most one [`SectionMatch`] out. The only stateful rule, the
//! monotonic numbering of single-level headings, lives in a
//! [`SequenceGuard`] owned by the caller.

use std::fmt;

use regdoc_core::RegDocError;
use regex::Regex;
use serde::Serialize;

/// Which pattern recognized a heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// `2.1.4 Title`
    MultiLevel,
    /// `3. Title`, subject to the sequence guard.
    SingleLevel,
    /// `Chapter 3 Title` / `第三章 Title`
    ChapterMarker,
    /// `Section 2 Title` / `第二节 Title`
    SectionMarker,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::MultiLevel => write!(f, "multi-level"),
            PatternKind::SingleLevel => write!(f, "single-level"),
            PatternKind::ChapterMarker => write!(f, "chapter-marker"),
            PatternKind::SectionMarker => write!(f, "section-marker"),
        }
    }
}

/// A recognized heading.
///
/// # Examples
///
/// ```
/// use regdoc_layout::parser::{PatternKind, SectionParser};
///
/// let parser = SectionParser::new(80).unwrap();
/// let m = parser.parse_line("2.1.4 Battery rooms", None).unwrap();
/// assert_eq!(m.section_number, "2.1.4");
/// assert_eq!(m.level, 3);
/// assert_eq!(m.kind, PatternKind::MultiLevel);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionMatch {
    pub section_number: String,
    pub title: String,
    pub level: u32,
    pub kind: PatternKind,
    /// Numeric value of a single-level heading.
    pub ordinal: Option<u32>,
}

/// Document-wide state for the single-level numbering rule.
///
/// A single-level heading `N. title` is only accepted when `N` is exactly
/// one more than the last accepted single-level number. The guard starts
/// at 0, so the first accepted top-level heading must be `1.`.
///
/// # Examples
///
/// ```
/// use regdoc_layout::parser::{SectionParser, SequenceGuard};
///
/// let parser = SectionParser::new(80).unwrap();
/// let mut guard = SequenceGuard::new();
///
/// let first = parser.parse_line("1. General", Some(&guard)).unwrap();
/// guard.observe(&first);
/// // A numbered list item restarting at 1 is not a heading any more.
/// assert!(parser.parse_line("1. Each operator shall", Some(&guard)).is_none());
/// assert!(parser.parse_line("2. Equipment", Some(&guard)).is_some());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceGuard {
    last_single_level: u32,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only single-level number that would currently be accepted.
    pub fn expected(&self) -> u32 {
        self.last_single_level + 1
    }

    /// Record an accepted heading. Only single-level matches move the guard.
    pub fn observe(&mut self, m: &SectionMatch) {
        if m.kind == PatternKind::SingleLevel {
            if let Some(n) = m.ordinal {
                self.last_single_level = n;
            }
        }
    }
}

/// Compiled heading patterns.
#[derive(Debug)]
pub struct SectionParser {
    multi_level: Regex,
    single_level: Regex,
    chapter_en: Regex,
    chapter_zh: Regex,
    section_en: Regex,
    section_zh: Regex,
    toc_line: Regex,
    max_heading_chars: usize,
}

impl SectionParser {
    /// Compile the heading patterns.
    ///
    /// Lines longer than `max_heading_chars` characters are never headings.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Parse`] if a pattern fails to compile.
    pub fn new(max_heading_chars: usize) -> Result<Self, RegDocError> {
        Ok(Self {
            multi_level: compile(r"^([1-9]\d{0,2}(?:\.\d{1,3})+)\.?\s*(.*)$")?,
            single_level: compile(r"^([1-9]\d{0,2})\s*[.、．]\s*(.+)$")?,
            chapter_en: compile(r"^(?i:chapter)\s+(\d{1,3}|[IVXLCDM]{1,7})\b[\s:.\-–—]*(.*)$")?,
            chapter_zh: compile(r"^第\s*([0-9一二三四五六七八九十百零〇两]{1,6})\s*章\s*(.*)$")?,
            section_en: compile(r"^(?i:section)\s+(\d{1,3})\b[\s:.\-–—]*(.*)$")?,
            section_zh: compile(r"^第\s*([0-9一二三四五六七八九十百零〇两]{1,6})\s*节\s*(.*)$")?,
            toc_line: compile(r"(?:\.{3,}|…{2,}|·{3,}|\s{3,})\s*\d+\s*$")?,
            max_heading_chars,
        })
    }

    /// Classify one line. The line is normalized first.
    ///
    /// With `guard = None` the single-level numbering rule is not applied;
    /// the page assembler uses this to re-recognize headings that were
    /// already validated when the tree was built.
    pub fn parse_line(&self, line: &str, guard: Option<&SequenceGuard>) -> Option<SectionMatch> {
        // Dot leaders and wide gaps only survive before whitespace is collapsed.
        if self.toc_line.is_match(line.trim()) {
            return None;
        }
        let line = normalize_line(line);
        if line.is_empty() || line.chars().count() > self.max_heading_chars {
            return None;
        }

        if let Some(caps) = self.multi_level.captures(&line) {
            let number = caps.get(1)?.as_str();
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            if !is_plausible_title(title) {
                return None;
            }
            return Some(SectionMatch {
                section_number: number.to_string(),
                title: title.to_string(),
                level: number.matches('.').count() as u32 + 1,
                kind: PatternKind::MultiLevel,
                ordinal: None,
            });
        }

        if let Some(caps) = self.single_level.captures(&line) {
            let number = caps.get(1)?.as_str();
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            let ordinal: u32 = number.parse().ok()?;
            if !is_plausible_title(title) {
                return None;
            }
            if let Some(guard) = guard {
                if ordinal != guard.expected() {
                    return None;
                }
            }
            return Some(SectionMatch {
                section_number: number.to_string(),
                title: title.to_string(),
                level: 1,
                kind: PatternKind::SingleLevel,
                ordinal: Some(ordinal),
            });
        }

        if let Some(caps) = self.chapter_en.captures(&line) {
            let numeral = caps.get(1)?.as_str();
            return Some(marker_match(
                format!("Chapter {numeral}"),
                caps.get(2).map(|m| m.as_str()),
                1,
                PatternKind::ChapterMarker,
            ));
        }
        if let Some(caps) = self.chapter_zh.captures(&line) {
            let numeral = caps.get(1)?.as_str();
            return Some(marker_match(
                format!("第{numeral}章"),
                caps.get(2).map(|m| m.as_str()),
                1,
                PatternKind::ChapterMarker,
            ));
        }

        if let Some(caps) = self.section_en.captures(&line) {
            let numeral = caps.get(1)?.as_str();
            return Some(marker_match(
                format!("Section {numeral}"),
                caps.get(2).map(|m| m.as_str()),
                2,
                PatternKind::SectionMarker,
            ));
        }
        if let Some(caps) = self.section_zh.captures(&line) {
            let numeral = caps.get(1)?.as_str();
            return Some(marker_match(
                format!("第{numeral}节"),
                caps.get(2).map(|m| m.as_str()),
                2,
                PatternKind::SectionMarker,
            ));
        }

        None
    }
}

fn compile(pattern: &str) -> Result<Regex, RegDocError> {
    Regex::new(pattern)
        .map_err(|e| RegDocError::Parse(format!("invalid heading pattern {pattern}: {e}")))
}

fn marker_match(
    section_number: String,
    title: Option<&str>,
    level: u32,
    kind: PatternKind,
) -> SectionMatch {
    SectionMatch {
        section_number,
        title: title.unwrap_or("").trim().to_string(),
        level,
        kind,
        ordinal: None,
    }
}

/// Numbered headings need a title that reads like one: it must contain a
/// letter, must not start with a digit (table rows, measurements) and must
/// not trail off like running text.
fn is_plausible_title(title: &str) -> bool {
    let Some(first) = title.chars().next() else {
        return false;
    };
    if first.is_ascii_digit() {
        return false;
    }
    if !title.chars().any(char::is_alphabetic) {
        return false;
    }
    !title.ends_with([';', '；', ',', '，', ':', '：'])
}

/// Strip markdown heading markers and emphasis, collapse whitespace.
///
/// # Examples
///
/// ```
/// use regdoc_layout::parser::normalize_line;
///
/// assert_eq!(normalize_line("  ## **3.2  Scope**  "), "3.2 Scope");
/// ```
pub fn normalize_line(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    let unbolded = trimmed
        .strip_prefix("**")
        .and_then(|s| s.strip_suffix("**"))
        .unwrap_or(trimmed);
    unbolded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> SectionParser {
        SectionParser::new(80).unwrap()
    }

    #[test]
    fn multi_level_level_is_dot_count_plus_one() {
        let p = parser();
        assert_eq!(p.parse_line("1.2 Terms", None).unwrap().level, 2);
        assert_eq!(p.parse_line("4.2.1.3 Alarms", None).unwrap().level, 4);
        let trailing = p.parse_line("3.1. Definitions", None).unwrap();
        assert_eq!(trailing.section_number, "3.1");
        assert_eq!(trailing.title, "Definitions");
    }

    #[test]
    fn multi_level_accepts_cjk_title_without_space() {
        let m = parser().parse_line("5.3直流系统", None).unwrap();
        assert_eq!(m.section_number, "5.3");
        assert_eq!(m.title, "直流系统");
    }

    #[test]
    fn multi_level_is_not_guarded() {
        let guard = SequenceGuard { last_single_level: 7 };
        assert!(parser().parse_line("2.1 Scope", Some(&guard)).is_some());
    }

    #[test]
    fn single_level_requires_next_number() {
        let p = parser();
        let mut guard = SequenceGuard::new();
        assert!(p.parse_line("2. Equipment", Some(&guard)).is_none());

        let one = p.parse_line("1. General Provisions", Some(&guard)).unwrap();
        assert_eq!(one.kind, PatternKind::SingleLevel);
        assert_eq!(one.ordinal, Some(1));
        guard.observe(&one);

        assert!(p.parse_line("1. again", Some(&guard)).is_none());
        assert!(p.parse_line("3. skipped", Some(&guard)).is_none());
        assert!(p.parse_line("2、设备", Some(&guard)).is_some());
    }

    #[test]
    fn single_level_without_guard_accepts_any_number() {
        let m = parser().parse_line("7. Maintenance", None).unwrap();
        assert_eq!(m.section_number, "7");
        assert_eq!(m.level, 1);
    }

    #[test]
    fn guard_ignores_other_kinds() {
        let p = parser();
        let mut guard = SequenceGuard::new();
        guard.observe(&p.parse_line("2.4 Scope", None).unwrap());
        guard.observe(&p.parse_line("Chapter 9 Misc", None).unwrap());
        assert_eq!(guard.expected(), 1);
    }

    #[test]
    fn chapter_and_section_markers() {
        let p = parser();
        let ch = p.parse_line("CHAPTER IV Protection", None).unwrap();
        assert_eq!(ch.section_number, "Chapter IV");
        assert_eq!(ch.title, "Protection");
        assert_eq!(ch.level, 1);
        assert_eq!(ch.kind, PatternKind::ChapterMarker);

        let zh = p.parse_line("第三章 直流电源", None).unwrap();
        assert_eq!(zh.section_number, "第三章");
        assert_eq!(zh.title, "直流电源");

        let sec = p.parse_line("Section 2: Batteries", None).unwrap();
        assert_eq!(sec.section_number, "Section 2");
        assert_eq!(sec.level, 2);
        assert_eq!(sec.kind, PatternKind::SectionMarker);

        let zh_sec = p.parse_line("第二节 蓄电池", None).unwrap();
        assert_eq!(zh_sec.level, 2);
    }

    #[test]
    fn chapter_word_in_prose_is_not_a_marker() {
        assert!(parser().parse_line("Chapters follow below", None).is_none());
        assert!(parser().parse_line("Chapter Introduction", None).is_none());
    }

    #[test]
    fn rejects_toc_lines_and_running_text() {
        let p = parser();
        assert!(p.parse_line("2.1 Scope ........ 14", None).is_none());
        assert!(p.parse_line("2.1 Scope      14", None).is_none());
        assert!(p.parse_line("2.1 where the voltage is measured,", None).is_none());
        assert!(p.parse_line("1.5 2.0 3.0", None).is_none());
        assert!(p.parse_line("0.5 mm clearance", None).is_none());
        assert!(p.parse_line("Plain paragraph text.", None).is_none());
        assert!(p.parse_line("", None).is_none());
    }

    #[test]
    fn rejects_overlong_lines() {
        let long = format!("2.1 {}", "word ".repeat(30));
        assert!(parser().parse_line(&long, None).is_none());
        assert!(SectionParser::new(400)
            .unwrap()
            .parse_line(&long, None)
            .is_some());
    }

    #[test]
    fn markdown_heading_markers_are_stripped() {
        let m = parser().parse_line("### **2.3 Cabling**", None).unwrap();
        assert_eq!(m.section_number, "2.3");
        assert_eq!(m.title, "Cabling");
    }
}
