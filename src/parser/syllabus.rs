use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Level;
use crate::pdf;

// Learning-objective marker: "FL-1.1.1 (K1) Identyfikowanie typowych celow
// testowania". The description runs to the end of the line.
static LO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(FL-(\d+)\.(\d+)\.(\d+))\s+\((K[123])\)\s+([^\n]+)").unwrap()
});

const CONTENT_CAP: usize = 800;
const EXCERPT_LEN: usize = 300;
// Window for the last objective in the document, which has no next marker.
const TAIL_WINDOW: usize = 500;

pub const FALLBACK_EXPLANATION: &str =
    "Odpowiedź zgodna z sylabusem ISTQB Foundation Level 4.0";

/// One learning objective's slice of the syllabus. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyllabusSection {
    pub learning_objective: String,
    pub chapter: u32,
    pub section: u32,
    pub subsection: u32,
    pub level: Level,
    /// One-line label following the marker.
    pub description: String,
    /// Whitespace-collapsed body, capped at 800 characters.
    pub content: String,
}

enum Source {
    File(PathBuf),
    Text(String),
}

enum Cache {
    Empty,
    Ready(std::collections::HashMap<String, SyllabusSection>),
}

/// Parses the syllabus once per process and serves point lookups from an
/// explicit cache. The syllabus document is immutable, so the cache is
/// never invalidated.
pub struct SyllabusParser {
    source: Source,
    cache: Mutex<Cache>,
}

impl SyllabusParser {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
            cache: Mutex::new(Cache::Empty),
        }
    }

    /// Parser over already-extracted text. Used where the caller owns the
    /// extraction step (and by tests).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            source: Source::Text(text.into()),
            cache: Mutex::new(Cache::Empty),
        }
    }

    /// Full-document parse. Fills the lookup cache and returns sections in
    /// document order.
    pub fn parse(&self) -> Result<Vec<SyllabusSection>> {
        let mut cache = self.cache.lock().unwrap();
        self.populate(&mut cache)
    }

    /// Point lookup by objective code. The document is parsed on the first
    /// lookup ever; afterwards a miss means the objective is absent from
    /// the syllabus.
    pub fn section(&self, learning_objective: &str) -> Result<Option<SyllabusSection>> {
        // Holding the lock while populating doubles as the "populating"
        // state: concurrent first lookups queue here instead of racing.
        let mut cache = self.cache.lock().unwrap();
        if matches!(*cache, Cache::Empty) {
            self.populate(&mut cache)?;
        }
        let Cache::Ready(map) = &*cache else {
            return Ok(None);
        };
        Ok(map.get(learning_objective).cloned())
    }

    /// All sections of one chapter, in objective order.
    pub fn sections_by_chapter(&self, chapter: u32) -> Result<Vec<SyllabusSection>> {
        let mut cache = self.cache.lock().unwrap();
        if matches!(*cache, Cache::Empty) {
            self.populate(&mut cache)?;
        }
        let Cache::Ready(map) = &*cache else {
            return Ok(Vec::new());
        };
        let mut sections: Vec<SyllabusSection> =
            map.values().filter(|s| s.chapter == chapter).cloned().collect();
        sections.sort_by_key(|s| (s.section, s.subsection));
        Ok(sections)
    }

    /// Compose the explanation shown with a question. Never fails: on an
    /// unknown code or a lookup problem the base explanation is returned
    /// unchanged (or the fixed fallback sentence when empty).
    pub fn enhanced_explanation(&self, learning_objective: &str, base: &str) -> String {
        let section = match self.section(learning_objective) {
            Ok(section) => section,
            Err(e) => {
                warn!("syllabus lookup failed for {learning_objective}: {e:#}");
                None
            }
        };
        let Some(section) = section else {
            return if base.is_empty() {
                FALLBACK_EXPLANATION.to_string()
            } else {
                base.to_string()
            };
        };

        let excerpt: String = section.content.chars().take(EXCERPT_LEN).collect();
        let ellipsis = if section.content.chars().count() > EXCERPT_LEN {
            "..."
        } else {
            ""
        };

        format!(
            "**{}** ({}) - {}\n\n{}\n\n**Wyciąg z sylabusa:**\n{}{}\n\n_Rozdział {}, Sekcja {}.{}_",
            section.learning_objective,
            section.level,
            section.description,
            base,
            excerpt,
            ellipsis,
            section.chapter,
            section.chapter,
            section.section,
        )
    }

    fn populate(&self, cache: &mut Cache) -> Result<Vec<SyllabusSection>> {
        let sections = match &self.source {
            Source::File(path) => {
                let doc = pdf::extract_file(path)?;
                parse_syllabus_text(&doc.text)
            }
            Source::Text(text) => parse_syllabus_text(text),
        };
        if sections.is_empty() {
            warn!("no learning objectives found in syllabus");
        } else {
            info!("parsed {} learning objectives from syllabus", sections.len());
        }

        // Later occurrences of a code overwrite earlier ones.
        let map = sections
            .iter()
            .map(|s| (s.learning_objective.clone(), s.clone()))
            .collect();
        *cache = Cache::Ready(map);
        Ok(sections)
    }
}

/// Two-stage syllabus parse: locate all markers first, then slice content
/// between consecutive markers (tail window after the last one).
pub fn parse_syllabus_text(text: &str) -> Vec<SyllabusSection> {
    let markers: Vec<_> = LO_RE.captures_iter(text).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let marker = caps.get(0).unwrap();
        let start = marker.end();
        let end = match markers.get(i + 1).and_then(|next| next.get(0)) {
            Some(next) => next.start(),
            None => floor_char_boundary(text, (start + TAIL_WINDOW).min(text.len())),
        };

        let Some(level) = Level::from_code(&caps[5]) else {
            continue;
        };

        sections.push(SyllabusSection {
            learning_objective: caps[1].to_string(),
            chapter: caps[2].parse().unwrap_or(0),
            section: caps[3].parse().unwrap_or(0),
            subsection: caps[4].parse().unwrap_or(0),
            level,
            description: caps[6].trim().to_string(),
            content: clean_content(&text[start..end]),
        });
    }

    sections
}

/// Collapse whitespace runs (including newlines) to single spaces, trim,
/// cap at 800 characters.
fn clean_content(raw: &str) -> String {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.chars().take(CONTENT_CAP).collect()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/syllabus.txt").unwrap()
    }

    #[test]
    fn fixture_sections() {
        let sections = parse_syllabus_text(&fixture());
        assert_eq!(sections.len(), 5);

        let first = &sections[0];
        assert_eq!(first.learning_objective, "FL-1.1.1");
        assert_eq!((first.chapter, first.section, first.subsection), (1, 1, 1));
        assert_eq!(first.level, Level::K1);
        assert!(first.description.contains("celów testowania"));
        assert!(!first.content.is_empty());
    }

    #[test]
    fn content_is_clean() {
        for section in parse_syllabus_text(&fixture()) {
            assert!(section.content.chars().count() <= 800);
            assert!(!section.content.contains('\n'));
            assert!(!section.content.starts_with(' '));
        }
    }

    #[test]
    fn adjacent_markers_give_empty_content() {
        let sections = parse_syllabus_text(&fixture());
        let empty = sections
            .iter()
            .find(|s| s.learning_objective == "FL-1.2.1")
            .unwrap();
        assert!(empty.content.is_empty());
    }

    #[test]
    fn long_content_capped() {
        let text = format!(
            "FL-2.1.1 (K2) Opis celu\n{}\nFL-2.1.2 (K1) Nastepny cel\ntresc",
            "słowo ".repeat(400)
        );
        let sections = parse_syllabus_text(&text);
        assert_eq!(sections[0].content.chars().count(), 800);
    }

    #[test]
    fn tail_window_bounds_last_section() {
        let text = format!("FL-6.1.1 (K1) Ostatni cel\n{}", "x".repeat(2000));
        let sections = parse_syllabus_text(&text);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].content.chars().count() <= TAIL_WINDOW);
    }

    #[test]
    fn lookup_bootstraps_once() {
        let parser = SyllabusParser::from_text(fixture());
        let hit = parser.section("FL-1.1.2").unwrap();
        assert!(hit.is_some());
        // populated cache: a genuine miss stays a miss, no re-parse needed
        assert!(parser.section("FL-9.9.9").unwrap().is_none());
    }

    #[test]
    fn sections_by_chapter_sorted() {
        let parser = SyllabusParser::from_text(fixture());
        let chapter1 = parser.sections_by_chapter(1).unwrap();
        assert_eq!(chapter1.len(), 4);
        let codes: Vec<&str> = chapter1.iter().map(|s| s.learning_objective.as_str()).collect();
        assert_eq!(codes, ["FL-1.1.1", "FL-1.1.2", "FL-1.2.1", "FL-1.2.2"]);
    }

    #[test]
    fn enhanced_explanation_known_code() {
        let parser = SyllabusParser::from_text(fixture());
        let text = parser.enhanced_explanation("FL-1.1.1", "Odpowiedź a jest poprawna.");
        assert!(text.contains("**FL-1.1.1** (K1)"));
        assert!(text.contains("Odpowiedź a jest poprawna."));
        assert!(text.contains("Wyciąg z sylabusa"));
        assert!(text.contains("_Rozdział 1, Sekcja 1.1_"));
    }

    #[test]
    fn enhanced_explanation_unknown_code() {
        let parser = SyllabusParser::from_text(fixture());
        assert_eq!(
            parser.enhanced_explanation("FL-9.9.9", "Tekst bazowy."),
            "Tekst bazowy."
        );
        assert_eq!(
            parser.enhanced_explanation("FL-9.9.9", ""),
            FALLBACK_EXPLANATION
        );
    }

    #[test]
    fn enhanced_explanation_survives_missing_file() {
        let parser = SyllabusParser::from_file("tests/fixtures/nonexistent.pdf");
        assert_eq!(parser.enhanced_explanation("FL-1.1.1", "Baza."), "Baza.");
        assert_eq!(
            parser.enhanced_explanation("FL-1.1.1", ""),
            FALLBACK_EXPLANATION
        );
    }

    #[test]
    fn excerpt_ellipsis_only_when_truncated() {
        let long = format!(
            "FL-3.1.1 (K2) Cel z dluga trescia\n{}\nFL-3.1.2 (K1) Krotki cel\nkrotka tresc",
            "słowo ".repeat(120)
        );
        let parser = SyllabusParser::from_text(long);
        let text = parser.enhanced_explanation("FL-3.1.1", "");
        assert!(text.contains("..."));

        let short = parser.enhanced_explanation("FL-3.1.2", "");
        assert!(!short.contains("..."));
    }
}
