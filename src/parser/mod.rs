pub mod answer_key;
pub mod questions;
pub mod syllabus;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::pdf;
use answer_key::parse_answer_key;
use questions::{parse_questions, ParsedQuestion, SetParse};

/// Cognitive level of a question or learning objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    K1,
    K2,
    K3,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::K1 => "K1",
            Level::K2 => "K2",
            Level::K3 => "K3",
        }
    }

    pub fn from_code(code: &str) -> Option<Level> {
        match code {
            "K1" => Some(Level::K1),
            "K2" => Some(Level::K2),
            "K3" => Some(Level::K3),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::from_code(&s.trim().to_uppercase())
            .ok_or_else(|| format!("unknown level: {s} (expected K1, K2 or K3)"))
    }
}

/// One of the four official sample-exam sets, each published as a
/// questions/answers document pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionSet {
    A,
    B,
    C,
    D,
}

impl QuestionSet {
    pub const ALL: [QuestionSet; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn letter(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    pub fn from_letter(s: &str) -> Option<QuestionSet> {
        match s {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }

    /// Questions document of the official Polish CTFL 4.0 publication.
    pub fn questions_file(self) -> &'static str {
        match self {
            Self::A => "CTFL_4.0_Egzamin_przykladowy_zbior_A_v.1.61.0.0.3-PL.pdf",
            Self::B => "CTFL_4.0_Pytania_przykladowe_zbior_B_w.1.61.0.0.4-PL.pdf",
            Self::C => "CTFL_4.0_Pytania_przykladowe_zbior_C_w.1.51.0.0.4-PL.pdf",
            Self::D => "CTFL_4.0_Pytania_przykladowe_zbior_Dw-1.4_1.0.0.3-PL.pdf",
        }
    }

    /// Matching answer-key document.
    pub fn answers_file(self) -> &'static str {
        match self {
            Self::A => "CTFL-4.0_Egzamin-przykladowy-zbior-A-odpowiedzi_v.-1.61.0.0.5-PL.pdf",
            Self::B => "CTFL_4.0_Pytania_przykladowe_odpowiedzi_zbior_B_w.1.6_w.1.0.0.5-PL.pdf",
            Self::C => "CTFL_4.0_Pytania_przykladowe_odpowiedzi_zbior_C_w.1.5_w.1.0.0.4-PL.pdf",
            Self::D => "CTFL_4.0_pytania_przykladowe_odpowiedzi_zbior_D_w.1.4_1.0.0.2-PL.pdf",
        }
    }
}

impl fmt::Display for QuestionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for QuestionSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestionSet::from_letter(&s.trim().to_uppercase())
            .ok_or_else(|| format!("unknown question set: {s} (expected A, B, C or D)"))
    }
}

/// Why a question block was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Stem/options did not match the expected block shape.
    Unparsable,
    /// No answer-key row for the question number.
    NoAnswerKey,
    /// Answer-key letters outside A-D.
    BadAnswerLetters,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Unparsable => "unparsable block",
            SkipReason::NoAnswerKey => "no answer-key row",
            SkipReason::BadAnswerLetters => "answers outside A-D",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SkippedQuestion {
    pub number: String,
    pub reason: SkipReason,
}

/// Per-set outcome within a run.
#[derive(Debug)]
pub struct SetReport {
    pub set: QuestionSet,
    pub parsed: usize,
    pub skipped: Vec<SkippedQuestion>,
}

/// Structured result of a full import run. Logs are advisory; these
/// counters and identifiers are the interface.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub questions: Vec<ParsedQuestion>,
    pub sets: Vec<SetReport>,
    pub failed: Vec<(QuestionSet, String)>,
}

impl ParseReport {
    pub fn parsed(&self) -> usize {
        self.questions.len()
    }

    pub fn skipped(&self) -> usize {
        self.sets.iter().map(|s| s.skipped.len()).sum()
    }

    pub fn print_summary(&self) {
        println!(
            "Parsed {} questions, skipped {}, {} set(s) failed.",
            self.parsed(),
            self.skipped(),
            self.failed.len()
        );
        for report in &self.sets {
            if report.skipped.is_empty() {
                continue;
            }
            let ids: Vec<String> = report
                .skipped
                .iter()
                .map(|s| format!("{} ({})", s.number, s.reason))
                .collect();
            println!("  set {}: skipped {}", report.set, ids.join(", "));
        }
        for (set, err) in &self.failed {
            println!("  set {set}: FAILED - {err}");
        }
    }
}

/// Parse one set: answer key first, then the questions document joined
/// against it.
pub fn parse_set(data_dir: &Path, set: QuestionSet) -> Result<SetParse> {
    let answers_doc = pdf::extract_file(&data_dir.join(set.answers_file()))
        .with_context(|| format!("answers document of set {set}"))?;
    let key = parse_answer_key(&answers_doc.text);
    if key.is_empty() {
        warn!("set {set}: no answer-key rows recovered");
    }

    let questions_doc = pdf::extract_file(&data_dir.join(set.questions_file()))
        .with_context(|| format!("questions document of set {set}"))?;

    Ok(parse_questions(&questions_doc.text, &key, set))
}

/// Parse all four sets. Each set's parse is pure given its documents, so
/// the sets run in parallel; a failed set is excluded, the rest still
/// contribute. Aggregate order: set A..D, in-document order within a set.
pub fn parse_all_questions(data_dir: &Path) -> ParseReport {
    let pb = ProgressBar::new(QuestionSet::ALL.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} sets")
            .unwrap()
            .progress_chars("=> "),
    );

    let results: Vec<(QuestionSet, Result<SetParse>)> = QuestionSet::ALL
        .par_iter()
        .map(|&set| {
            let result = parse_set(data_dir, set);
            pb.inc(1);
            (set, result)
        })
        .collect();
    pb.finish_and_clear();

    let mut report = ParseReport::default();
    for (set, result) in results {
        match result {
            Ok(parse) => {
                if parse.questions.is_empty() {
                    warn!("set {set}: zero questions recovered");
                }
                report.sets.push(SetReport {
                    set,
                    parsed: parse.questions.len(),
                    skipped: parse.skipped,
                });
                report.questions.extend(parse.questions);
            }
            Err(e) => {
                error!("set {set}: {e:#}");
                report.failed.push((set, format!("{e:#}")));
            }
        }
    }
    report
}

// ── Tests ──
