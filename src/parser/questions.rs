use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::answer_key::AnswerKey;
use super::{Level, QuestionSet, SkipReason, SkippedQuestion};

// Question header: "Pytanie nr 17 (1 p.)". The point annotation is part of
// the anchor shape only; the authoritative point value comes from the key.
static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Pytanie nr (\d+|A\d+) \((\d+) p\.\)").unwrap());

// Within one block: stem, then the four lettered options in fixed order,
// terminated by the "Wybierz ..." instruction line or the end of the block.
static OPTIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*(.*?)\na\)\s*(.*?)\nb\)\s*(.*?)\nc\)\s*(.*?)\nd\)\s*(.*?)(?:\nWybierz|\z)")
        .unwrap()
});

/// The four answer options of one question. Keys are fixed A-D.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answers {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

impl Answers {
    pub fn iter(&self) -> impl Iterator<Item = (char, &str)> {
        [
            ('A', self.a.as_str()),
            ('B', self.b.as_str()),
            ('C', self.c.as_str()),
            ('D', self.d.as_str()),
        ]
        .into_iter()
    }
}

/// One fully assembled exam question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    /// `{set}-{number}`, unique across the bank.
    pub id: String,
    pub question: String,
    pub answers: Answers,
    /// Uppercase letters, comma-joined without whitespace. More than one
    /// letter means a multiple-answer question.
    pub correct: String,
    /// Empty at parse time; filled by a later enrichment step.
    pub explanation: String,
    pub chapter: u32,
    pub level: Level,
    pub learning_objective: String,
    pub points: u32,
    pub set: QuestionSet,
}

/// Outcome of parsing one set's questions document.
#[derive(Debug, Default)]
pub struct SetParse {
    pub questions: Vec<ParsedQuestion>,
    pub skipped: Vec<SkippedQuestion>,
}

struct Block<'a> {
    number: &'a str,
    body: &'a str,
}

/// Stage 1: slice the document at question-header anchors. Each block runs
/// from the end of its header to the start of the next (or end of text).
fn segment_blocks(text: &str) -> Vec<Block<'_>> {
    let headers: Vec<_> = HEADER_RE.captures_iter(text).collect();
    let mut blocks = Vec::with_capacity(headers.len());

    for (i, caps) in headers.iter().enumerate() {
        let header = caps.get(0).unwrap();
        let number = caps.get(1).unwrap().as_str();
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        blocks.push(Block {
            number,
            body: &text[header.end()..end],
        });
    }

    blocks
}

/// Stage 2: field extraction within one bounded block. `None` means the
/// block is irrecoverable, not partially salvageable.
fn extract_options(body: &str) -> Option<(String, Answers)> {
    let caps = OPTIONS_RE.captures(body)?;
    let stem = caps[1].trim().to_string();
    let answers = Answers {
        a: caps[2].trim().to_string(),
        b: caps[3].trim().to_string(),
        c: caps[4].trim().to_string(),
        d: caps[5].trim().to_string(),
    };
    if stem.is_empty() || answers.iter().any(|(_, text)| text.is_empty()) {
        return None;
    }
    Some((stem, answers))
}

fn letters_valid(correct: &str) -> bool {
    !correct.is_empty() && correct.split(',').all(|l| matches!(l, "A" | "B" | "C" | "D"))
}

/// FL-X.Y.Z -> X.
fn chapter_of(learning_objective: &str) -> u32 {
    learning_objective
        .strip_prefix("FL-")
        .and_then(|rest| rest.split('.').next())
        .and_then(|c| c.parse().ok())
        .unwrap_or(1)
}

/// Number of question-header anchors in a document (diagnostics).
pub fn count_question_blocks(text: &str) -> usize {
    segment_blocks(text).len()
}

/// Parse a questions document against its set's answer key. Blocks that
/// cannot be extracted or joined are dropped and reported, never fatal.
pub fn parse_questions(text: &str, key: &AnswerKey, set: QuestionSet) -> SetParse {
    let mut parse = SetParse::default();

    for block in segment_blocks(text) {
        let Some((stem, answers)) = extract_options(block.body) else {
            warn!("set {set}: could not parse question {}", block.number);
            parse.skipped.push(SkippedQuestion {
                number: block.number.to_string(),
                reason: SkipReason::Unparsable,
            });
            continue;
        };

        let Some(entry) = key.get(block.number) else {
            warn!("set {set}: no answer-key row for question {}", block.number);
            parse.skipped.push(SkippedQuestion {
                number: block.number.to_string(),
                reason: SkipReason::NoAnswerKey,
            });
            continue;
        };

        // The key table can mark letters beyond the four options a question
        // actually has; such a record would be unanswerable in the bank.
        if !letters_valid(&entry.correct) {
            warn!(
                "set {set}: question {} marks answers outside A-D ({})",
                block.number, entry.correct
            );
            parse.skipped.push(SkippedQuestion {
                number: block.number.to_string(),
                reason: SkipReason::BadAnswerLetters,
            });
            continue;
        }

        parse.questions.push(ParsedQuestion {
            id: format!("{set}-{}", block.number),
            question: stem,
            answers,
            correct: entry.correct.clone(),
            explanation: String::new(),
            chapter: chapter_of(&entry.learning_objective),
            level: entry.level,
            learning_objective: entry.learning_objective.clone(),
            points: entry.points,
            set,
        });
    }

    parse
}

// ── Tests ──
