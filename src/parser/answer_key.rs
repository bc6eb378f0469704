use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::Level;

// One answer-key table row: question number (plain or letter-prefixed),
// answer letters, learning objective, K-level, points. The table in the
// source PDFs flattens into exactly this token sequence.
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+|A\d+)\s+([a-e](?:\s*,\s*[a-e])*)\s+(FL-\d+\.\d+\.\d+)\s+(K[123])\s+(\d+)")
        .unwrap()
});

/// Answer-key data for one question. Ephemeral: consumed during the
/// question parse of the same set and never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerKeyEntry {
    /// Uppercase letters, comma-joined without whitespace ("B", "A,E").
    pub correct: String,
    pub learning_objective: String,
    pub level: Level,
    pub points: u32,
}

pub type AnswerKey = HashMap<String, AnswerKeyEntry>;

/// Scan an answers document for key rows. Rows that do not match the fixed
/// shape are skipped; an empty map is a valid result the caller warns about.
pub fn parse_answer_key(text: &str) -> AnswerKey {
    let mut key = AnswerKey::new();

    for caps in ROW_RE.captures_iter(text) {
        let number = caps[1].to_string();
        let correct: String = caps[2]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        let Some(level) = Level::from_code(&caps[4]) else {
            continue;
        };
        let Ok(points) = caps[5].parse::<u32>() else {
            continue;
        };

        let entry = AnswerKeyEntry {
            correct,
            learning_objective: caps[3].to_string(),
            level,
            points,
        };

        // Last row wins, but a duplicate may be a data error in the source
        // table rather than a revision, so make it visible.
        if key.insert(number.clone(), entry).is_some() {
            warn!("duplicate answer-key row for question {number}; keeping the later one");
        }
    }

    key
}

// ── Tests ──
