use std::path::Path;

use anyhow::Result;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension};

use crate::parser::questions::{Answers, ParsedQuestion};
use crate::parser::{Level, QuestionSet};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS questions (
            id                 TEXT PRIMARY KEY,
            question           TEXT NOT NULL,
            answer_a           TEXT NOT NULL,
            answer_b           TEXT NOT NULL,
            answer_c           TEXT NOT NULL,
            answer_d           TEXT NOT NULL,
            correct            TEXT NOT NULL,
            explanation        TEXT,
            chapter            INTEGER NOT NULL,
            level              TEXT NOT NULL CHECK(level IN ('K1','K2','K3')),
            learning_objective TEXT NOT NULL,
            points             INTEGER NOT NULL,
            set_name           TEXT NOT NULL,
            created_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_questions_chapter ON questions(chapter);
        CREATE INDEX IF NOT EXISTS idx_questions_level ON questions(level);
        CREATE INDEX IF NOT EXISTS idx_questions_set ON questions(set_name);

        CREATE TABLE IF NOT EXISTS user_progress (
            id              INTEGER PRIMARY KEY,
            user_id         TEXT NOT NULL DEFAULT 'default',
            question_id     TEXT NOT NULL REFERENCES questions(id),
            attempts        INTEGER NOT NULL DEFAULT 0,
            correct_count   INTEGER NOT NULL DEFAULT 0,
            incorrect_count INTEGER NOT NULL DEFAULT 0,
            last_answer     TEXT,
            last_attempt_at TEXT NOT NULL DEFAULT (datetime('now')),
            strikes         INTEGER NOT NULL DEFAULT 0,
            mastered        BOOLEAN NOT NULL DEFAULT 0,
            UNIQUE(user_id, question_id)
        );
        CREATE INDEX IF NOT EXISTS idx_progress_user ON user_progress(user_id, question_id);
        ",
    )?;
    Ok(())
}

// ── Enum storage ──

impl ToSql for Level {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Level {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Level::from_code(s).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for QuestionSet {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let s = match self {
            QuestionSet::A => "A",
            QuestionSet::B => "B",
            QuestionSet::C => "C",
            QuestionSet::D => "D",
        };
        Ok(s.into())
    }
}

impl FromSql for QuestionSet {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        QuestionSet::from_letter(s).ok_or(FromSqlError::InvalidType)
    }
}

// ── Questions ──

const QUESTION_COLS: &str = "id, question, answer_a, answer_b, answer_c, answer_d, correct, \
                             explanation, chapter, level, learning_objective, points, set_name";

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO questions \
                          (id, question, answer_a, answer_b, answer_c, answer_d, correct, \
                           explanation, chapter, level, learning_objective, points, set_name) \
                          VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)";

pub fn upsert_question(conn: &Connection, q: &ParsedQuestion) -> Result<()> {
    conn.execute(
        UPSERT_SQL,
        rusqlite::params![
            q.id, q.question, q.answers.a, q.answers.b, q.answers.c, q.answers.d,
            q.correct, q.explanation, q.chapter, q.level, q.learning_objective,
            q.points, q.set,
        ],
    )?;
    Ok(())
}

/// All-or-nothing bulk write; re-importing the same documents leaves the
/// bank unchanged (upsert by id).
pub fn bulk_insert_questions(conn: &Connection, questions: &[ParsedQuestion]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(UPSERT_SQL)?;
        for q in questions {
            stmt.execute(rusqlite::params![
                q.id, q.question, q.answers.a, q.answers.b, q.answers.c, q.answers.d,
                q.correct, q.explanation, q.chapter, q.level, q.learning_objective,
                q.points, q.set,
            ])?;
        }
    }
    tx.commit()?;
    Ok(questions.len())
}

fn row_to_question(row: &rusqlite::Row) -> rusqlite::Result<ParsedQuestion> {
    Ok(ParsedQuestion {
        id: row.get(0)?,
        question: row.get(1)?,
        answers: Answers {
            a: row.get(2)?,
            b: row.get(3)?,
            c: row.get(4)?,
            d: row.get(5)?,
        },
        correct: row.get(6)?,
        explanation: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        chapter: row.get(8)?,
        level: row.get(9)?,
        learning_objective: row.get(10)?,
        points: row.get(11)?,
        set: row.get(12)?,
    })
}

fn filter_clause(
    chapter: Option<u32>,
    level: Option<Level>,
) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(c) = chapter {
        conditions.push(format!("chapter = ?{}", params.len() + 1));
        params.push(Box::new(c));
    }
    if let Some(l) = level {
        conditions.push(format!("level = ?{}", params.len() + 1));
        params.push(Box::new(l.as_str().to_string()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

pub fn fetch_question(conn: &Connection, id: &str) -> Result<Option<ParsedQuestion>> {
    let sql = format!("SELECT {QUESTION_COLS} FROM questions WHERE id = ?1");
    let q = conn
        .query_row(&sql, rusqlite::params![id], row_to_question)
        .optional()?;
    Ok(q)
}

pub fn fetch_all_questions(conn: &Connection) -> Result<Vec<ParsedQuestion>> {
    let sql = format!("SELECT {QUESTION_COLS} FROM questions ORDER BY set_name, created_at, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_question)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn random_question(
    conn: &Connection,
    chapter: Option<u32>,
    level: Option<Level>,
) -> Result<Option<ParsedQuestion>> {
    let (clause, params) = filter_clause(chapter, level);
    let sql = format!("SELECT {QUESTION_COLS} FROM questions{clause} ORDER BY RANDOM() LIMIT 1");
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let q = conn
        .query_row(&sql, param_refs.as_slice(), row_to_question)
        .optional()?;
    Ok(q)
}

pub fn question_count(
    conn: &Connection,
    chapter: Option<u32>,
    level: Option<Level>,
) -> Result<usize> {
    let (clause, params) = filter_clause(chapter, level);
    let sql = format!("SELECT COUNT(*) FROM questions{clause}");
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let count = conn.query_row(&sql, param_refs.as_slice(), |r| r.get(0))?;
    Ok(count)
}

// ── Statistics ──

pub struct BankStats {
    pub total: usize,
    pub by_chapter: Vec<(u32, usize)>,
    pub by_level: Vec<(String, usize)>,
    pub by_set: Vec<(String, usize)>,
}

pub fn bank_stats(conn: &Connection) -> Result<BankStats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM questions", [], |r| r.get(0))?;

    let mut by_chapter = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT chapter, COUNT(*) FROM questions GROUP BY chapter ORDER BY chapter",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    for row in rows {
        by_chapter.push(row?);
    }

    let mut by_level = Vec::new();
    let mut stmt =
        conn.prepare("SELECT level, COUNT(*) FROM questions GROUP BY level ORDER BY level")?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    for row in rows {
        by_level.push(row?);
    }

    let mut by_set = Vec::new();
    let mut stmt = conn
        .prepare("SELECT set_name, COUNT(*) FROM questions GROUP BY set_name ORDER BY set_name")?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    for row in rows {
        by_set.push(row?);
    }

    Ok(BankStats {
        total,
        by_chapter,
        by_level,
        by_set,
    })
}

// ── User progress ──

pub struct AttemptOutcome {
    pub strikes: u32,
    pub mastered: bool,
}

/// Record one answer attempt. A correct answer resets strikes and latches
/// the mastered flag; an incorrect one adds a strike.
pub fn record_attempt(
    conn: &Connection,
    question_id: &str,
    user_id: &str,
    answer: &str,
    is_correct: bool,
) -> Result<AttemptOutcome> {
    let existing: Option<(u32, bool)> = conn
        .query_row(
            "SELECT strikes, mastered FROM user_progress WHERE user_id = ?1 AND question_id = ?2",
            rusqlite::params![user_id, question_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        None => {
            let strikes = if is_correct { 0 } else { 1 };
            conn.execute(
                "INSERT INTO user_progress
                 (user_id, question_id, attempts, correct_count, incorrect_count,
                  last_answer, strikes, mastered)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user_id,
                    question_id,
                    is_correct as u32,
                    !is_correct as u32,
                    answer,
                    strikes,
                    is_correct,
                ],
            )?;
            Ok(AttemptOutcome {
                strikes,
                mastered: is_correct,
            })
        }
        Some((prev_strikes, prev_mastered)) => {
            let strikes = if is_correct { 0 } else { prev_strikes + 1 };
            let mastered = is_correct || prev_mastered;
            conn.execute(
                "UPDATE user_progress
                 SET attempts = attempts + 1,
                     correct_count = correct_count + ?1,
                     incorrect_count = incorrect_count + ?2,
                     last_answer = ?3,
                     last_attempt_at = datetime('now'),
                     strikes = ?4,
                     mastered = ?5
                 WHERE user_id = ?6 AND question_id = ?7",
                rusqlite::params![
                    is_correct as u32,
                    !is_correct as u32,
                    answer,
                    strikes,
                    mastered,
                    user_id,
                    question_id,
                ],
            )?;
            Ok(AttemptOutcome { strikes, mastered })
        }
    }
}

pub struct UserStats {
    pub attempted: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub mastered: usize,
    /// (chapter, attempted, mastered)
    pub by_chapter: Vec<(u32, usize, usize)>,
}

pub fn user_stats(conn: &Connection, user_id: &str) -> Result<UserStats> {
    let (attempted, correct, incorrect, mastered) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(correct_count), 0),
                COALESCE(SUM(incorrect_count), 0),
                COALESCE(SUM(mastered), 0)
         FROM user_progress
         WHERE user_id = ?1",
        rusqlite::params![user_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;

    let mut by_chapter = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT q.chapter,
                COUNT(DISTINCT up.question_id),
                COALESCE(SUM(up.mastered), 0)
         FROM user_progress up
         JOIN questions q ON up.question_id = q.id
         WHERE up.user_id = ?1
         GROUP BY q.chapter
         ORDER BY q.chapter",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
    })?;
    for row in rows {
        by_chapter.push(row?);
    }

    Ok(UserStats {
        attempted,
        correct,
        incorrect,
        mastered,
        by_chapter,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn sample(id: &str, set: QuestionSet, chapter: u32, level: Level) -> ParsedQuestion {
        ParsedQuestion {
            id: id.to_string(),
            question: "Tresc pytania?".to_string(),
            answers: Answers {
                a: "Pierwsza".to_string(),
                b: "Druga".to_string(),
                c: "Trzecia".to_string(),
                d: "Czwarta".to_string(),
            },
            correct: "B".to_string(),
            explanation: String::new(),
            chapter,
            level,
            learning_objective: format!("FL-{chapter}.1.1"),
            points: 1,
            set,
        }
    }

    #[test]
    fn upsert_round_trip() {
        let conn = test_conn();
        let q = sample("A-1", QuestionSet::A, 1, Level::K1);
        upsert_question(&conn, &q).unwrap();

        let fetched = fetch_question(&conn, "A-1").unwrap().unwrap();
        assert_eq!(fetched, q);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let conn = test_conn();
        let mut q = sample("A-1", QuestionSet::A, 1, Level::K1);
        upsert_question(&conn, &q).unwrap();

        q.correct = "C".to_string();
        upsert_question(&conn, &q).unwrap();

        assert_eq!(question_count(&conn, None, None).unwrap(), 1);
        assert_eq!(fetch_question(&conn, "A-1").unwrap().unwrap().correct, "C");
    }

    #[test]
    fn bulk_insert_idempotent() {
        let conn = test_conn();
        let questions = vec![
            sample("A-1", QuestionSet::A, 1, Level::K1),
            sample("A-2", QuestionSet::A, 2, Level::K2),
            sample("B-1", QuestionSet::B, 2, Level::K3),
        ];
        bulk_insert_questions(&conn, &questions).unwrap();
        bulk_insert_questions(&conn, &questions).unwrap();
        assert_eq!(question_count(&conn, None, None).unwrap(), 3);
    }

    #[test]
    fn filters() {
        let conn = test_conn();
        let questions = vec![
            sample("A-1", QuestionSet::A, 1, Level::K1),
            sample("A-2", QuestionSet::A, 2, Level::K2),
            sample("A-3", QuestionSet::A, 2, Level::K2),
        ];
        bulk_insert_questions(&conn, &questions).unwrap();

        assert_eq!(question_count(&conn, Some(2), None).unwrap(), 2);
        assert_eq!(question_count(&conn, Some(2), Some(Level::K2)).unwrap(), 2);
        assert_eq!(question_count(&conn, Some(1), Some(Level::K2)).unwrap(), 0);

        let random = random_question(&conn, Some(2), Some(Level::K2)).unwrap().unwrap();
        assert_eq!(random.chapter, 2);
        assert_eq!(random.level, Level::K2);

        assert!(random_question(&conn, Some(6), None).unwrap().is_none());
    }

    #[test]
    fn fetch_all_in_set_order() {
        let conn = test_conn();
        let questions = vec![
            sample("B-1", QuestionSet::B, 1, Level::K1),
            sample("A-1", QuestionSet::A, 1, Level::K1),
        ];
        bulk_insert_questions(&conn, &questions).unwrap();

        let all = fetch_all_questions(&conn).unwrap();
        let ids: Vec<&str> = all.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, ["A-1", "B-1"]);
    }

    #[test]
    fn strike_progression() {
        let conn = test_conn();
        upsert_question(&conn, &sample("A-1", QuestionSet::A, 1, Level::K1)).unwrap();

        let first = record_attempt(&conn, "A-1", "default", "C", false).unwrap();
        assert_eq!(first.strikes, 1);
        assert!(!first.mastered);

        let second = record_attempt(&conn, "A-1", "default", "D", false).unwrap();
        assert_eq!(second.strikes, 2);

        let third = record_attempt(&conn, "A-1", "default", "B", true).unwrap();
        assert_eq!(third.strikes, 0);
        assert!(third.mastered);

        // mastered latches even after a later miss
        let fourth = record_attempt(&conn, "A-1", "default", "A", false).unwrap();
        assert_eq!(fourth.strikes, 1);
        assert!(fourth.mastered);
    }

    #[test]
    fn stats_grouping() {
        let conn = test_conn();
        let questions = vec![
            sample("A-1", QuestionSet::A, 1, Level::K1),
            sample("A-2", QuestionSet::A, 1, Level::K2),
            sample("B-1", QuestionSet::B, 3, Level::K2),
        ];
        bulk_insert_questions(&conn, &questions).unwrap();

        let stats = bank_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_chapter, vec![(1, 2), (3, 1)]);
        assert_eq!(
            stats.by_level,
            vec![("K1".to_string(), 1), ("K2".to_string(), 2)]
        );
        assert_eq!(
            stats.by_set,
            vec![("A".to_string(), 2), ("B".to_string(), 1)]
        );
    }

    #[test]
    fn user_statistics() {
        let conn = test_conn();
        upsert_question(&conn, &sample("A-1", QuestionSet::A, 1, Level::K1)).unwrap();
        upsert_question(&conn, &sample("A-2", QuestionSet::A, 2, Level::K2)).unwrap();

        record_attempt(&conn, "A-1", "u1", "B", true).unwrap();
        record_attempt(&conn, "A-2", "u1", "C", false).unwrap();
        record_attempt(&conn, "A-2", "u1", "B", true).unwrap();

        let stats = user_stats(&conn, "u1").unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.correct, 2);
        assert_eq!(stats.incorrect, 1);
        assert_eq!(stats.mastered, 2);
        assert_eq!(stats.by_chapter, vec![(1, 1, 1), (2, 1, 1)]);

        let empty = user_stats(&conn, "nobody").unwrap();
        assert_eq!(empty.attempted, 0);
        assert_eq!(empty.mastered, 0);
    }
}
