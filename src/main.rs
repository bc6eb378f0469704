mod db;
mod parser;
mod pdf;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use parser::questions::ParsedQuestion;
use parser::syllabus::SyllabusParser;
use parser::{Level, ParseReport, QuestionSet, SetReport};

const SYLLABUS_PDF: &str = "data/syllabus/ISTQB_CertyfikowanyTester_PoziomPodstawowy_v4.0.1.pdf";

#[derive(Parser)]
#[command(name = "ctfl_bank", about = "ISTQB CTFL 4.0 question bank builder")]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, default_value = "data/questions.db")]
    db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Parse the question sets and load them into the bank
    Import {
        /// Directory holding the question/answer PDFs
        #[arg(long, default_value = "data/questions")]
        data_dir: PathBuf,
        /// Import a single set instead of all four
        #[arg(short, long)]
        set: Option<QuestionSet>,
    },
    /// Parse the syllabus and show what was found
    Syllabus {
        #[arg(long, default_value = SYLLABUS_PDF)]
        file: PathBuf,
        /// Show one objective's section and enriched explanation
        #[arg(short, long)]
        objective: Option<String>,
        /// List the sections of one chapter
        #[arg(short, long)]
        chapter: Option<u32>,
    },
    /// Extraction diagnostics for a single PDF
    Analyze {
        file: PathBuf,
        /// Print every page's text instead of a flat-stream sample
        #[arg(short, long)]
        pages: bool,
    },
    /// Question bank statistics
    Stats {
        /// Also show progress for this user
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Print a random question with its enriched explanation
    Sample {
        #[arg(short, long)]
        chapter: Option<u32>,
        #[arg(short, long)]
        level: Option<Level>,
        #[arg(long, default_value = SYLLABUS_PDF)]
        syllabus: PathBuf,
    },
    /// Record an answer attempt for a question
    Answer {
        /// Question id, e.g. A-7
        question_id: String,
        /// Answer letters, e.g. "B" or "A,C"
        answer: String,
        #[arg(short, long, default_value = "default")]
        user: String,
        #[arg(long, default_value = SYLLABUS_PDF)]
        syllabus: PathBuf,
    },
    /// Export the bank as JSON
    Export {
        /// Output file ("-" for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", cli.db.display());
            Ok(())
        }
        Commands::Import { data_dir, set } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let report = match set {
                Some(set) => {
                    println!("Parsing set {set}...");
                    single_set_report(&data_dir, set)
                }
                None => {
                    println!("Parsing sets A-D from {}...", data_dir.display());
                    parser::parse_all_questions(&data_dir)
                }
            };

            if report.questions.is_empty() {
                report.print_summary();
                println!("Nothing to insert.");
                return Ok(());
            }

            let inserted = db::bulk_insert_questions(&conn, &report.questions)?;
            report.print_summary();
            println!("Inserted {} questions into {}", inserted, cli.db.display());
            Ok(())
        }
        Commands::Syllabus {
            file,
            objective,
            chapter,
        } => {
            let syllabus = SyllabusParser::from_file(&file);
            let sections = syllabus.parse()?;
            println!("Parsed {} learning objectives from {}", sections.len(), file.display());

            if let Some(code) = objective {
                match syllabus.section(&code)? {
                    Some(section) => {
                        println!(
                            "\n{} ({}) {}\n",
                            section.learning_objective, section.level, section.description
                        );
                        println!("{}\n", section.content);
                        println!("{}", syllabus.enhanced_explanation(&code, ""));
                    }
                    None => println!("No section for {code}"),
                }
            }

            if let Some(chapter) = chapter {
                for section in syllabus.sections_by_chapter(chapter)? {
                    println!(
                        "  {} ({}) {}",
                        section.learning_objective, section.level, section.description
                    );
                }
            }
            Ok(())
        }
        Commands::Analyze { file, pages } => analyze(&file, pages),
        Commands::Stats { user } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let stats = db::bank_stats(&conn)?;
            println!("Total questions: {}", stats.total);
            println!("By chapter:");
            for (chapter, count) in &stats.by_chapter {
                println!("  {chapter}: {count}");
            }
            println!("By level:");
            for (level, count) in &stats.by_level {
                println!("  {level}: {count}");
            }
            println!("By set:");
            for (set, count) in &stats.by_set {
                println!("  {set}: {count}");
            }

            if let Some(user) = user {
                let progress = db::user_stats(&conn, &user)?;
                println!("\nProgress for {user}:");
                println!("  Attempted: {}", progress.attempted);
                println!("  Correct:   {}", progress.correct);
                println!("  Incorrect: {}", progress.incorrect);
                println!("  Mastered:  {}", progress.mastered);
                for (chapter, attempted, mastered) in &progress.by_chapter {
                    println!("  chapter {chapter}: {attempted} attempted, {mastered} mastered");
                }
            }
            Ok(())
        }
        Commands::Sample {
            chapter,
            level,
            syllabus,
        } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            match db::random_question(&conn, chapter, level)? {
                None => println!("No questions match the filters."),
                Some(q) => {
                    print_question(&q);
                    println!("\nPoprawna odpowiedź: {}", q.correct);
                    let syllabus = SyllabusParser::from_file(&syllabus);
                    println!(
                        "\n{}",
                        syllabus.enhanced_explanation(&q.learning_objective, &q.explanation)
                    );
                }
            }
            Ok(())
        }
        Commands::Answer {
            question_id,
            answer,
            user,
            syllabus,
        } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let q = db::fetch_question(&conn, &question_id)?
                .ok_or_else(|| anyhow!("no question with id {question_id}"))?;

            let given = normalize_letters(&answer);
            let is_correct = given == normalize_letters(&q.correct);
            let outcome = db::record_attempt(&conn, &question_id, &user, &given, is_correct)?;

            if is_correct {
                println!("Correct. Mastered: {}", outcome.mastered);
            } else {
                println!(
                    "Incorrect (correct: {}). Strikes: {}",
                    q.correct, outcome.strikes
                );
            }

            let syllabus = SyllabusParser::from_file(&syllabus);
            println!(
                "\n{}",
                syllabus.enhanced_explanation(&q.learning_objective, &q.explanation)
            );
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let questions = db::fetch_all_questions(&conn)?;
            let envelope = ExportEnvelope {
                exported_at: chrono::Utc::now().to_rfc3339(),
                total: questions.len(),
                questions: &questions,
            };
            let json = serde_json::to_string_pretty(&envelope)?;

            if output == "-" {
                println!("{json}");
            } else {
                std::fs::write(&output, json)?;
                println!("Exported {} questions to {}", questions.len(), output);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

#[derive(Serialize)]
struct ExportEnvelope<'a> {
    exported_at: String,
    total: usize,
    questions: &'a [ParsedQuestion],
}

fn single_set_report(data_dir: &std::path::Path, set: QuestionSet) -> ParseReport {
    let mut report = ParseReport::default();
    match parser::parse_set(data_dir, set) {
        Ok(parse) => {
            report.sets.push(SetReport {
                set,
                parsed: parse.questions.len(),
                skipped: parse.skipped,
            });
            report.questions = parse.questions;
        }
        Err(e) => report.failed.push((set, format!("{e:#}"))),
    }
    report
}

fn analyze(file: &std::path::Path, pages: bool) -> Result<()> {
    let doc = pdf::extract_file(file)?;
    println!("File:             {}", file.display());
    println!("Pages:            {}", doc.page_count);
    println!("Text length:      {} chars", doc.text.chars().count());
    println!(
        "Question headers: {}",
        parser::questions::count_question_blocks(&doc.text)
    );
    println!(
        "Answer-key rows:  {}",
        parser::answer_key::parse_answer_key(&doc.text).len()
    );
    println!(
        "Syllabus markers: {}",
        parser::syllabus::parse_syllabus_text(&doc.text).len()
    );

    if pages {
        for (i, page) in doc.pages.iter().enumerate() {
            println!("\n=== Page {} ===", i + 1);
            println!("{page}");
        }
    } else {
        let sample: String = doc.text.chars().take(600).collect();
        println!("\n--- Sample ---\n{sample}");
    }
    Ok(())
}

fn print_question(q: &ParsedQuestion) {
    println!(
        "[{}] {} | rozdział {} | {} | {} pkt",
        q.id, q.learning_objective, q.chapter, q.level, q.points
    );
    println!("\n{}\n", q.question);
    for (letter, text) in q.answers.iter() {
        println!("  {}) {}", letter.to_ascii_lowercase(), text);
    }
}

/// Uppercase, sorted, deduplicated letters ("b , a" -> "A,B").
fn normalize_letters(s: &str) -> String {
    let mut letters: Vec<String> = s
        .split(',')
        .map(|l| l.trim().to_uppercase())
        .filter(|l| !l.is_empty())
        .collect();
    letters.sort();
    letters.dedup();
    letters.join(",")
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
