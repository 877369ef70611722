//! Prompt builders for every model call the pipeline makes.
//!
//! K_i: Batch prompts label each document with its local 1-based index and
//! ask for that index back; responses are correlated by it, never by order.

use crate::models::{Axis, Contradiction, Document, JudgeConfig, JudgeEvaluation, Specialty};
use std::fmt::Write;

/// Characters of document text shown to the Stage 1 filter.
pub const RELEVANCE_EXCERPT_CHARS: usize = 500;

/// Characters of document text shown to quality judges.
pub const QUALITY_EXCERPT_CHARS: usize = 2000;

const AXIS_RUBRIC: &str = "\
- relevance (0-20): how directly the article addresses the keywords
- technical (0-20): depth and correctness of the technical content
- novelty (0-20): how new the ideas, results or information are
- impact (0-20): likely significance for practitioners or the field
- quality (0-20): clarity, structure and credibility of the writing";

const RELEVANCE_SYSTEM: &str = "\
You are a fast relevance screener for a technical news ranking system. \
For each numbered article decide how relevant it is to the given keywords \
on a 0-10 scale (0 = unrelated, 10 = squarely on topic). \
Respond with JSON only.";

fn keyword_line(keywords: &[String]) -> String {
    if keywords.is_empty() {
        "(none, judge general technical interest)".to_string()
    } else {
        keywords.join(", ")
    }
}

fn write_document(out: &mut String, label: &str, document: &Document, max_chars: usize) {
    let _ = writeln!(out, "[{label}] {}", document.title.trim());
    if let Some(category) = &document.source.category {
        let _ = writeln!(out, "Category: {category}");
    }
    let _ = writeln!(out, "{}", document.excerpt(max_chars));
    out.push('\n');
}

/// System prompt for Stage 1.
pub fn relevance_system() -> &'static str {
    RELEVANCE_SYSTEM
}

/// User prompt for one Stage 1 batch. `batch` pairs each local index with
/// its document.
pub fn relevance_batch_prompt(keywords: &[String], batch: &[(usize, &Document)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keywords: {}\n", keyword_line(keywords));
    let _ = writeln!(out, "Articles:\n");
    for (index, document) in batch {
        write_document(&mut out, &index.to_string(), document, RELEVANCE_EXCERPT_CHARS);
    }
    let _ = write!(
        out,
        "Return exactly one entry per article id:\n\
         {{\"results\": [{{\"id\": 1, \"score\": 0-10, \"reason\": \"short reason\"}}]}}"
    );
    out
}

/// System prompt for the single unified quality model.
pub fn quality_system(language: &str) -> String {
    format!(
        "You are a senior technical editor scoring articles for a ranked digest.\n\
         Score each article on five axes:\n{AXIS_RUBRIC}\n\
         Also give a recommend score (0-20) for how strongly you would put it \
         in front of readers, and a two-sentence summary written in {language}.\n\
         Respond with JSON only."
    )
}

const QUALITY_ITEM_SHAPE: &str = "{\"id\": 1, \"relevance\": 0-20, \"technical\": 0-20, \
\"novelty\": 0-20, \"impact\": 0-20, \"quality\": 0-20, \"total\": 0-100, \
\"recommend\": 0-20, \"reasons\": {\"relevance\": \"...\", \"technical\": \"...\", \
\"novelty\": \"...\", \"impact\": \"...\", \"quality\": \"...\"}, \"summary\": \"...\"}";

/// User prompt for one unified quality batch (or a single-document retry,
/// which is a batch of one).
pub fn quality_batch_prompt(keywords: &[String], batch: &[(usize, &Document)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keywords: {}\n", keyword_line(keywords));
    let _ = writeln!(out, "Articles:\n");
    for (index, document) in batch {
        write_document(&mut out, &index.to_string(), document, QUALITY_EXCERPT_CHARS);
    }
    let _ = write!(
        out,
        "Return exactly one entry per article id:\n{{\"results\": [{QUALITY_ITEM_SHAPE}]}}"
    );
    out
}

fn specialty_focus(specialty: Specialty) -> &'static str {
    match specialty {
        Specialty::General => {
            "Weigh all five axes evenly and read the article the way an \
             informed general reader would."
        }
        Specialty::Technical => {
            "You focus on technical depth: check whether claims are backed by \
             implementation detail, data or benchmarks, and be strict on the \
             technical axis."
        }
        Specialty::Reasoning => {
            "You focus on argument quality: check whether conclusions follow \
             from the evidence, note unsupported leaps, and be strict on the \
             quality and impact axes."
        }
    }
}

/// System prompt for one ensemble judge.
pub fn judge_system(judge: &JudgeConfig, language: &str) -> String {
    format!(
        "You are {}, an independent judge on an article review panel.\n{}\n\
         Score the article on five axes:\n{AXIS_RUBRIC}\n\
         Give a reason for every axis, a recommend score (0-20) and a \
         two-sentence summary written in {language}.\n\
         Respond with JSON only.",
        judge.display_name(),
        specialty_focus(judge.specialty)
    )
}

/// User prompt for one ensemble judge.
pub fn judge_prompt(keywords: &[String], document: &Document) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keywords: {}\n", keyword_line(keywords));
    write_document(&mut out, "article", document, QUALITY_EXCERPT_CHARS);
    let _ = write!(
        out,
        "Respond with a single object:\n{}",
        QUALITY_ITEM_SHAPE.replace("\"id\": 1, ", "")
    );
    out
}

/// System prompt for the arbitration model.
pub fn meta_judge_system(language: &str) -> String {
    format!(
        "You are the chief editor reconciling a panel of judges.\n\
         Resolve their disagreements, weighing each judge's specialty and \
         weight, and issue one final verdict on the same five axes:\n{AXIS_RUBRIC}\n\
         Report a confidence between 0 and 1, a rationale that explains how \
         you resolved any conflicts, a recommend score (0-20) and a \
         consolidated two-sentence summary written in {language}.\n\
         Respond with JSON only."
    )
}

/// User prompt for arbitration over the judges' evaluations.
pub fn meta_judge_prompt(
    keywords: &[String],
    document: &Document,
    evaluations: &[(JudgeEvaluation, f64, Specialty)],
    contradictions: &[Contradiction],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keywords: {}\n", keyword_line(keywords));
    write_document(&mut out, "article", document, QUALITY_EXCERPT_CHARS);

    let _ = writeln!(out, "Judge evaluations:\n");
    for (evaluation, weight, specialty) in evaluations {
        let _ = writeln!(
            out,
            "Judge {} (specialty: {specialty}, weight: {weight:.2})",
            evaluation.judge_name
        );
        for axis in Axis::ALL {
            let reason = evaluation
                .reasons
                .get(&axis)
                .map(String::as_str)
                .unwrap_or("-");
            let _ = writeln!(
                out,
                "  {axis}: {:.1} ({reason})",
                evaluation.scores.get(axis)
            );
        }
        let _ = writeln!(out, "  summary: {}\n", evaluation.summary);
    }

    if contradictions.is_empty() {
        let _ = writeln!(out, "No major contradictions were detected.\n");
    } else {
        let _ = writeln!(out, "Contradictions to resolve:");
        for c in contradictions {
            let _ = writeln!(
                out,
                "  {}: {} gave {:.1}, {} gave {:.1} (delta {:.1})",
                c.axis, c.judge_a, c.score_a, c.judge_b, c.score_b, c.delta
            );
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "Respond with a single object:\n\
         {{\"relevance\": 0-20, \"technical\": 0-20, \"novelty\": 0-20, \"impact\": 0-20, \
         \"quality\": 0-20, \"total\": 0-100, \"confidence\": 0-1, \"rationale\": \"...\", \
         \"recommend\": 0-20, \"summary\": \"...\"}}"
    );
    out
}
