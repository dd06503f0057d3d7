//! Show Command
//!
//! Load one attempt's report through the reconciliation pipeline, regenerating
//! the analysis when it is missing.

use serde_json::Value;

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::reconcile::{LoadOutcome, LoadState};
use crate::types::{AttemptId, BigFiveBlock, CanonicalResult, LensError, Result};

pub async fn run(attempt_id: &str, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let orchestrator = ctx.orchestrator();
    let outcome = orchestrator.load(&AttemptId::new(attempt_id)).await;
    present(outcome, format)
}

/// Print an outcome; exhausted cycles end in an error after printing.
pub(super) fn present(outcome: Result<LoadOutcome>, format: &str) -> Result<()> {
    let out = Output::new();
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e @ (LensError::MissingAnswers { .. } | LensError::RetryInProgress { .. })) => {
            out.error(&e.user_message());
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        render(&out, &outcome);
    }

    if outcome.state() == Some(LoadState::RetryExhausted) {
        if let Some(message) = &outcome.error {
            out.error(message);
        }
        out.info(&format!(
            "Run 'careerlens retry {}' to try again",
            outcome.attempt_id
        ));
    }
    outcome.into_result().map(|_| ())
}

fn render(out: &Output, outcome: &LoadOutcome) {
    let result = &outcome.result;
    let trace: Vec<String> = outcome.trace.iter().map(ToString::to_string).collect();

    out.header(&format!("Career report {}", outcome.attempt_id));
    out.field("State", trace.join(" → "));
    out.field("Source", result.source);
    if let Some(grade) = &result.grade_level {
        out.field("Grade", grade);
    }
    out.field("Completeness", format!("{}%", outcome.completeness));
    if outcome.regenerations > 0 {
        out.field("Regenerations", outcome.regenerations);
    }

    render_scores(out, result);

    if let Some(summary) = result.overall_summary.as_ref().and_then(text) {
        out.section("Summary");
        println!("{}", summary);
    }

    let careers = career_titles(result);
    if !careers.is_empty() {
        out.section("Career Paths");
        for (i, title) in careers.iter().enumerate() {
            println!("  {}. {}", i + 1, title);
        }
    }

    if !outcome.warnings.is_empty() {
        out.section("Findings");
        for warning in &outcome.warnings {
            out.finding(warning);
        }
    }
}

fn render_scores(out: &Output, result: &CanonicalResult) {
    if let Some(riasec) = &result.riasec {
        out.section("Interests (RIASEC)");
        if let Some(code) = &riasec.code {
            out.field("Code", code);
        }
        let scores: Vec<String> = riasec
            .scores
            .iter()
            .map(|(t, v)| format!("{} {}", t.letter(), v))
            .collect();
        out.field("Scores", format!("{} (max {})", scores.join("  "), riasec.max_score_or_default()));
        if riasec.corrected {
            out.field("Recomputed", "from answers");
        }
    }

    if let Some(aptitude) = &result.aptitude {
        out.section("Aptitude");
        if let Some(overall) = aptitude.overall_score {
            out.field("Overall", format!("{:.0}%", overall));
        }
        for (domain, score) in &aptitude.scores {
            out.field(domain, format!("{:.0}%", score.percentage));
        }
        if !aptitude.top_strengths.is_empty() {
            out.field("Top strengths", aptitude.top_strengths.join(", "));
        }
    }

    if let Some(knowledge) = &result.knowledge
        && let Some(score) = knowledge.score
    {
        out.section("Knowledge");
        out.field("Score", format!("{:.0}%", score));
        if let (Some(correct), Some(total)) = (knowledge.correct_count, knowledge.total_questions) {
            out.field("Correct", format!("{} / {}", correct, total));
        }
    }

    if let Some(big_five) = &result.big_five
        && big_five.has_any()
    {
        out.section("Personality (Big Five)");
        for letter in BigFiveBlock::TRAITS {
            if let Some(value) = big_five.get(letter) {
                out.field(&letter.to_string(), value);
            }
        }
    }

    if let Some(employability) = &result.employability {
        out.section("Employability");
        if let Some(level) = &employability.level {
            out.field("Level", level);
        }
        if let Some(score) = employability.score {
            out.field("Score", score);
        }
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map.get("summary").and_then(text),
        _ => None,
    }
}

/// Titles of the recommended career clusters, in order.
fn career_titles(result: &CanonicalResult) -> Vec<String> {
    let Some(fit) = &result.career_fit else {
        return Vec::new();
    };
    fit.get("clusters")
        .and_then(Value::as_array)
        .map(|clusters| {
            clusters
                .iter()
                .filter_map(|c| c.get("title").and_then(Value::as_str).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
