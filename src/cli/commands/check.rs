//! Check Command
//!
//! Dry run of the reconciliation pipeline: report which stored shape a
//! result is in and what the validators find, without regenerating anything.

use serde_json::json;

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::reconcile::{classify, reconcile};
use crate::types::{AttemptId, LensError, Result};

pub async fn run(attempt_id: &str, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let id = AttemptId::new(attempt_id);

    let attempt = ctx
        .store
        .get_attempt(&id)
        .await?
        .ok_or_else(|| LensError::not_found("attempt", attempt_id))?;
    let row = ctx
        .store
        .get_result_by_attempt(&id)
        .await?
        .ok_or_else(|| LensError::not_found("result", attempt_id))?;
    let bank = ctx.store.questions(attempt.stream_id.as_deref()).await?;
    let bank = (!bank.is_empty()).then_some(bank);

    let shape = classify(&serde_json::to_value(&row)?).name();
    let reconciled = reconcile(&row, &attempt.answers, bank.as_ref());
    let needs_regeneration = !reconciled.is_valid();

    if format == "json" {
        let report = json!({
            "attemptId": id,
            "shape": shape,
            "version": row.version,
            "answers": attempt.answers.len(),
            "questionMetadata": bank.is_some(),
            "needsRegeneration": needs_regeneration,
            "completeness": reconciled.report.completeness,
            "warnings": reconciled.report.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let out = Output::new();
    out.header(&format!("Check {}", id));
    out.field("Shape", shape);
    out.field("Source", reconciled.result.source);
    out.field("Version", row.version);
    out.field("Answers", attempt.answers.len());
    out.field(
        "Metadata",
        if bank.is_some() { "available" } else { "missing, scores not re-checked" },
    );
    out.field("Completeness", format!("{}%", reconciled.report.completeness));

    if !reconciled.report.warnings.is_empty() {
        out.section("Findings");
        for warning in &reconciled.report.warnings {
            out.finding(warning);
        }
    }

    println!();
    if needs_regeneration {
        out.warning("Interest scores missing or all zero; 'careerlens show' will regenerate");
    } else {
        out.success("Report is complete enough to show");
    }
    Ok(())
}
