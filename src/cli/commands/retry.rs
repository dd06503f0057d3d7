//! Retry Command
//!
//! Manual regeneration: clears the exhaustion marker and makes one fresh
//! attempt, whatever the state of the stored analysis.

use crate::cli::CommandContext;
use crate::types::{AttemptId, Result};

pub async fn run(attempt_id: &str, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let orchestrator = ctx.orchestrator();
    let outcome = orchestrator.manual_retry(&AttemptId::new(attempt_id)).await;
    super::show::present(outcome, format)
}
