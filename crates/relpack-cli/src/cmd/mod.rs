//! Stage commands.

pub mod package;
pub mod publish;

use relpack_core::StageOutcome;
use tracing::info;

fn report(stage: &str, outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Completed => info!(stage, "done"),
        StageOutcome::Skipped(reason) => info!(stage, "skipped: {reason}"),
    }
}
