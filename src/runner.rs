use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::orchestrator::{RoundOutcome, SequenceOrchestrator};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for the surfaces of one round to report their results.
    pub result_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            result_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub rounds: usize,
    pub results: usize,
    pub report: Option<Value>,
}

/// Drive `orchestrator` from the first item to the end without a learner
/// clicking "next": each round is loaded, its results are requested and
/// collected, then the next round starts.
///
/// The round that reaches the last item asks with `Finish`, so the Hub sees
/// the end of the sequence. Fetch errors abort the run; everything else is
/// logged and the run moves on.
pub async fn run_sequence(
    orchestrator: &mut SequenceOrchestrator,
    config: &RunnerConfig,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    loop {
        let assignments = match orchestrator.advance_round().await? {
            RoundOutcome::Finished => break,
            RoundOutcome::Assigned(assignments) => assignments,
        };
        summary.rounds += 1;
        info!(round = summary.rounds, slots = assignments.len(), "round started");

        for (slot, outcome) in orchestrator.wait_for_loads().await {
            if let Err(err) = outcome {
                warn!(slot, error = %err, "surface did not load");
            }
        }

        let expected = if orchestrator.is_last() {
            orchestrator.request_results_for_finish().await
        } else {
            orchestrator.request_results_for_round().await
        };

        // Results of earlier rounds that arrive late are still posted but
        // do not count for this one.
        let mut awaited: HashSet<String> = assignments.into_iter().map(|a| a.node_id).collect();
        let deadline = Instant::now() + config.result_timeout;
        let mut received = 0;
        while received < expected {
            match timeout_at(deadline, orchestrator.next_channel_event()).await {
                Ok(Some((slot, event))) => {
                    let Some(result) = orchestrator.handle_channel_event(slot, event).await else {
                        continue;
                    };
                    match result.sequence_node_id() {
                        Some(node_id) if awaited.remove(node_id) => received += 1,
                        node_id => debug!(slot, ?node_id, "late result from an earlier round"),
                    }
                }
                Ok(None) => {
                    warn!("all channels closed");
                    break;
                }
                Err(_) => {
                    warn!(
                        round = summary.rounds,
                        received,
                        expected,
                        "gave up waiting for results"
                    );
                    break;
                }
            }
        }
        summary.results += received;
    }

    summary.report = orchestrator.fetch_report().await;
    info!(rounds = summary.rounds, results = summary.results, "sequence run complete");
    Ok(summary)
}
