use crate::error::{DashError, Result};
use crate::gitlab::Pipeline;

/// Picks the single pipeline the dashboard should focus on.
///
/// Priority: a `running` pipeline beats a `pending` one, which beats any
/// terminal pipeline. Among running and pending candidates the one updated
/// the longest ago wins (it has been in flight longest and most likely
/// needs attention); among terminal pipelines the most recently concluded
/// one wins.
///
/// # Errors
///
/// Returns `NoPipeline` when the input is empty, which the watcher treats
/// as "skip this cycle, keep the previous snapshot".
pub fn select_focused(pipelines: Vec<Pipeline>) -> Result<Pipeline> {
    let mut running = Vec::new();
    let mut pending = Vec::new();
    let mut ended = Vec::new();

    for pipeline in pipelines {
        match pipeline.status.as_str() {
            "running" => running.push(pipeline),
            "pending" => pending.push(pipeline),
            _ => ended.push(pipeline),
        }
    }

    if let Some(pipeline) = earliest_updated(running) {
        return Ok(pipeline);
    }
    if let Some(pipeline) = earliest_updated(pending) {
        return Ok(pipeline);
    }
    latest_updated(ended).ok_or(DashError::NoPipeline)
}

fn earliest_updated(pipelines: Vec<Pipeline>) -> Option<Pipeline> {
    pipelines.into_iter().min_by_key(|p| p.updated_at)
}

fn latest_updated(pipelines: Vec<Pipeline>) -> Option<Pipeline> {
    pipelines.into_iter().max_by_key(|p| p.updated_at)
}
