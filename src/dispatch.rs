use std::str::FromStr;

use futures::future::{join_all, try_join_all};
use serde::Serialize;

use crate::{
    error::ServiceError,
    worker::{GenerationResult, GenerationTask, StartGate, WorkerPool},
};

/// What a single task failure does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanoutPolicy {
    /// First failure aborts the batch and becomes the request's error.
    #[default]
    AllOrNothing,
    /// Every task reports its own outcome. A worker start failure is not
    /// retried within the batch, so the remaining tasks all fail with it.
    Isolated,
}

impl FromStr for FanoutPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "all-or-nothing" | "all_or_nothing" | "strict" => Ok(FanoutPolicy::AllOrNothing),
            "isolated" | "partial" => Ok(FanoutPolicy::Isolated),
            other => Err(format!("unknown fan-out policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    Completed(GenerationResult),
    Failed { error: String },
}

/// Submits every task to `pool` at once and collects one outcome per task,
/// in input order.
pub async fn dispatch(
    pool: &WorkerPool,
    tasks: Vec<GenerationTask>,
    policy: FanoutPolicy,
) -> Result<Vec<TaskOutcome>, ServiceError> {
    tracing::info!(
        pool = ?pool.id(),
        generator = pool.generator(),
        tasks = tasks.len(),
        ?policy,
        "dispatching generation batch"
    );
    let gate = StartGate::default();
    let calls = tasks.iter().map(|task| pool.run_in_batch(task, &gate));

    match policy {
        FanoutPolicy::AllOrNothing => {
            let results = try_join_all(calls).await?;
            Ok(results.into_iter().map(TaskOutcome::Completed).collect())
        }
        FanoutPolicy::Isolated => Ok(join_all(calls)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(result) => TaskOutcome::Completed(result),
                Err(err) => {
                    tracing::warn!(error = %err, "generation task failed");
                    TaskOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            })
            .collect()),
    }
}
