//! Turns assignments into reports by fetching and running artifacts.

use std::sync::Arc;

use labrun_core::{Assignment, Report, TaskId, TaskRequest, TaskResult};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::runner::TaskRunner;

/// Drives the fetch → run sequence for inbound assignments.
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    runner: TaskRunner,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, runner: TaskRunner) -> Self {
        Self { fetcher, runner }
    }

    /// Execute an assignment.
    ///
    /// Returns `Ok(None)` when there is nothing to report: a request without
    /// a task id, or an empty batch. A fetch failure aborts the whole
    /// assignment and nothing is reported for it.
    pub async fn dispatch(&self, assignment: Assignment) -> Result<Option<Report>, FetchError> {
        match assignment {
            Assignment::Single(request) if !request.is_actionable() => {
                debug!(test = %request.test, "Ignoring request without task id");
                Ok(None)
            }
            Assignment::Single(request) => {
                info!(task_id = %request.task_id, test = %request.test, "Received task");
                let result = self.execute(&request).await?;
                Ok(Some(Report::Single(result)))
            }
            Assignment::Batch(names) if names.is_empty() => {
                debug!("Ignoring empty batch");
                Ok(None)
            }
            Assignment::Batch(names) => {
                info!(count = names.len(), "Received batch");
                let mut results = Vec::with_capacity(names.len());
                for name in names {
                    let artifact = self.fetcher.fetch(&TaskId::default(), &name).await?;
                    results.push(self.runner.run(artifact).await);
                }
                Ok(Some(Report::Batch(results)))
            }
        }
    }

    /// Fetch and run a single request. Steps are strictly sequential.
    pub async fn execute(&self, request: &TaskRequest) -> Result<TaskResult, FetchError> {
        let artifact = self.fetcher.fetch(&request.task_id, &request.test).await?;
        Ok(self.runner.run(artifact).await)
    }
}
