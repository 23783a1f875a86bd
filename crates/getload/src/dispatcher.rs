//! Bounded dispatch of request tasks.
//!
//! A counting semaphore caps the number of active tasks; a `JoinSet` is the
//! barrier the dispatcher waits on before returning.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RunConfig;
use crate::error::{DispatchError, TaskError};
use crate::report::{Reporter, TaskReport};
use crate::task::{RequestTask, TaskContext};

/// Launches a run's request tasks through a fixed-width admission gate.
pub struct Dispatcher {
    ctx: Arc<TaskContext>,
    slots: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher. The worker count is normalized first, so zero
    /// workers means one.
    pub fn new(config: RunConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self::with_cancellation(config, reporter, CancellationToken::new())
    }

    /// Like [`Dispatcher::new`], aborting in-flight work once `cancel` fires.
    pub fn with_cancellation(
        config: RunConfig,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        let config = config.normalized();
        let slots = Arc::new(Semaphore::new(config.workers));
        Self {
            ctx: Arc::new(TaskContext {
                config,
                reporter,
                cancel,
            }),
            slots,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    /// Token that cancels this run.
    pub fn cancellation(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Run every request and wait for all of them to reach a terminal state.
    ///
    /// Every task produces exactly one report. Tasks not yet admitted when
    /// the run is cancelled are reported as cancelled without touching the
    /// network.
    pub async fn run(&self) -> Result<(), DispatchError> {
        let config = &self.ctx.config;
        info!(
            url = %config.url,
            requests = config.requests,
            workers = config.workers,
            rest = ?config.rest,
            "Starting run"
        );
        self.ctx.reporter.run_started(config);

        let mut tasks = JoinSet::new();

        for index in 0..config.requests {
            // Acquire before spawning so at most `workers` tasks exist at once.
            let permit = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => None,
                permit = self.slots.clone().acquire_owned() => Some(permit?),
            };

            let Some(permit) = permit else {
                self.ctx
                    .reporter
                    .task_finished(&TaskReport::new(index, Vec::new(), Err(TaskError::Cancelled)));
                continue;
            };

            debug!(task = index + 1, "Admitted");
            tasks.spawn(RequestTask::new(index, self.ctx.clone()).run(permit));

            // Reap finished tasks so the set does not grow with the run.
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        info!(requests = config.requests, "All requests completed");
        self.ctx.reporter.run_finished();
        Ok(())
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Request task panicked");
    }
}
