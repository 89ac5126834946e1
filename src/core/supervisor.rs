//! Run supervision: spawning, cancellation, and the cleanup guarantee.
//!
//! The supervisor is the composition root. It validates the run request,
//! verifies elevation before a single locator poll happens, spawns the
//! scheduler as one cancellable tokio task, and owns the cancellation token.
//! Cancelling a run always ends with a final `delete_rule` attempt so a
//! cancelled run never leaves the firewall in a blocking state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::CoreError;
use crate::firewall::{self, BackendChoice, FirewallBackend};

use super::locator::{ProcessTable, SysinfoTable, TargetProcess};
use super::scheduler::{CycleConfig, CycleScheduler, TerminationReason};

/// Everything a run needs, assembled once by the caller and passed down by
/// parameter; nothing is re-read from the store mid-run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target: TargetProcess,
    pub cycle: CycleConfig,
    pub backend_choice: BackendChoice,
}

/// Starts and supervises runs. At most one run is active at a time in this
/// design; the caller owns the single [`RunHandle`].
pub struct Supervisor {
    privilege_probe: fn() -> bool,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            privilege_probe: firewall::privilege::is_elevated,
        }
    }

    #[cfg(test)]
    fn with_probe(probe: fn() -> bool) -> Self {
        Self {
            privilege_probe: probe,
        }
    }

    /// Start a run with the production backend and process table.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, CoreError> {
        let backend: Arc<dyn FirewallBackend> = firewall::backend_for(request.backend_choice).into();
        self.start_with(request, backend, Box::new(SysinfoTable::new()))
    }

    /// Start a run with explicit collaborators. Validation and the privilege
    /// check happen here, synchronously, before anything is spawned: config
    /// and privilege errors propagate to the caller with no partial state.
    pub fn start_with(
        &self,
        request: RunRequest,
        backend: Arc<dyn FirewallBackend>,
        table: Box<dyn ProcessTable>,
    ) -> Result<RunHandle, CoreError> {
        request.cycle.validate()?;
        if !(self.privilege_probe)() {
            return Err(CoreError::Privilege(
                "run this program as administrator".into(),
            ));
        }

        let cancel = CancellationToken::new();
        let scheduler = CycleScheduler::new(
            request.target,
            request.cycle,
            Arc::clone(&backend),
            table,
            cancel.clone(),
        );
        tracing::info!(
            "starting run (backend: {}, ban {}s / block {}s / connect {}s)",
            request.backend_choice,
            request.cycle.ban_delay_secs,
            request.cycle.intermittent_block_secs,
            request.cycle.connect_window_secs
        );
        let task = tokio::spawn(scheduler.run());

        Ok(RunHandle {
            cancel,
            task,
            backend,
        })
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one supervised run.
pub struct RunHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<TerminationReason>,
    backend: Arc<dyn FirewallBackend>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle").finish_non_exhaustive()
    }
}

impl RunHandle {
    /// Await natural termination (target exited or never launched).
    ///
    /// A panicked scheduler task is resurfaced here rather than mapped to a
    /// termination reason: a crash is not a cancel.
    pub async fn wait(&mut self) -> TerminationReason {
        match (&mut self.task).await {
            Ok(reason) => reason,
            Err(e) if e.is_cancelled() => TerminationReason::Cancelled,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }

    /// Cancel the run: signal the scheduler, block until it acknowledges
    /// termination, then unconditionally attempt one final rule delete.
    ///
    /// The scheduler already deletes the rule on its own cancellation path;
    /// this extra delete is idempotent and covers the task failing before it
    /// got there. A cleanup failure is reported but never blocks shutdown.
    pub async fn cancel(mut self) -> TerminationReason {
        self.cancel.cancel();
        let joined = (&mut self.task).await;
        if let Err(e) = self.backend.delete_rule(config::RULE_NAME).await {
            tracing::warn!("final cleanup delete failed: {e}");
        }
        match joined {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!("scheduler task failed during cancel: {e}");
                TerminationReason::Cancelled
            }
        }
    }
}
