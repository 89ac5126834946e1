//! The ban/unblock/reblock cycle state machine.
//!
//! Once the target process is located, the scheduler alternates between
//! `Unblocked` (rule deleted, connect window open) and `Blocked` (rule
//! created) on the configured rhythm, polling process liveness at the end of
//! each blocked interval. The alternation is the product's purpose: it
//! restores connectivity long enough for required traffic, then blocks it to
//! suppress a class of runtime error reports.
//!
//! Backend failures inside the loop are logged and the loop continues; a
//! single missed toggle is recoverable on the next iteration, whereas
//! aborting would leave the target running with an unmanaged network state.
//! Cancellation is cooperative and honored at the scheduled sleeps only.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::CoreError;
use crate::firewall::FirewallBackend;

use super::locator::{locate, ProcessHandle, ProcessTable, TargetProcess};
use super::maintenance;

/// The three operator-tuned durations of a run. Immutable during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Seconds between target launch and the first block.
    pub ban_delay_secs: u64,
    /// Seconds each blocked interval lasts.
    pub intermittent_block_secs: u64,
    /// Seconds each unblocked (connect window) interval lasts.
    pub connect_window_secs: u64,
}

impl CycleConfig {
    /// Re-validate the operator-supplied ranges before a run starts.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ban_delay_secs > config::BAN_DELAY_MAX_SECS {
            return Err(CoreError::Configuration(format!(
                "ban delay {}s exceeds maximum {}s",
                self.ban_delay_secs,
                config::BAN_DELAY_MAX_SECS
            )));
        }
        if self.intermittent_block_secs > config::INTERMITTENT_BLOCK_MAX_SECS {
            return Err(CoreError::Configuration(format!(
                "intermittent block {}s exceeds maximum {}s",
                self.intermittent_block_secs,
                config::INTERMITTENT_BLOCK_MAX_SECS
            )));
        }
        if self.connect_window_secs > config::CONNECT_WINDOW_MAX_SECS {
            return Err(CoreError::Configuration(format!(
                "connect window {}s exceeds maximum {}s",
                self.connect_window_secs,
                config::CONNECT_WINDOW_MAX_SECS
            )));
        }
        Ok(())
    }

    pub fn ban_delay(&self) -> Duration {
        Duration::from_secs(self.ban_delay_secs)
    }

    pub fn intermittent_block(&self) -> Duration {
        Duration::from_secs(self.intermittent_block_secs)
    }

    pub fn connect_window(&self) -> Duration {
        Duration::from_secs(self.connect_window_secs)
    }
}

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    WaitingForLaunch,
    DelayBeforeFirstBlock,
    Unblocked,
    Blocked,
    Terminated(TerminationReason),
}

/// Why a run reached `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// The target never launched within the wait window; no firewall
    /// mutation was performed.
    NotLaunched,
    /// The target exited; the rule was deleted one final time.
    ProcessExited,
    /// The run was cancelled; cleanup ran before termination.
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::NotLaunched => f.write_str("target never launched"),
            TerminationReason::ProcessExited => f.write_str("target process exited"),
            TerminationReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Drives the cycle for one located target until it exits or the run is
/// cancelled. The only mutator of the reserved rule while it runs.
pub struct CycleScheduler {
    target: TargetProcess,
    cycle: CycleConfig,
    backend: Arc<dyn FirewallBackend>,
    table: Box<dyn ProcessTable>,
    cancel: CancellationToken,
    state: RunState,
}

impl CycleScheduler {
    pub fn new(
        target: TargetProcess,
        cycle: CycleConfig,
        backend: Arc<dyn FirewallBackend>,
        table: Box<dyn ProcessTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            cycle,
            backend,
            table,
            cancel,
            state: RunState::WaitingForLaunch,
        }
    }

    /// Run the state machine to termination.
    ///
    /// Never returns an error: locator timeout and cancellation are normal
    /// terminal outcomes, and backend failures are absorbed by the loop.
    pub async fn run(mut self) -> TerminationReason {
        let handle = match self.wait_for_launch().await {
            Some(handle) => handle,
            None => return self.terminal_state(),
        };

        maintenance::purge_error_logs(&self.target);

        if !self.delay_before_first_block().await {
            return self.cleanup_after_cancel().await;
        }

        self.cycle_until_exit_or_cancel(handle).await
    }

    fn terminal_state(&self) -> TerminationReason {
        match self.state {
            RunState::Terminated(reason) => reason,
            // wait_for_launch only returns None after setting a terminal state.
            _ => TerminationReason::Cancelled,
        }
    }

    /// `WaitingForLaunch`: delegate to the locator. Cancellation here needs
    /// no cleanup since no rule has been created yet.
    async fn wait_for_launch(&mut self) -> Option<ProcessHandle> {
        self.state = RunState::WaitingForLaunch;
        let timeout = Duration::from_secs(config::LAUNCH_WAIT_TIMEOUT_SECS);

        let located = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::info!("cancelled while waiting for target launch");
                self.state = RunState::Terminated(TerminationReason::Cancelled);
                return None;
            }
            res = locate(self.table.as_mut(), &self.target, timeout) => res,
        };

        match located {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::info!("abandoning run: {e}");
                self.state = RunState::Terminated(TerminationReason::NotLaunched);
                None
            }
        }
    }

    /// `DelayBeforeFirstBlock`: the network stays open right after launch so
    /// the target can complete its initial handshake. Returns false when
    /// cancellation arrived during the delay.
    async fn delay_before_first_block(&mut self) -> bool {
        self.state = RunState::DelayBeforeFirstBlock;
        tracing::info!(
            "target launched; first block in {}s",
            self.cycle.ban_delay_secs
        );
        self.interruptible_sleep(self.cycle.ban_delay()).await
    }

    async fn cycle_until_exit_or_cancel(&mut self, handle: ProcessHandle) -> TerminationReason {
        loop {
            // Unblocked: delete first (idempotent; clears any stale block),
            // then hold the connect window open.
            self.state = RunState::Unblocked;
            tracing::info!("opening network for {}s", self.cycle.connect_window_secs);
            if let Err(e) = self.backend.delete_rule(config::RULE_NAME).await {
                tracing::warn!("failed to delete firewall rule: {e}");
            }
            if !self.interruptible_sleep(self.cycle.connect_window()).await {
                return self.cleanup_after_cancel().await;
            }

            // Blocked: create the rule, hold it, then check liveness.
            self.state = RunState::Blocked;
            tracing::info!(
                "blocking network for {}s",
                self.cycle.intermittent_block_secs
            );
            if let Err(e) = self
                .backend
                .create_block_rule(config::RULE_NAME, self.target.exe_path())
                .await
            {
                tracing::warn!("failed to create firewall rule: {e}");
            }
            if !self.interruptible_sleep(self.cycle.intermittent_block()).await {
                return self.cleanup_after_cancel().await;
            }

            if !self.table.is_running(&handle) {
                tracing::info!("target process (PID {}) exited; cleaning up", handle.pid);
                if let Err(e) = self.backend.delete_rule(config::RULE_NAME).await {
                    tracing::warn!("cleanup delete failed: {e}");
                }
                self.state = RunState::Terminated(TerminationReason::ProcessExited);
                return TerminationReason::ProcessExited;
            }
        }
    }

    /// Sleep for `dur`, returning false when cancellation arrived first.
    /// The scheduled sleeps are the only points where cancellation is
    /// checked; requests arriving mid-backend-call are applied here.
    async fn interruptible_sleep(&self, dur: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(dur) => true,
        }
    }

    /// Guaranteed cleanup step on the cancellation path: a cancelled run
    /// must never leave the firewall in a blocking state.
    async fn cleanup_after_cancel(&mut self) -> TerminationReason {
        tracing::info!("run cancelled; removing firewall rule");
        if let Err(e) = self.backend.delete_rule(config::RULE_NAME).await {
            tracing::warn!("cleanup delete failed: {e}");
        }
        self.state = RunState::Terminated(TerminationReason::Cancelled);
        TerminationReason::Cancelled
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingBackend};
    use super::*;
    use crate::core::locator::testing::FakeTable;
    use crate::core::locator::ProcessEntry;

    fn target() -> TargetProcess {
        TargetProcess::from_path(r"C:\Games\App\app.exe").unwrap()
    }

    fn running_entry() -> ProcessEntry {
        ProcessEntry {
            pid: 42,
            name: "app.exe".into(),
            exe_path: Some(r"c:\games\app\app.exe".into()),
            start_time: 1_000,
        }
    }

    fn cycle(ban: u64, intermittent: u64, connect: u64) -> CycleConfig {
        CycleConfig {
            ban_delay_secs: ban,
            intermittent_block_secs: intermittent,
            connect_window_secs: connect,
        }
    }

    fn scheduler(
        cfg: CycleConfig,
        backend: std::sync::Arc<RecordingBackend>,
        table: FakeTable,
        cancel: CancellationToken,
    ) -> CycleScheduler {
        CycleScheduler::new(target(), cfg, backend, Box::new(table), cancel)
    }

    #[test]
    fn test_validate_accepts_range_boundaries() {
        assert!(cycle(0, 0, 0).validate().is_ok());
        assert!(cycle(300, 30, 120).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        assert_eq!(cycle(301, 0, 0).validate().unwrap_err().kind(), "Configuration");
        assert_eq!(cycle(0, 31, 0).validate().unwrap_err().kind(), "Configuration");
        assert_eq!(cycle(0, 0, 121).validate().unwrap_err().kind(), "Configuration");
    }

    /// The scheduler runs as a spawned task, so its future must be `Send`
    /// with the production trait objects behind it.
    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let sched = scheduler(
            cycle(0, 1, 1),
            RecordingBackend::new(),
            FakeTable::new(vec![]),
            CancellationToken::new(),
        );
        assert_send(&sched.run());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_launched_run_makes_zero_backend_calls() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![]);
        let sched = scheduler(cycle(5, 2, 3), backend.clone(), table, CancellationToken::new());

        let reason = sched.run().await;
        assert_eq!(reason, TerminationReason::NotLaunched);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_issues_delete_then_create_in_order() {
        let backend = RecordingBackend::new();
        // Alive through one liveness check, exited at the second.
        let table = FakeTable::new(vec![running_entry()]).with_alive_checks(1);
        let sched = scheduler(cycle(5, 2, 3), backend.clone(), table, CancellationToken::new());

        let reason = sched.run().await;
        assert_eq!(reason, TerminationReason::ProcessExited);
        // Two cycles (delete, create) plus the final cleanup delete.
        let path = target().exe_path().to_string();
        assert_eq!(
            backend.calls(),
            vec![
                Call::Delete,
                Call::Create(path.clone()),
                Call::Delete,
                Call::Create(path),
                Call::Delete,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_never_issued_twice_without_intervening_delete() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![running_entry()]).with_alive_checks(4);
        let sched = scheduler(cycle(0, 1, 1), backend.clone(), table, CancellationToken::new());

        sched.run().await;
        let calls = backend.calls();
        for pair in calls.windows(2) {
            assert!(
                !(matches!(pair[0], Call::Create(_)) && matches!(pair[1], Call::Create(_))),
                "double create in {calls:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_exit_during_blocked_sleep_triggers_final_delete() {
        let backend = RecordingBackend::new();
        // Exits before the first liveness check.
        let table = FakeTable::new(vec![running_entry()]).with_alive_checks(0);
        let sched = scheduler(cycle(5, 2, 3), backend.clone(), table, CancellationToken::new());

        let reason = sched.run().await;
        assert_eq!(reason, TerminationReason::ProcessExited);
        let path = target().exe_path().to_string();
        assert_eq!(
            backend.calls(),
            vec![Call::Delete, Call::Create(path), Call::Delete]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_is_absorbed_and_retried_next_cycle() {
        let backend = RecordingBackend::failing_first_creates(1);
        let table = FakeTable::new(vec![running_entry()]).with_alive_checks(1);
        let sched = scheduler(cycle(0, 2, 3), backend.clone(), table, CancellationToken::new());

        let reason = sched.run().await;
        // The loop proceeded through the failed create, re-entered Blocked,
        // and retried the create on the next iteration.
        assert_eq!(reason, TerminationReason::ProcessExited);
        let creates = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count();
        assert_eq!(creates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_is_absorbed_and_run_still_terminates() {
        let backend = RecordingBackend::failing_all_deletes();
        let table = FakeTable::new(vec![running_entry()]).with_alive_checks(1);
        let sched = scheduler(cycle(0, 2, 3), backend.clone(), table, CancellationToken::new());

        let reason = sched.run().await;
        // Every delete failed, yet the loop kept cycling and still attempted
        // the final cleanup delete after the target exited.
        assert_eq!(reason, TerminationReason::ProcessExited);
        assert!(matches!(backend.calls().last(), Some(Call::Delete)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_first_delay_deletes_rule() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![running_entry()]);
        let cancel = CancellationToken::new();
        let sched = scheduler(cycle(10, 2, 3), backend.clone(), table, cancel.clone());

        let task = tokio::spawn(sched.run());
        tokio::time::sleep(Duration::from_secs(4)).await;
        cancel.cancel();
        let reason = task.await.unwrap();

        assert_eq!(reason, TerminationReason::Cancelled);
        assert_eq!(backend.calls(), vec![Call::Delete]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_connect_window_deletes_rule() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![running_entry()]);
        let cancel = CancellationToken::new();
        let sched = scheduler(cycle(0, 2, 30), backend.clone(), table, cancel.clone());

        let task = tokio::spawn(sched.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let reason = task.await.unwrap();

        assert_eq!(reason, TerminationReason::Cancelled);
        // Initial unblock delete, then the cleanup delete.
        assert_eq!(backend.calls(), vec![Call::Delete, Call::Delete]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_blocked_sleep_deletes_rule() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![running_entry()]);
        let cancel = CancellationToken::new();
        let sched = scheduler(cycle(0, 30, 2), backend.clone(), table, cancel.clone());

        let task = tokio::spawn(sched.run());
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        let reason = task.await.unwrap();

        assert_eq!(reason, TerminationReason::Cancelled);
        let calls = backend.calls();
        let path = target().exe_path().to_string();
        assert_eq!(calls, vec![Call::Delete, Call::Create(path), Call::Delete]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_before_launch_makes_no_backend_calls() {
        let backend = RecordingBackend::new();
        let table = FakeTable::new(vec![]);
        let cancel = CancellationToken::new();
        let sched = scheduler(cycle(5, 2, 3), backend.clone(), table, cancel.clone());

        let task = tokio::spawn(sched.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let reason = task.await.unwrap();

        assert_eq!(reason, TerminationReason::Cancelled);
        assert!(backend.calls().is_empty());
    }
}
