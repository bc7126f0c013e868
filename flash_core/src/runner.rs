//! Dedicated control thread and its one-way channels.
//!
//! The thread owns the `FlashController`. Other threads talk to it only
//! through an unbounded command queue (drained once per tick) and a
//! latest-value snapshot channel (capacity one, overwritten each tick).
//! Ticks are paced to fixed deadlines; a tick that overruns its deadline is
//! counted and the schedule re-anchors instead of bursting to catch up.
//!
//! If every command sender is dropped the task treats it as an abort, zeroes
//! the outputs and exits.
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;

use crate::controller::{Command, FlashController, RunOutcome, Snapshot};
use crate::error::{FlashError, Result};
use crate::types::{ProcessState, SetpointKind};

/// Loop timing statistics gathered by the control task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks whose processing ran past the next deadline.
    pub missed_deadlines: u64,
    pub max_tick_latency: Duration,
    /// Records evicted from the recorder across all experiments.
    pub dropped_records: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub outcome: RunOutcome,
    pub stats: LoopStats,
}

/// Overwriting single-slot publisher; the producer keeps a receiver to evict
/// the stale value.
struct SnapshotPublisher {
    tx: xch::Sender<Snapshot>,
    evict: xch::Receiver<Snapshot>,
}

impl SnapshotPublisher {
    fn publish(&self, snapshot: Snapshot) {
        if let Err(xch::TrySendError::Full(s)) = self.tx.try_send(snapshot) {
            let _ = self.evict.try_recv();
            let _ = self.tx.try_send(s);
        }
    }
}

pub struct ControlTask;

impl ControlTask {
    /// Move `controller` onto its own thread and start ticking.
    pub fn spawn(controller: FlashController) -> Result<ControlHandle> {
        let (cmd_tx, cmd_rx) = xch::unbounded();
        let (snap_tx, snap_rx) = xch::bounded(1);
        let publisher = SnapshotPublisher {
            tx: snap_tx,
            evict: snap_rx.clone(),
        };
        let join_handle = std::thread::Builder::new()
            .name("flash-control".into())
            .spawn(move || control_loop(controller, cmd_rx, publisher))
            .map_err(|e| eyre::eyre!("failed to spawn control thread: {e}"))?;
        Ok(ControlHandle {
            commands: cmd_tx,
            snapshots: snap_rx,
            latest: None,
            join_handle: Some(join_handle),
        })
    }
}

fn control_loop(
    mut controller: FlashController,
    commands: xch::Receiver<Command>,
    publisher: SnapshotPublisher,
) -> TaskReport {
    let clock = controller.clock().clone();
    let period = controller.tick_period();
    let mut stats = LoopStats::default();
    let mut pending = Vec::new();
    let mut dropped_before = 0;
    let mut current = (0, 0);
    let mut next_deadline = clock.now() + period;
    tracing::info!(period_ms = crate::util::millis(period), "control task started");

    loop {
        let started = clock.now();
        let mut stop = false;
        loop {
            match commands.try_recv() {
                Ok(Command::Shutdown) => {
                    stop = true;
                    break;
                }
                Ok(cmd) => pending.push(cmd),
                Err(xch::TryRecvError::Empty) => break,
                Err(xch::TryRecvError::Disconnected) => {
                    tracing::warn!("command queue disconnected; stopping");
                    stop = true;
                    break;
                }
            }
        }

        let state = controller.state();
        if stop && (state == ProcessState::Idle || state.is_terminal()) {
            break;
        }
        if stop {
            pending.push(Command::Abort);
        }

        let snapshot = controller.tick(pending.drain(..));
        stats.ticks += 1;
        // Reset zeroes the controller's count without a new experiment number.
        if snapshot.experiment != current.0 || snapshot.dropped_records < current.1 {
            dropped_before += current.1;
        }
        current = (snapshot.experiment, snapshot.dropped_records);
        publisher.publish(snapshot);

        let latency = clock.since(started);
        stats.max_tick_latency = stats.max_tick_latency.max(latency);
        if stop {
            break;
        }

        let now = clock.now();
        if now > next_deadline {
            stats.missed_deadlines += 1;
            tracing::debug!(
                latency_us = latency.as_micros().min(u128::from(u64::MAX)) as u64,
                "tick overran its deadline"
            );
            next_deadline = now + period;
        } else {
            clock.sleep_until(next_deadline);
            next_deadline += period;
        }
    }

    controller.shutdown();
    stats.dropped_records = dropped_before + current.1;
    let outcome = controller.outcome();
    tracing::info!(
        state = %outcome.state,
        ticks = stats.ticks,
        missed = stats.missed_deadlines,
        "control task stopped"
    );
    TaskReport { outcome, stats }
}

/// Caller side of a running `ControlTask`. Dropping it stops the task.
pub struct ControlHandle {
    commands: xch::Sender<Command>,
    snapshots: xch::Receiver<Snapshot>,
    latest: Option<Snapshot>,
    join_handle: Option<JoinHandle<TaskReport>>,
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("latest_state", &self.latest.as_ref().map(|s| s.state))
            .field("running", &self.join_handle.is_some())
            .finish()
    }
}

impl ControlHandle {
    /// Clone of the command sender, e.g. for a signal handler.
    pub fn commander(&self) -> xch::Sender<Command> {
        self.commands.clone()
    }

    pub fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| eyre::Report::new(FlashError::State("control task has stopped".into())))
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn abort(&self) -> Result<()> {
        self.send(Command::Abort)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn finish(&self) -> Result<()> {
        self.send(Command::Finish)
    }

    pub fn update_setpoint(&self, kind: SetpointKind, target: f64, ramp_rate: f64) -> Result<()> {
        self.send(Command::UpdateSetpoint {
            kind,
            target,
            ramp_rate,
        })
    }

    /// False once the control thread has exited (or been joined).
    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Most recent snapshot published by the task.
    pub fn latest(&mut self) -> Option<&Snapshot> {
        if let Some(s) = self.snapshots.try_iter().last() {
            self.latest = Some(s);
        }
        self.latest.as_ref()
    }

    /// Wait (wall clock) for a snapshot satisfying `pred`.
    pub fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Option<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        if let Some(s) = self.latest()
            && pred(s)
        {
            return Some(s.clone());
        }
        while let Ok(s) = self.snapshots.recv_deadline(deadline) {
            let hit = pred(&s);
            self.latest = Some(s);
            if hit {
                return self.latest.clone();
            }
        }
        None
    }

    /// Stop the task (aborting an active experiment) and collect its report.
    pub fn join(mut self) -> Result<TaskReport> {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self
            .join_handle
            .take()
            .ok_or_else(|| eyre::Report::new(FlashError::State("control task already joined".into())))?;
        handle
            .join()
            .map_err(|_| eyre::Report::new(FlashError::State("control thread panicked".into())))
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                tracing::warn!("control thread panicked during shutdown");
            }
        }
    }
}

/// Drive `controller` on the calling thread: start an experiment and tick,
/// paced by the controller's clock, until it reaches a terminal state or
/// `max_ticks` have run.
pub fn run_to_completion(controller: &mut FlashController, max_ticks: u64) -> RunOutcome {
    let clock = controller.clock().clone();
    let period = controller.tick_period();
    let mut next_deadline = clock.now();
    let mut commands = vec![Command::Start];
    for _ in 0..max_ticks {
        let snapshot = controller.tick(commands.drain(..));
        if snapshot.state.is_terminal() {
            break;
        }
        next_deadline += period;
        clock.sleep_until(next_deadline);
    }
    controller.outcome()
}
