/// Top-level respawn loop: start the signal coordinator, supervise one child
/// at a time, and respawn until the intent says otherwise.
use crate::config::{RespawnConfig, SupervisorConfig};
use crate::control::{control_channels, Controls, Inbox};
use crate::intent::{Intent, IntentCell};
use crate::signals::{Coordinator, SignalNumber};
use crate::supervisor::{ChildCommand, SuperviseError, Supervisor};
use nix::sys::signal::Signal;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of a supervisor session that ended cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of children spawned.
    pub runs: u32,
    pub final_intent: Intent,
    /// Signals delivered to process groups across all runs.
    pub signals_sent: u32,
    /// Signals delivered to the last child, in order.
    pub last_delivered: Vec<Signal>,
}

/// Errors that abort the whole supervisor.
#[derive(Debug)]
pub enum RunError {
    /// Could not install OS signal handlers.
    SignalFeed(std::io::Error),
    Supervise(SuperviseError),
    /// The intent held a value the respawn loop has no rule for.
    InvalidIntent(Intent),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::SignalFeed(e) => write!(f, "failed to install signal handlers: {}", e),
            RunError::Supervise(e) => write!(f, "{}", e),
            RunError::InvalidIntent(intent) => {
                write!(f, "unknown supervisory intent after run: {}", intent)
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::SignalFeed(e) => Some(e),
            RunError::Supervise(e) => Some(e),
            RunError::InvalidIntent(_) => None,
        }
    }
}

impl From<SuperviseError> for RunError {
    fn from(e: SuperviseError) -> Self {
        RunError::Supervise(e)
    }
}

/// What the loop does after a child has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Respawn,
    Stop,
}

fn next_step(intent: Intent) -> Result<Next, RunError> {
    match intent {
        Intent::Restart => Ok(Next::Respawn),
        Intent::Shutdown | Intent::Kill => Ok(Next::Stop),
        Intent::None => Err(RunError::InvalidIntent(intent)),
    }
}

/// Blank line between the output of consecutive children.
fn separate_runs<W: Write>(out: &mut W) -> std::io::Result<()> {
    out.write_all(b"\n")?;
    out.flush()
}

/// Crash-loop protection: how long to wait before the next spawn, if at all.
pub fn respawn_delay(took: Duration, config: &RespawnConfig) -> Option<Duration> {
    if took < config.min_uptime() {
        Some(config.crash_delay())
    } else {
        None
    }
}

pub struct Runner {
    config: SupervisorConfig,
    supervisor: Supervisor,
}

impl Runner {
    pub fn new(config: SupervisorConfig, command: ChildCommand) -> Self {
        let supervisor = Supervisor::new(command, config.shutdown.grace());
        Self { config, supervisor }
    }

    /// Run until the intent becomes terminal or `cancel` fires.
    ///
    /// `feed` is the stream of received OS signals; the coordinator consuming it
    /// is stopped before this returns.
    pub async fn run(
        &self,
        feed: mpsc::Receiver<SignalNumber>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError> {
        // Restart first, so the initial pass always spawns.
        let intent = IntentCell::new(Intent::Restart);
        let (controls, mut inbox) = control_channels();

        let coordinator_cancel = cancel.child_token();
        let coordinator = Coordinator::new(
            self.config.debounce.window(),
            self.config.debounce.policy(),
            intent.clone(),
            controls.clone(),
        );
        let coordinator_task = tokio::spawn(coordinator.run(feed, coordinator_cancel.clone()));

        let result = self.respawn_loop(&intent, &controls, &mut inbox, &cancel).await;

        coordinator_cancel.cancel();
        if let Err(e) = coordinator_task.await {
            tracing::error!(error = %e, "signal coordinator task failed");
        }
        result
    }

    async fn respawn_loop(
        &self,
        intent: &IntentCell,
        controls: &Controls,
        inbox: &mut Inbox,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary {
            runs: 0,
            final_intent: intent.load(),
            signals_sent: 0,
            last_delivered: Vec::new(),
        };

        loop {
            if cancel.is_cancelled() {
                tracing::info!(runs = summary.runs, "cancelled, not respawning");
                summary.final_intent = intent.load();
                return Ok(summary);
            }

            let start = Instant::now();
            summary.runs += 1;
            let done = self.supervisor.run(cancel, controls, inbox).await?;
            let took = start.elapsed();

            // The run has returned, so every intent write that stopped it is visible here.
            let current = intent.load();
            tracing::debug!(
                pid = done.pid,
                status = %done.status,
                delivered = ?done.delivered,
                run = summary.runs,
                took_ms = took.as_millis() as u64,
                intent = %current,
                "run finished"
            );

            summary.signals_sent += done.delivered.len() as u32;
            summary.last_delivered = done.delivered;

            match next_step(current)? {
                Next::Stop => {
                    tracing::info!(runs = summary.runs, intent = %current, "not respawning");
                    summary.final_intent = current;
                    return Ok(summary);
                }
                Next::Respawn => {}
            }

            if let Err(e) = separate_runs(&mut std::io::stdout().lock()) {
                tracing::debug!(error = %e, "failed to write run separator");
            }

            if let Some(delay) = respawn_delay(took, &self.config.respawn) {
                tracing::warn!(
                    took_ms = took.as_millis() as u64,
                    delay_ms = delay.as_millis() as u64,
                    "child exited quickly, delaying respawn"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => continue,
                }
            }

            tracing::info!(
                command = %self.supervisor.command(),
                "respawning"
            );
        }
    }
}
