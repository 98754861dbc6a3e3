/// Single child lifecycle: spawn the command in its own process group, relay
/// control requests to the group as signals, and return once the child exits.
use crate::control::{Controls, Inbox};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The command to supervise, exactly as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ChildCommand {
    pub fn from_argv(argv: Vec<String>) -> Result<Self, SuperviseError> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or(SuperviseError::EmptyCommand)?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl std::fmt::Display for ChildCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A child that has fully exited and been reaped.
#[derive(Debug)]
pub struct CompletedProcess {
    pub pid: u32,
    pub status: ExitStatus,
    /// Signals successfully delivered to the process group, in order.
    pub delivered: Vec<Signal>,
}

/// Errors that end supervision of the current child abnormally.
#[derive(Debug)]
pub enum SuperviseError {
    EmptyCommand,
    /// Failed to start the child at all.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The child started but reported no pid.
    NoPid,
    /// Waiting for the child to exit failed.
    Wait { pid: u32, source: std::io::Error },
}

impl std::fmt::Display for SuperviseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuperviseError::EmptyCommand => write!(f, "no command given to supervise"),
            SuperviseError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            SuperviseError::NoPid => write!(f, "spawned child has no pid"),
            SuperviseError::Wait { pid, source } => {
                write!(f, "failed to wait for child {}: {}", pid, source)
            }
        }
    }
}

impl std::error::Error for SuperviseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SuperviseError::Spawn { source, .. } => Some(source),
            SuperviseError::Wait { source, .. } => Some(source),
            SuperviseError::EmptyCommand | SuperviseError::NoPid => None,
        }
    }
}

/// Posts a kill request after the grace period unless dropped first.
struct Escalation(JoinHandle<()>);

impl Escalation {
    fn arm(grace: Duration, controls: &Controls) -> Self {
        let kill = controls.kill.clone();
        Escalation(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracing::warn!(grace_ms = grace.as_millis() as u64, "grace period over, forcing kill");
            kill.post();
        }))
    }
}

impl Drop for Escalation {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Supervisor {
    command: ChildCommand,
    grace: Duration,
}

impl Supervisor {
    pub fn new(command: ChildCommand, grace: Duration) -> Self {
        Self { command, grace }
    }

    pub fn command(&self) -> &ChildCommand {
        &self.command
    }

    /// Spawn one child and supervise it until it exits.
    ///
    /// Control requests only change what is delivered to the child; the call
    /// returns when the child itself is gone. On `cancel` the child gets a
    /// graceful stop, and a forced kill once the grace period has passed.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        controls: &Controls,
        inbox: &mut Inbox,
    ) -> Result<CompletedProcess, SuperviseError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0) // New process group so one signal reaches the whole subtree
            .spawn()
            .map_err(|e| SuperviseError::Spawn {
                program: self.command.program.clone(),
                source: e,
            })?;

        let pid = child.id().ok_or(SuperviseError::NoPid)?;
        let pgid = Pid::from_raw(pid as i32);
        tracing::info!(pid, command = %self.command, "child started");

        let mut escalation: Option<Escalation> = None;
        let mut delivered = Vec::new();

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled(), if escalation.is_none() => {
                    tracing::info!(pid, "cancelled, stopping child");
                    escalation = Some(Escalation::arm(self.grace, controls));
                    controls.shutdown.post();
                }
                status = child.wait() => {
                    break status.map_err(|e| SuperviseError::Wait { pid, source: e })?;
                }
                Some(()) = inbox.restart.recv() => {
                    controls.shutdown.post();
                }
                Some(()) = inbox.shutdown.recv() => {
                    deliver(pgid, Signal::SIGTERM, &mut delivered);
                }
                Some(()) = inbox.kill.recv() => {
                    deliver(pgid, Signal::SIGKILL, &mut delivered);
                }
            }
        };
        drop(escalation);

        tracing::info!(pid, %status, "child exited");
        Ok(CompletedProcess {
            pid,
            status,
            delivered,
        })
    }
}

/// Send `sig` to the process group. Failure means the group is already gone
/// (or out of reach) and is never fatal.
fn deliver(pgid: Pid, sig: Signal, delivered: &mut Vec<Signal>) {
    match killpg(pgid, sig) {
        Ok(()) => {
            tracing::info!(pgid = pgid.as_raw(), signal = %sig, "signal sent to child group");
            delivered.push(sig);
        }
        Err(e) => {
            tracing::debug!(pgid = pgid.as_raw(), signal = %sig, error = %e, "signal delivery failed, ignoring");
        }
    }
}
