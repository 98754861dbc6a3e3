/// Signal handling: turns OS signals into supervisory intents.
///
/// SIGTERM: shutdown, immediately.
/// SIGINT: counted, then classified once no signal has arrived for one
/// debounce window (1 = restart, a short burst = shutdown, a long burst = kill).
/// SIGTSTP and every other observed signal: received, no action.
use crate::control::Controls;
use crate::intent::{Intent, IntentCell, InterruptPolicy};
use nix::sys::signal::Signal;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_stream::wrappers::SignalStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;

/// Signals that cannot be caught, or that only ever report a fault in the
/// supervisor itself.
const NOT_OBSERVED: &[Signal] = &[
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGTRAP,
];

/// A received signal by number. Real-time signals have no `Signal` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalNumber(pub i32);

impl SignalNumber {
    pub fn named(self) -> Option<Signal> {
        Signal::try_from(self.0).ok()
    }
}

impl From<Signal> for SignalNumber {
    fn from(sig: Signal) -> Self {
        SignalNumber(sig as i32)
    }
}

impl std::fmt::Display for SignalNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.named() {
            Some(sig) => f.write_str(sig.as_str()),
            None => write!(f, "SIGRT({})", self.0),
        }
    }
}

/// Every signal number the supervisor installs a handler for: all named
/// signals except `NOT_OBSERVED`, then the real-time range.
///
/// Catching a signal replaces its default action, so none of these stop or
/// terminate the supervisor itself.
pub fn observed() -> Vec<SignalNumber> {
    Signal::iterator()
        .filter(|sig| !NOT_OBSERVED.contains(sig))
        .map(SignalNumber::from)
        .chain(realtime().map(SignalNumber))
        .collect()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn realtime() -> std::ops::RangeInclusive<i32> {
    nix::libc::SIGRTMIN()..=nix::libc::SIGRTMAX()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn realtime() -> std::ops::RangeInclusive<i32> {
    #[allow(clippy::reversed_empty_ranges)]
    let empty = 1..=0;
    empty
}

/// How the coordinator treats a received signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Terminate,
    Interrupt,
    Ignore,
    Unhandled,
}

impl SignalClass {
    pub fn of(sig: SignalNumber) -> Self {
        match sig.named() {
            Some(Signal::SIGTERM) => SignalClass::Terminate,
            Some(Signal::SIGINT) => SignalClass::Interrupt,
            Some(Signal::SIGTSTP) => SignalClass::Ignore,
            _ => SignalClass::Unhandled,
        }
    }
}

/// Install handlers for every `observed()` signal and forward each receipt
/// into a channel.
///
/// Must be called from within a tokio runtime. The forwarding task ends when
/// the receiver is dropped. A named signal that cannot be registered is an
/// error; a real-time one is skipped with a debug log.
pub fn install_feed() -> std::io::Result<mpsc::Receiver<SignalNumber>> {
    let mut streams = StreamMap::new();
    for sig in observed() {
        match signal(SignalKind::from_raw(sig.0)) {
            Ok(stream) => {
                streams.insert(sig, SignalStream::new(stream));
            }
            Err(e) if sig.named().is_none() => {
                tracing::debug!(signal = %sig, error = %e, "cannot observe real-time signal");
            }
            Err(e) => return Err(e),
        }
    }

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some((sig, ())) = streams.next().await {
            if tx.send(sig).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Debounces incoming signals into intents and posts the matching control request.
pub struct Coordinator {
    window: Duration,
    policy: InterruptPolicy,
    intent: IntentCell,
    controls: Controls,
}

impl Coordinator {
    pub fn new(
        window: Duration,
        policy: InterruptPolicy,
        intent: IntentCell,
        controls: Controls,
    ) -> Self {
        Self {
            window,
            policy,
            intent,
            controls,
        }
    }

    /// Observe `feed` until `cancel` fires.
    ///
    /// Every wait is bounded by the debounce window, so the interrupt counter
    /// is flushed even when no further signals arrive.
    pub async fn run(self, mut feed: mpsc::Receiver<SignalNumber>, cancel: CancellationToken) {
        let mut interrupts: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = tokio::time::timeout(self.window, feed.recv()) => match next {
                    Ok(Some(sig)) => self.observe(sig, &mut interrupts),
                    Ok(None) => {
                        tracing::debug!("signal feed closed");
                        self.flush(&mut interrupts);
                        cancel.cancelled().await;
                        return;
                    }
                    Err(_) => self.flush(&mut interrupts),
                },
            }
        }
    }

    fn observe(&self, sig: SignalNumber, interrupts: &mut u32) {
        tracing::debug!(signal = %sig, "signal received");
        match SignalClass::of(sig) {
            SignalClass::Terminate => {
                // A terminate supersedes whatever interrupts are still pending.
                *interrupts = 0;
                self.decide(Intent::Shutdown);
            }
            SignalClass::Interrupt => *interrupts = interrupts.saturating_add(1),
            SignalClass::Ignore | SignalClass::Unhandled => {}
        }
    }

    fn flush(&self, interrupts: &mut u32) {
        let count = std::mem::take(interrupts);
        let intent = self.policy.classify(count);
        if intent != Intent::None {
            tracing::debug!(count, %intent, "interrupt window closed");
            self.decide(intent);
        }
    }

    fn decide(&self, intent: Intent) {
        let current = self.intent.load();
        if intent == Intent::Restart && current.is_terminal() {
            tracing::info!(%current, "ignoring restart, already stopping");
            return;
        }

        tracing::info!(%intent, "supervisory intent changed");
        // Store before posting so the loop never acts on a request whose intent is not visible.
        self.intent.store(intent);
        match intent {
            Intent::Restart => self.controls.restart.post(),
            Intent::Shutdown => self.controls.shutdown.post(),
            Intent::Kill => self.controls.kill.post(),
            Intent::None => false,
        };
    }
}
