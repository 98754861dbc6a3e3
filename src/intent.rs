/// Supervisory intent: what the runner should do once the current child stops.
///
/// The intent lives in an `IntentCell` shared between the signal coordinator
/// (sole writer) and the runner (reader). The runner only reads after the
/// supervision loop for the current child has returned, so every write that
/// led to the child stopping happens-before the read that decides whether to
/// respawn.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Intent {
    /// No decision. Never written by the coordinator; seeing it after a run is a logic error.
    None = 0,
    /// Stop the current child gracefully and spawn a new one.
    Restart = 1,
    /// Stop the current child gracefully and exit.
    Shutdown = 2,
    /// Force-kill the current child and exit.
    Kill = 3,
}

impl Intent {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Intent::Restart,
            2 => Intent::Shutdown,
            3 => Intent::Kill,
            _ => Intent::None,
        }
    }

    /// Whether the runner should stop respawning after this intent.
    pub fn is_terminal(self) -> bool {
        matches!(self, Intent::Shutdown | Intent::Kill)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Intent::None => "none",
            Intent::Restart => "restart",
            Intent::Shutdown => "shutdown",
            Intent::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// Single authoritative intent value, shared by handle.
#[derive(Debug, Clone)]
pub struct IntentCell {
    value: Arc<AtomicU8>,
}

impl IntentCell {
    pub fn new(initial: Intent) -> Self {
        Self {
            value: Arc::new(AtomicU8::new(initial as u8)),
        }
    }

    pub fn store(&self, intent: Intent) {
        self.value.store(intent as u8, Ordering::Release);
    }

    pub fn load(&self) -> Intent {
        Intent::from_u8(self.value.load(Ordering::Acquire))
    }
}

/// Maps the number of interrupts seen in one debounce window to an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptPolicy {
    /// Interrupt count at which a burst means shutdown instead of restart.
    pub shutdown_threshold: u32,
    /// Interrupt count at which a burst means kill.
    pub kill_threshold: u32,
}

impl Default for InterruptPolicy {
    fn default() -> Self {
        Self {
            shutdown_threshold: 2,
            kill_threshold: 5,
        }
    }
}

impl InterruptPolicy {
    /// Returns `Intent::None` when the window saw no interrupts.
    pub fn classify(&self, count: u32) -> Intent {
        if count == 0 {
            Intent::None
        } else if count >= self.kill_threshold {
            Intent::Kill
        } else if count >= self.shutdown_threshold {
            Intent::Shutdown
        } else {
            Intent::Restart
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_default_thresholds() {
        let policy = InterruptPolicy::default();
        assert_eq!(policy.classify(0), Intent::None);
        assert_eq!(policy.classify(1), Intent::Restart);
        assert_eq!(policy.classify(2), Intent::Shutdown);
        assert_eq!(policy.classify(3), Intent::Shutdown);
        assert_eq!(policy.classify(4), Intent::Shutdown);
        assert_eq!(policy.classify(5), Intent::Kill);
        assert_eq!(policy.classify(40), Intent::Kill);
    }

    #[test]
    fn test_classify_custom_thresholds() {
        let policy = InterruptPolicy {
            shutdown_threshold: 3,
            kill_threshold: 4,
        };
        assert_eq!(policy.classify(2), Intent::Restart);
        assert_eq!(policy.classify(3), Intent::Shutdown);
        assert_eq!(policy.classify(4), Intent::Kill);
    }

    #[test]
    fn test_cell_shares_value_across_clones() {
        let cell = IntentCell::new(Intent::Restart);
        let writer = cell.clone();
        assert_eq!(cell.load(), Intent::Restart);

        writer.store(Intent::Kill);
        assert_eq!(cell.load(), Intent::Kill);
    }

    #[test]
    fn test_terminal_intents() {
        assert!(!Intent::None.is_terminal());
        assert!(!Intent::Restart.is_terminal());
        assert!(Intent::Shutdown.is_terminal());
        assert!(Intent::Kill.is_terminal());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Intent::Restart.to_string(), "restart");
        assert_eq!(Intent::Kill.to_string(), "kill");
    }
}
