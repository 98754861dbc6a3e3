/// Coalescing control mailboxes between the signal coordinator and the
/// supervision loop.
///
/// Each mailbox holds at most one pending request. Posting while a request is
/// already pending is a no-op, so a burst of identical requests is delivered
/// to the child as a single signal.
use tokio::sync::mpsc::{self, error::TrySendError};

/// Posting side of one mailbox.
#[derive(Debug, Clone)]
pub struct Mailbox {
    name: &'static str,
    tx: mpsc::Sender<()>,
}

impl Mailbox {
    /// Post a request without blocking. Returns `false` if one was already pending.
    pub fn post(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::debug!(mailbox = self.name, "request already pending, coalesced");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Creates a capacity-1 mailbox.
pub fn mailbox(name: &'static str) -> (Mailbox, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Mailbox { name, tx }, rx)
}

/// Posting handles for the three control requests.
#[derive(Debug, Clone)]
pub struct Controls {
    pub restart: Mailbox,
    pub shutdown: Mailbox,
    pub kill: Mailbox,
}

/// Receiving ends, owned by whoever runs the supervision loop.
#[derive(Debug)]
pub struct Inbox {
    pub restart: mpsc::Receiver<()>,
    pub shutdown: mpsc::Receiver<()>,
    pub kill: mpsc::Receiver<()>,
}

pub fn control_channels() -> (Controls, Inbox) {
    let (restart, restart_rx) = mailbox("restart");
    let (shutdown, shutdown_rx) = mailbox("shutdown");
    let (kill, kill_rx) = mailbox("kill");
    (
        Controls {
            restart,
            shutdown,
            kill,
        },
        Inbox {
            restart: restart_rx,
            shutdown: shutdown_rx,
            kill: kill_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_posts_coalesce() {
        let (mb, mut rx) = mailbox("shutdown");
        assert!(mb.post());
        assert!(!mb.post());
        assert!(!mb.post());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_after_drain_is_accepted() {
        let (mb, mut rx) = mailbox("restart");
        assert!(mb.post());
        rx.try_recv().unwrap();
        assert!(mb.post());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_mailboxes_are_independent() {
        let (controls, mut inbox) = control_channels();
        controls.kill.post();
        controls.shutdown.post();

        assert!(inbox.restart.try_recv().is_err());
        assert!(inbox.shutdown.try_recv().is_ok());
        assert!(inbox.kill.try_recv().is_ok());
    }

    #[test]
    fn test_post_to_closed_mailbox_is_harmless() {
        let (mb, rx) = mailbox("kill");
        drop(rx);
        assert!(!mb.post());
    }
}
