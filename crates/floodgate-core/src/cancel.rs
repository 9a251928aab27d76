//! Cooperative cancellation signals.
//!
//! Every call into the external adapters accepts a [`CancelSignal`] — the
//! same `watch` channel the task runner hands to task handlers. An adapter
//! call races its I/O against the signal and returns
//! [`AdapterError::Cancelled`](crate::error::AdapterError::Cancelled) when
//! the signal fires first, so a shutdown can stop a fan-out mid-call
//! instead of waiting for the abort grace.

use tokio::sync::watch;

/// A cancellation signal: flips to `true` exactly once.
pub type CancelSignal = watch::Receiver<bool>;

/// A signal that never fires.
///
/// Used on request paths whose futures are dropped wholesale on
/// disconnect, where no explicit signal exists.
#[must_use]
pub fn never() -> CancelSignal {
    let (_tx, rx) = watch::channel(false);
    rx
}

/// Resolve when the signal fires.
///
/// A dropped sender is not a cancellation — if the sender goes away without
/// ever sending `true`, this future never resolves.
pub async fn fired(mut signal: CancelSignal) {
    if *signal.borrow() {
        return;
    }
    while signal.changed().await.is_ok() {
        if *signal.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_when_signalled() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        fired(rx).await;
    }

    #[tokio::test]
    async fn already_fired_signal_resolves_immediately() {
        let (_tx, rx) = watch::channel(true);
        fired(rx).await;
    }

    #[tokio::test]
    async fn dropped_sender_is_not_a_cancellation() {
        let rx = never();
        let result = tokio::time::timeout(Duration::from_millis(50), fired(rx)).await;
        assert!(result.is_err());
    }
}
