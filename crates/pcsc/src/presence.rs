//! Card presence monitoring and the cancellable removal wait

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use derive_more::Display;
use tracing::{debug, trace};

use crate::error::TerminalError;

/// How a removal wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RemovalOutcome {
    /// The card was no longer detected
    #[display("removed")]
    Removed,
    /// The wait was stopped before the card went away
    #[display("cancelled")]
    Cancelled,
}

/// Polls card presence until removal or cancellation
///
/// The only state shared with other threads is the wait flag, an atomic
/// that [`stop`](Self::stop) can clear without taking any lock.
#[derive(Debug, Default)]
pub struct CardPresenceMonitor {
    /// Set while a wait should keep polling
    waiting: AtomicBool,
}

impl CardPresenceMonitor {
    /// Create an idle monitor
    pub const fn new() -> Self {
        Self {
            waiting: AtomicBool::new(false),
        }
    }

    /// Whether a wait is currently polling
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Block until `is_card_present` reports no card, or until [`stop`](Self::stop)
    ///
    /// Presence is checked every `latency`, so a stop issued while the wait
    /// sleeps is observed within one interval. A failing presence check ends
    /// the wait with that error.
    pub fn wait_for_removal<F>(
        &self,
        latency: Duration,
        mut is_card_present: F,
    ) -> Result<RemovalOutcome, TerminalError>
    where
        F: FnMut() -> Result<bool, TerminalError>,
    {
        self.waiting.store(true, Ordering::Release);
        debug!("Waiting for card removal (latency {:?})", latency);

        let outcome = loop {
            if !self.waiting.load(Ordering::Acquire) {
                break RemovalOutcome::Cancelled;
            }
            match is_card_present() {
                Ok(true) => {}
                Ok(false) => break RemovalOutcome::Removed,
                Err(e) => {
                    self.waiting.store(false, Ordering::Release);
                    return Err(e);
                }
            }
            trace!("Card still present");
            thread::sleep(latency);
        };

        self.waiting.store(false, Ordering::Release);
        debug!("Card removal wait ended: {}", outcome);
        Ok(outcome)
    }

    /// Request the running wait to end; no effect when nothing waits
    pub fn stop(&self) {
        if self.waiting.swap(false, Ordering::AcqRel) {
            debug!("Card removal wait stop requested");
        }
    }
}
