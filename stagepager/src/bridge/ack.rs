//! Dual-phase acknowledgment tracking for submitted codes.
//!
//! Every accepted submission registers an [`AckSignal`] keyed by its
//! nonce. The display path fires the `shown` phase when the batch
//! carrying the code reaches the screen and the `cleared` phase when it
//! leaves again; the submission task waits on both to emit feedback.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::chat::Nonce;

/// A one-shot phase: fires once, wakes all current waiters, and lets
/// later waiters through immediately.
#[derive(Debug, Default)]
struct Phase {
    fired: AtomicBool,
    notify: Notify,
}

impl Phase {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// The two-phase completion signal for one submission.
#[derive(Debug, Default)]
pub struct AckSignal {
    shown: Phase,
    cleared: Phase,
}

impl AckSignal {
    /// Fire the `shown` phase. Idempotent.
    pub fn signal_shown(&self) {
        self.shown.fire();
    }

    /// Fire the `cleared` phase. Idempotent.
    pub fn signal_cleared(&self) {
        self.cleared.fire();
    }

    /// Wait for the batch carrying this submission to reach the screen.
    pub async fn wait_shown(&self) {
        self.shown.wait().await;
    }

    /// Wait for the display to clear again.
    pub async fn wait_cleared(&self) {
        self.cleared.wait().await;
    }
}

/// Registry of in-flight submissions keyed by nonce.
///
/// The registry only exists so the display path can find signals by
/// nonce; each submission task holds its own [`Arc<AckSignal>`], so
/// removal never strands a waiter.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: Mutex<HashMap<Nonce, Arc<AckSignal>>>,
}

impl AckTracker {
    /// Register a new submission and hand back its signal.
    pub fn register(&self, nonce: Nonce) -> Arc<AckSignal> {
        let signal = Arc::new(AckSignal::default());
        self.pending.lock().insert(nonce, Arc::clone(&signal));
        signal
    }

    /// Fire `shown` for every tracked nonce in `nonces`.
    pub fn signal_shown(&self, nonces: &[Nonce]) {
        let pending = self.pending.lock();
        for nonce in nonces {
            if let Some(signal) = pending.get(nonce) {
                signal.signal_shown();
            }
        }
    }

    /// Fire `cleared` for every tracked nonce in `nonces`.
    pub fn signal_cleared(&self, nonces: &[Nonce]) {
        let pending = self.pending.lock();
        for nonce in nonces {
            if let Some(signal) = pending.get(nonce) {
                signal.signal_cleared();
            }
        }
    }

    /// Drop a submission once its owner observed both phases.
    pub fn remove(&self, nonce: &Nonce) {
        self.pending.lock().remove(nonce);
    }
}
