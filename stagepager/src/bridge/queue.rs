//! Batching queue and dispatch queue for accepted codes.
//!
//! Codes arriving close together coalesce into one display batch: the
//! first code arms a window timer, later codes pile in, and the batch
//! flushes when the deadline passes. A flush takes at most `batch_max`
//! codes; any overflow stays behind with a fresh window. Flushed
//! batches queue in FIFO order for the display path.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::chat::Nonce;

/// One accepted code waiting for the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Chat-message identifier correlating feedback.
    pub nonce: Nonce,
    /// The 4-digit code to display.
    pub code: String,
}

/// The open batch: codes collected since the window was armed.
#[derive(Debug, Default)]
struct OpenBatch {
    items: Vec<Submission>,
    expires_at: Option<Instant>,
}

/// Accumulates codes into time-windowed batches.
#[derive(Debug)]
pub struct BatchQueue {
    open: Mutex<OpenBatch>,
    armed: Notify,
    window: Duration,
}

impl BatchQueue {
    /// Create a queue flushing `window` after the first code of a batch.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            open: Mutex::new(OpenBatch::default()),
            armed: Notify::new(),
            window,
        }
    }

    /// Append a code to the open batch.
    ///
    /// The first code of a batch arms the window timer; later codes do
    /// not extend the deadline.
    pub fn add(&self, submission: Submission) {
        let mut open = self.open.lock();
        open.items.push(submission);
        if open.expires_at.is_none() {
            open.expires_at = Some(Instant::now() + self.window);
            drop(open);
            self.armed.notify_one();
        }
    }

    /// Codes currently waiting in the open batch, oldest first.
    #[must_use]
    pub fn pending_codes(&self) -> Vec<String> {
        self.open
            .lock()
            .items
            .iter()
            .map(|submission| submission.code.clone())
            .collect()
    }

    /// Number of codes in the open batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.lock().items.len()
    }

    /// Whether the open batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next deadline and flush the batch.
    ///
    /// Intended to be driven by a single scheduler task. When more than
    /// `batch_max` codes accumulated, the flush takes the oldest
    /// `batch_max` and re-arms the remainder with a fresh window.
    pub async fn next_ready(&self, batch_max: usize) -> Vec<Submission> {
        loop {
            let deadline = loop {
                let armed = self.armed.notified();
                if let Some(deadline) = self.deadline() {
                    break deadline;
                }
                armed.await;
            };

            tokio::time::sleep_until(deadline).await;

            let ready = self.take_ready(batch_max);
            if !ready.is_empty() {
                return ready;
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.open.lock().expires_at
    }

    fn take_ready(&self, batch_max: usize) -> Vec<Submission> {
        let mut open = self.open.lock();
        if open.items.len() > batch_max {
            let rest = open.items.split_off(batch_max);
            let ready = std::mem::replace(&mut open.items, rest);
            open.expires_at = Some(Instant::now() + self.window);
            ready
        } else {
            open.expires_at = None;
            std::mem::take(&mut open.items)
        }
    }
}

/// FIFO queue of flushed batches awaiting the display path.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    ready: Mutex<VecDeque<Vec<Submission>>>,
    wake: Notify,
}

impl DispatchQueue {
    /// Queue a flushed batch.
    pub fn push(&self, batch: Vec<Submission>) {
        self.ready.lock().push_back(batch);
        self.wake.notify_one();
    }

    /// Wait for the next batch. Single consumer.
    pub async fn pop(&self) -> Vec<Submission> {
        loop {
            let wake = self.wake.notified();
            if let Some(batch) = self.ready.lock().pop_front() {
                return batch;
            }
            wake.await;
        }
    }

    /// Number of batches waiting.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ready.lock().len()
    }

    /// Codes in waiting batches, oldest first.
    #[must_use]
    pub fn queued_codes(&self) -> Vec<String> {
        self.ready
            .lock()
            .iter()
            .flat_map(|batch| batch.iter().map(|submission| submission.code.clone()))
            .collect()
    }
}

/// Format a batch for display and collect its nonces.
///
/// A single code renders verbatim. Several codes join with commas and
/// an ampersand before the last: `"1111, 2222 & 3333"`. Arrival order
/// is preserved in both the text and the nonce list.
#[must_use]
pub fn format_batch(items: &[Submission]) -> (String, Vec<Nonce>) {
    let nonces: Vec<Nonce> = items.iter().map(|s| s.nonce.clone()).collect();
    let codes: Vec<&str> = items.iter().map(|s| s.code.as_str()).collect();

    let text = match codes.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} & {last}", init.join(", ")),
    };

    (text, nonces)
}
