//! Submission gating: the single-submission lock and the duplicate window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use herochat_proto::message::ContentFingerprint;

/// Holds the single-submission lock until dropped.
///
/// Released on every exit path of a submission, including errors.
#[derive(Debug)]
pub struct SubmitGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SubmitGuard<'a> {
    /// Take the lock, or `None` if another submission holds it.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Fingerprints accepted within the last `window`.
#[derive(Debug)]
pub struct DuplicateWindow {
    window: Duration,
    recent: VecDeque<(ContentFingerprint, Instant)>,
}

impl DuplicateWindow {
    /// Create an empty window of the given width.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            recent: VecDeque::new(),
        }
    }

    /// Record `fingerprint` as accepted now, unless the same fingerprint was
    /// accepted within the window. Returns `false` for a duplicate.
    pub fn admit(&mut self, fingerprint: ContentFingerprint) -> bool {
        let now = Instant::now();
        while let Some(&(_, at)) = self.recent.front() {
            if now.duration_since(at) < self.window {
                break;
            }
            self.recent.pop_front();
        }
        if self.recent.iter().any(|(fp, _)| *fp == fingerprint) {
            return false;
        }
        self.recent.push_back((fingerprint, now));
        true
    }

    /// Number of fingerprints still inside the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Whether no fingerprint is inside the window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
