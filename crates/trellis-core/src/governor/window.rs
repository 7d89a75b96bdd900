//! Sliding-window detection of repeated tool calls.
//!
//! `SignatureWindow` keeps the most recent `plugin.action` signatures.
//! When the window is full and every entry is identical, the conversation
//! is looping on an action that will never succeed and the governor halts
//! it. Distinct from the DAG's `loop` step kind.

use std::collections::VecDeque;

/// Bounded window over recent tool-call signatures.
///
/// Plain state, no interior sharing: the conversation loop is
/// single-threaded per run.
#[derive(Debug)]
pub struct SignatureWindow {
    window: VecDeque<String>,
    size: usize,
}

impl SignatureWindow {
    /// Create a window of the given size. A size of zero disables
    /// detection entirely.
    pub fn new(size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Record one signature, evicting the oldest entry when full.
    pub fn record(&mut self, signature: &str) {
        if self.size == 0 {
            return;
        }
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(signature.to_string());
    }

    /// Whether the last `size` signatures are all identical.
    pub fn tripped(&self) -> bool {
        if self.size == 0 || self.window.len() < self.size {
            return false;
        }
        let first = &self.window[0];
        self.window.iter().all(|s| s == first)
    }

    /// The repeating signature, when tripped.
    pub fn repeated_signature(&self) -> Option<&str> {
        if self.tripped() {
            self.window.front().map(String::as_str)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_never_trips() {
        let window = SignatureWindow::new(3);
        assert!(!window.tripped());
    }

    #[test]
    fn three_identical_signatures_trip_default_window() {
        let mut window = SignatureWindow::new(3);
        window.record("google-mail.search_emails");
        assert!(!window.tripped());
        window.record("google-mail.search_emails");
        assert!(!window.tripped());
        window.record("google-mail.search_emails");
        assert!(window.tripped());
        assert_eq!(
            window.repeated_signature(),
            Some("google-mail.search_emails")
        );
    }

    #[test]
    fn alternating_signatures_never_trip() {
        let mut window = SignatureWindow::new(3);
        for sig in ["a.x", "b.y", "a.x", "b.y", "a.x"] {
            window.record(sig);
            assert!(!window.tripped(), "alternation tripped at {sig}");
        }
    }

    #[test]
    fn window_slides_so_recent_repeats_trip() {
        let mut window = SignatureWindow::new(3);
        window.record("a.x");
        window.record("b.y");
        window.record("b.y");
        assert!(!window.tripped());
        // The oldest entry slides out; last three are now identical
        window.record("b.y");
        assert!(window.tripped());
    }

    #[test]
    fn zero_size_disables_detection() {
        let mut window = SignatureWindow::new(0);
        for _ in 0..10 {
            window.record("a.x");
        }
        assert!(!window.tripped());
    }

    #[test]
    fn two_size_window_trips_on_pairs() {
        let mut window = SignatureWindow::new(2);
        window.record("a.x");
        window.record("a.x");
        assert!(window.tripped());
    }
}
