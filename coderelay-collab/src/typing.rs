//! "Someone is typing" indicator.
//!
//! Each `userTyping` event shows the indicator and (re)starts a fixed
//! window. When the window runs out without another event the indicator
//! clears. New events restart the window rather than stacking timers.
//!
//! Reading the indicator never changes it; only [`TypingIndicator::poll_expired`]
//! performs the clear, so whoever drives the timer sees it exactly once.

use std::time::{Duration, Instant};

/// How long the indicator stays up after the last typing event.
pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

/// Characters of the display name shown in the label.
const LABEL_NAME_CHARS: usize = 8;

#[derive(Debug, Clone)]
pub struct TypingIndicator {
    window: Duration,
    typist: Option<String>,
    deadline: Option<Instant>,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self::with_window(TYPING_WINDOW)
    }

    /// Create with a custom window (for testing).
    pub fn with_window(window: Duration) -> Self {
        Self { window, typist: None, deadline: None }
    }

    /// Record a typing event received now.
    pub fn notify(&mut self, name: impl Into<String>) {
        self.notify_at(name, Instant::now());
    }

    pub fn notify_at(&mut self, name: impl Into<String>, now: Instant) {
        self.typist = Some(name.into());
        self.deadline = Some(now + self.window);
    }

    /// Clear the indicator if its window has run out.
    ///
    /// Returns `true` only on the call that performs the clear.
    pub fn poll_expired(&mut self) -> bool {
        self.poll_expired_at(Instant::now())
    }

    pub fn poll_expired_at(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.typist = None;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Name of whoever is shown as typing, if the window is still open.
    pub fn typist_at(&self, now: Instant) -> Option<&str> {
        match self.deadline {
            Some(deadline) if now < deadline => self.typist.as_deref(),
            _ => None,
        }
    }

    /// Label for display, e.g. `"Alice... is Typing"`.
    pub fn label(&self) -> Option<String> {
        self.label_at(Instant::now())
    }

    pub fn label_at(&self, now: Instant) -> Option<String> {
        self.typist_at(now).map(|name| {
            let short: String = name.chars().take(LABEL_NAME_CHARS).collect();
            format!("{short}... is Typing")
        })
    }

    /// When the indicator will clear, if it is showing.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn clear(&mut self) {
        self.typist = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_indicator_is_empty() {
        let mut indicator = TypingIndicator::new();
        assert!(indicator.label().is_none());
        assert!(!indicator.poll_expired());
    }

    #[test]
    fn test_shows_immediately() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Alice", t0);
        assert_eq!(indicator.label_at(t0).as_deref(), Some("Alice... is Typing"));
    }

    #[test]
    fn test_label_truncates_long_names() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Bartholomew", t0);
        assert_eq!(indicator.label_at(t0).as_deref(), Some("Bartholo... is Typing"));
    }

    #[test]
    fn test_label_truncates_on_char_boundaries() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Zoë Åkesson", t0);
        assert_eq!(indicator.label_at(t0).as_deref(), Some("Zoë Åkes... is Typing"));
    }

    #[test]
    fn test_clears_once_after_window() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Alice", t0);

        assert!(!indicator.poll_expired_at(t0 + Duration::from_millis(1999)));
        assert!(indicator.typist_at(t0 + Duration::from_millis(1999)).is_some());

        assert!(indicator.poll_expired_at(t0 + TYPING_WINDOW));
        assert!(!indicator.poll_expired_at(t0 + Duration::from_secs(3)));
        assert!(!indicator.poll_expired_at(t0 + Duration::from_secs(10)));
        assert!(indicator.label_at(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_new_event_restarts_window() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Alice", t0);
        indicator.notify_at("Bob", t0 + Duration::from_millis(1500));

        // The first window would have closed here.
        let t1 = t0 + Duration::from_millis(2500);
        assert!(!indicator.poll_expired_at(t1));
        assert_eq!(indicator.typist_at(t1), Some("Bob"));

        assert!(indicator.poll_expired_at(t0 + Duration::from_millis(3500)));
    }

    #[test]
    fn test_reading_after_expiry_does_not_clear() {
        let mut indicator = TypingIndicator::new();
        let t0 = Instant::now();
        indicator.notify_at("Alice", t0);

        let late = t0 + Duration::from_secs(5);
        assert!(indicator.label_at(late).is_none());
        assert!(indicator.typist_at(late).is_none());
        // The pending clear is still reported to whoever polls for it.
        assert!(indicator.poll_expired_at(late));
        assert!(!indicator.poll_expired_at(late));
    }

    #[test]
    fn test_custom_window_and_clear() {
        let mut indicator = TypingIndicator::with_window(Duration::from_millis(10));
        let t0 = Instant::now();
        indicator.notify_at("Alice", t0);
        assert_eq!(indicator.deadline(), Some(t0 + Duration::from_millis(10)));

        indicator.clear();
        assert!(indicator.deadline().is_none());
        assert!(!indicator.poll_expired_at(t0 + Duration::from_secs(1)));
    }
}
