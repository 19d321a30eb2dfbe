// Single-slot transient notifier.
//
// At most one toast is visible. Showing a new one replaces the current toast
// and restarts the visibility deadline; nothing is queued. The event loop
// sleeps until `deadline()` and then calls `dismiss_expired`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_VISIBLE_FOR: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    BettingOpened,
    BetPlaced,
    BetRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub text: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    visible_for: Duration,
    current: Option<Toast>,
}

impl Notifier {
    pub fn new(visible_for: Duration) -> Self {
        Notifier {
            visible_for,
            current: None,
        }
    }

    /// Show `text`, preempting any visible toast.
    pub fn show(&mut self, kind: ToastKind, text: impl Into<String>, now: Instant) -> &Toast {
        if let Some(previous) = &self.current {
            debug!("Toast preempted: {}", previous.text);
        }
        self.current.insert(Toast {
            kind,
            text: text.into(),
            expires_at: now + self.visible_for,
        })
    }

    pub fn current(&self) -> Option<&Toast> {
        self.current.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|t| t.expires_at)
    }

    /// Drop the toast if its deadline has passed. Returns whether one was
    /// dismissed.
    pub fn dismiss_expired(&mut self, now: Instant) -> bool {
        match &self.current {
            Some(toast) if now >= toast.expires_at => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Remove any toast immediately, cancelling its pending dismissal.
    pub fn clear(&mut self) -> bool {
        self.current.take().is_some()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new(DEFAULT_VISIBLE_FOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_sets_deadline_from_visibility() {
        let mut notifier = Notifier::default();
        let now = Instant::now();
        let toast = notifier.show(ToastKind::BettingOpened, "Betting is open", now);
        assert_eq!(toast.expires_at, now + Duration::from_secs(3));
        assert_eq!(notifier.deadline(), Some(now + Duration::from_secs(3)));
    }

    #[test]
    fn new_toast_replaces_and_resets_timer() {
        let mut notifier = Notifier::default();
        let start = Instant::now();
        notifier.show(ToastKind::BettingOpened, "first", start);

        let later = start + Duration::from_secs(2);
        notifier.show(ToastKind::BetPlaced, "second", later);

        let current = notifier.current().unwrap();
        assert_eq!(current.text, "second");
        assert_eq!(current.kind, ToastKind::BetPlaced);
        assert_eq!(current.expires_at, later + Duration::from_secs(3));

        // The first toast's deadline has passed but the replacement stays.
        assert!(!notifier.dismiss_expired(start + Duration::from_secs(3)));
        assert!(notifier.current().is_some());
    }

    #[test]
    fn dismisses_after_deadline() {
        let mut notifier = Notifier::new(Duration::from_millis(500));
        let now = Instant::now();
        notifier.show(ToastKind::BetRejected, "nope", now);

        assert!(!notifier.dismiss_expired(now + Duration::from_millis(499)));
        assert!(notifier.dismiss_expired(now + Duration::from_millis(500)));
        assert!(notifier.current().is_none());
        assert_eq!(notifier.deadline(), None);
    }

    #[test]
    fn clear_cancels_pending_dismissal() {
        let mut notifier = Notifier::default();
        notifier.show(ToastKind::BetPlaced, "ok", Instant::now());
        assert!(notifier.clear());
        assert!(!notifier.clear());
        assert_eq!(notifier.deadline(), None);
    }
}
