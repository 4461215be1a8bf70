//! Single-shot deadlines for the IO task select loops.
//!
//! A [`Deadline`] is a plain `Option<Instant>`: arming it replaces any
//! previous instant, clearing it disarms it. The select loop copies the
//! instant out with [`Deadline::at`] before building its futures and waits
//! on it with [`wait_until`], so a cleared deadline can never fire.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Arm (or re-arm) to fire `after` from now.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub(crate) fn clear(&mut self) {
        self.at = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub(crate) fn at(&self) -> Option<Instant> {
        self.at
    }
}

/// Sleep until `at`, or forever if `at` is `None`.
pub(crate) async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn armed_deadline_fires() {
        let mut d = Deadline::default();
        assert!(!d.is_armed());
        d.arm(Duration::from_secs(5));
        assert!(d.is_armed());

        let start = Instant::now();
        wait_until(d.at()).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_deadline_never_fires() {
        let mut d = Deadline::default();
        d.arm(Duration::from_millis(10));
        d.clear();
        let fired = tokio::time::timeout(Duration::from_secs(60), wait_until(d.at())).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_instant() {
        let mut d = Deadline::default();
        d.arm(Duration::from_secs(1));
        let first = d.at();
        tokio::time::advance(Duration::from_millis(500)).await;
        d.arm(Duration::from_secs(1));
        assert!(d.at() > first);
    }
}
