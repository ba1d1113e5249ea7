//! Caller-side cancellation of a provisioning pass.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmforge_shared::{VmforgeError, VmforgeResult};

use crate::vm::PendingReason;

/// Cancellation signal and optional deadline for one provisioning pass.
///
/// Checked between stages, never in the middle of an external call.
#[derive(Debug, Clone, Default)]
pub struct ProvisionControl {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ProvisionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token; cancelling it aborts the pass.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Abort the pass once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`VmforgeError::Cancelled`] if the pass should stop before `stage`.
    pub fn check(&self, stage: &'static str) -> VmforgeResult<()> {
        if self.is_cancelled() || self.deadline_passed() {
            return Err(VmforgeError::Cancelled { stage });
        }
        Ok(())
    }

    /// Resolves when the pass is cancelled or its deadline passes.
    pub async fn interrupted(&self) -> PendingReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => PendingReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => PendingReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                PendingReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_after_cancel() {
        let control = ProvisionControl::new();
        control.check("network").unwrap();
        control.cancel();
        let err = control.check("network").unwrap_err();
        assert!(matches!(err, VmforgeError::Cancelled { stage: "network" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let control = ProvisionControl::new().with_timeout(Duration::from_secs(5));
        control.check("seed").unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(control.check("seed").is_err());
        assert_eq!(control.interrupted().await, PendingReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_interrupted_by_token() {
        let control = ProvisionControl::new();
        let other = control.clone();
        tokio::spawn(async move { other.cancel() });
        assert_eq!(control.interrupted().await, PendingReason::Cancelled);
    }
}
