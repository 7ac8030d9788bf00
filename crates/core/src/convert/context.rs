//! Caller-supplied deadline and cancellation for one import or export call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::StoreError;

/// Deadline and cancellation flag checked at every pipeline stage boundary.
///
/// Cloning shares the cancellation flag, so a caller can keep one clone and
/// call [`CallContext::cancel`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// A context that never expires.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::default()
        }
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail with [`StoreError::Cancelled`] if the call should stop before
    /// entering `stage`.
    pub fn check(&self, stage: &str) -> Result<(), StoreError> {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if self.is_cancelled() || expired {
            return Err(StoreError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_never_stops() {
        let ctx = CallContext::new();
        assert!(ctx.check("import").is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let ctx = CallContext::new();
        let handle = ctx.clone();
        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(
            ctx.check("groups"),
            Err(StoreError::Cancelled { stage }) if stage == "groups"
        ));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = CallContext::with_deadline(Instant::now());
        assert!(ctx.check("export").is_err());
        let ctx = CallContext::with_timeout(Duration::from_secs(3600));
        assert!(ctx.check("export").is_ok());
    }
}
