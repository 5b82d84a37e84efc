//! Cooperative cancellation for long-running comparisons and calibrations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EvalError;

/// Shared cancellation flag. Clones observe the same flag.
///
/// ```
/// use u_layer_eval::cancel::CancelFlag;
///
/// let flag = CancelFlag::new();
/// let handle = flag.clone();
/// assert!(flag.check().is_ok());
/// handle.cancel();
/// assert!(flag.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            tracing::debug!("cancellation observed");
            Err(EvalError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Polls an optional flag; `None` never cancels.
#[inline]
pub(crate) fn poll(flag: Option<&CancelFlag>) -> Result<(), EvalError> {
    match flag {
        Some(f) => f.check(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancelFlag::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn poll_none_never_cancels() {
        assert!(poll(None).is_ok());
    }

    #[test]
    fn poll_raised_flag() {
        let flag = CancelFlag::new();
        flag.cancel();
        assert!(matches!(poll(Some(&flag)), Err(EvalError::Cancelled)));
    }
}
