use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation token passed to every blocking operation.
///
/// Cloning shares the flag. Long-running loops (row fetches, exports,
/// LLM chunk reads) check it between units of work; drivers that support
/// native cancellation additionally get the signal forwarded.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `Err(Cancelled)` when the token has fired.
    pub fn check(&self) -> Result<(), crate::DbError> {
        if self.is_cancelled() {
            Err(crate::DbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(crate::DbError::Cancelled)));
    }
}
