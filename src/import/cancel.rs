use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
    /// The import already claimed its commit point; the catalog mutation
    /// will happen (or has happened) regardless.
    PastCommitPoint,
}

/// Shared cancellation flag for one in-flight import.
///
/// Cancellation and the pipeline's claim on the commit point race through a
/// single compare-exchange, so exactly one of them wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) -> CancelOutcome {
        match self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => CancelOutcome::Cancelled,
            Err(CANCELLED) => CancelOutcome::AlreadyCancelled,
            Err(_) => CancelOutcome::PastCommitPoint,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Claims the commit point. Returns `false` if the import was cancelled.
    pub(crate) fn enter_commit(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives the commit point back after a rolled-back commit, so the token
    /// can be cancelled again.
    pub(crate) fn commit_failed(&self) {
        let _ = self
            .state
            .compare_exchange(COMMITTING, PENDING, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_commit_wins() {
        let token = CancelToken::new();
        assert_eq!(token.cancel(), CancelOutcome::Cancelled);
        assert_eq!(token.cancel(), CancelOutcome::AlreadyCancelled);
        assert!(token.is_cancelled());
        assert!(!token.enter_commit());
    }

    #[test]
    fn cancel_after_commit_point_is_refused() {
        let token = CancelToken::new();
        let pipeline_side = token.clone();
        assert!(pipeline_side.enter_commit());
        assert_eq!(token.cancel(), CancelOutcome::PastCommitPoint);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn failed_commit_releases_the_commit_point() {
        let token = CancelToken::new();
        assert!(token.enter_commit());
        token.commit_failed();
        assert_eq!(token.cancel(), CancelOutcome::Cancelled);
        // Only a committing token is rolled back.
        token.commit_failed();
        assert!(token.is_cancelled());
    }
}
