//! The error type surfaced at the boundary between the effect world and
//! ordinary host code, once an effect has actually been run to completion.

use std::sync::Arc;

use crate::failure::Failure;

/// What `run_promise`/`run_sync` hand back for a failed run. Mirrors
/// `Failure<E>` one for one; the distinction exists because `Failure` lives
/// inside the effect algebra (and stays generic over types that never reach
/// the host), while `RunError` is the thing a caller outside this crate
/// actually matches on.
#[derive(Debug, thiserror::Error)]
pub enum RunError<E> {
    #[error("expected failure: {0:?}")]
    Expected(E),
    #[error("unexpected defect: {0}")]
    Unexpected(Arc<anyhow::Error>),
    #[error("aborted")]
    Aborted,
}

impl<E> From<Failure<E>> for RunError<E> {
    fn from(f: Failure<E>) -> Self {
        match f {
            Failure::Expected(e) => RunError::Expected(e),
            Failure::Unexpected(d) => RunError::Unexpected(d),
            Failure::Aborted => RunError::Aborted,
        }
    }
}

impl<E> RunError<E> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunError::Aborted)
    }

    pub fn is_expected(&self) -> bool {
        matches!(self, RunError::Expected(_))
    }
}
