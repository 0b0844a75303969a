//! The failure algebra: every way an `Effect` can fail to deliver a success.

use std::sync::Arc;

/// A failure delivered in place of a success.
///
/// `Expected` is the typed, recoverable error channel; `Unexpected` is a defect
/// (a bug, or a lower-level failure the caller never declared); `Aborted` is
/// cancellation. `Unexpected` wraps `Arc<anyhow::Error>` rather than a bare
/// `anyhow::Error` so that `Outcome<A, E>` can be `Clone` whenever `A` and `E`
/// are — needed to broadcast a forked effect's result to arbitrarily many
/// observers via a `tokio::sync::watch` channel. See DESIGN.md.
#[derive(Debug)]
pub enum Failure<E> {
    Expected(E),
    Unexpected(Arc<anyhow::Error>),
    Aborted,
}

impl<E: Clone> Clone for Failure<E> {
    fn clone(&self) -> Self {
        match self {
            Failure::Expected(e) => Failure::Expected(e.clone()),
            Failure::Unexpected(d) => Failure::Unexpected(d.clone()),
            Failure::Aborted => Failure::Aborted,
        }
    }
}

impl<E: std::fmt::Debug> std::fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Expected(e) => write!(f, "expected failure: {e:?}"),
            Failure::Unexpected(d) => write!(f, "unexpected defect: {d}"),
            Failure::Aborted => write!(f, "aborted"),
        }
    }
}

impl<E> Failure<E> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Failure::Aborted)
    }

    pub fn is_expected(&self) -> bool {
        matches!(self, Failure::Expected(_))
    }

    pub fn die(err: impl Into<anyhow::Error>) -> Self {
        Failure::Unexpected(Arc::new(err.into()))
    }

    /// Splits into the expected error, or the non-expected remainder (a
    /// defect or cancellation) which carries no `E` and can be retagged onto
    /// any other `Failure<E2>` without requiring `E2: Clone`.
    pub(crate) fn split(self) -> Result<E, NonExpected> {
        match self {
            Failure::Expected(e) => Ok(e),
            Failure::Unexpected(d) => Err(NonExpected::Unexpected(d)),
            Failure::Aborted => Err(NonExpected::Aborted),
        }
    }
}

/// A `Failure` known not to be `Expected`. Letting combinators that only
/// intercept `Expected` (`catch_all`, `match_effect`) pass the rest through
/// without dragging the caller's `E: Clone` bound along with it.
#[derive(Clone)]
pub(crate) enum NonExpected {
    Unexpected(Arc<anyhow::Error>),
    Aborted,
}

impl NonExpected {
    pub(crate) fn into_failure<E>(self) -> Failure<E> {
        match self {
            NonExpected::Unexpected(d) => Failure::Unexpected(d),
            NonExpected::Aborted => Failure::Aborted,
        }
    }
}

/// Retags a failure known to carry no useful `Infallible` payload onto any
/// target `E`. Used when plumbing a `Failure<std::convert::Infallible>`
/// (e.g. from a finalizer effect) back into a caller's own failure type.
pub(crate) fn retag_infallible<E>(f: Failure<std::convert::Infallible>) -> Failure<E> {
    match f.split() {
        Ok(never) => match never {},
        Err(non_expected) => non_expected.into_failure(),
    }
}

/// The outcome of running an effect: a success, or one of the three failure
/// shapes above.
pub type Outcome<A, E> = Result<A, Failure<E>>;
