//! `Env`: the ambient context every `Effect` runs against.

use std::num::NonZeroUsize;

use tokio_util::sync::CancellationToken;

use crate::context::ServiceMap;

/// How many branches of a `for_each` may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Unbounded,
    Bounded(NonZeroUsize),
}

impl Concurrency {
    pub fn bounded(n: usize) -> Self {
        match NonZeroUsize::new(n) {
            Some(n) => Concurrency::Bounded(n),
            None => Concurrency::Bounded(NonZeroUsize::new(1).unwrap()),
        }
    }
}

/// Cheaply cloned, copy-on-write ambient state threaded through every
/// `Effect::run` call: the cancellation token for the current
/// interruptibility region, whether that region is currently interruptible,
/// the default fan-out width for `for_each`, and the service map backing
/// `service::<T>()`.
#[derive(Clone)]
pub struct Env {
    pub(crate) cancel_token: CancellationToken,
    pub(crate) interruptible: bool,
    pub(crate) concurrency: Concurrency,
    pub(crate) context: ServiceMap,
}

impl Env {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            interruptible: true,
            concurrency: Concurrency::Unbounded,
            context: ServiceMap::empty(),
        }
    }

    pub fn with_cancel_token(&self, token: CancellationToken) -> Self {
        let mut next = self.clone();
        next.cancel_token = token;
        next
    }

    pub fn with_interruptible(&self, interruptible: bool) -> Self {
        let mut next = self.clone();
        next.interruptible = interruptible;
        next
    }

    pub fn with_concurrency(&self, concurrency: Concurrency) -> Self {
        let mut next = self.clone();
        next.concurrency = concurrency;
        next
    }

    pub fn with_context(&self, context: ServiceMap) -> Self {
        let mut next = self.clone();
        next.context = context;
        next
    }

    pub fn child_cancel_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn interruptible(&self) -> bool {
        self.interruptible
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn context(&self) -> &ServiceMap {
        &self.context
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
