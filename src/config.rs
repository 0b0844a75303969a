//! Builder for the root `Env` a top-level run starts from.

use tokio_util::sync::CancellationToken;

use crate::env::{Concurrency, Env};

/// Settings for the root `Env` handed to `run_promise`/`run_fork`. Building
/// an `Env` directly works too; this exists for callers who want named
/// defaults and validation rather than threading `with_*` calls by hand.
#[derive(Clone)]
pub struct RuntimeConfig {
    concurrency: Concurrency,
    interruptible: bool,
    cancel_token: Option<CancellationToken>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            interruptible: true,
            cancel_token: None,
        }
    }
}

/// The default fan-out width for `for_each` when a caller doesn't specify
/// one: one branch per available core.
pub fn default_concurrency() -> Concurrency {
    Concurrency::bounded(num_cpus::get())
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Supplies an externally-owned cancellation token (e.g. one tied to a
    /// host shutdown signal) instead of letting `build_env` mint a fresh
    /// root token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn build_env(&self) -> Env {
        let token = self.cancel_token.clone().unwrap_or_default();
        Env::new()
            .with_cancel_token(token)
            .with_interruptible(self.interruptible)
            .with_concurrency(self.concurrency)
    }
}

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_an_interruptible_env() {
        let env = RuntimeConfig::new().build_env();
        assert!(env.interruptible());
        assert!(!env.is_cancelled());
    }

    #[test]
    fn an_external_cancel_token_is_honored() {
        let token = CancellationToken::new();
        token.cancel();
        let env = RuntimeConfig::new().cancel_token(token).build_env();
        assert!(env.is_cancelled());
    }

    #[test]
    fn concurrency_override_is_applied() {
        let env = RuntimeConfig::new()
            .concurrency(Concurrency::bounded(4))
            .build_env();
        assert_eq!(env.concurrency(), Concurrency::bounded(4));
    }
}
