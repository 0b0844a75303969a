//! Top-level entry points: running an effect from ordinary, non-effect code.

use std::sync::Arc;

use futures::FutureExt;

use crate::config::RuntimeConfig;
use crate::effect::Effect;
use crate::error::RunError;

/// Runs `effect` to completion against a root `Env` built from the default
/// `RuntimeConfig`. This is the usual way to drive an effect from an
/// `async fn main` or a test.
pub async fn run_promise<A, E>(effect: Effect<A, E>) -> Result<A, RunError<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    run_promise_with(&RuntimeConfig::default(), effect).await
}

/// Like `run_promise`, but against a root `Env` built from `config` rather
/// than the default.
pub async fn run_promise_with<A, E>(config: &RuntimeConfig, effect: Effect<A, E>) -> Result<A, RunError<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    effect.run(config.build_env()).await.map_err(RunError::from)
}

/// Runs `effect` against a root `Env` built from the default `RuntimeConfig`,
/// but only if it resolves without ever yielding to the executor. Effects
/// that await anything — a `sleep`, a channel, another task — did not
/// complete synchronously, which is itself reported as a defect.
pub fn run_sync<A, E>(effect: Effect<A, E>) -> Result<A, RunError<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    run_sync_with(&RuntimeConfig::default(), effect)
}

/// Like `run_sync`, but against a root `Env` built from `config`.
pub fn run_sync_with<A, E>(config: &RuntimeConfig, effect: Effect<A, E>) -> Result<A, RunError<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    effect
        .run(config.build_env())
        .now_or_never()
        .map(|o| o.map_err(RunError::from))
        .unwrap_or_else(|| {
            Err(RunError::Unexpected(Arc::new(anyhow::anyhow!("did not complete synchronously"))))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, never, succeed};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn run_promise_delivers_success() {
        assert_eq!(run_promise(succeed::<i32, String>(3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn run_promise_delivers_expected_failure() {
        let err = run_promise(fail::<i32, String>("nope".into())).await.unwrap_err();
        assert!(err.is_expected());
    }

    #[test]
    fn run_sync_resolves_an_immediately_ready_effect() {
        let result = run_sync(succeed::<i32, String>(7));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn run_sync_declines_an_effect_that_would_have_to_wait() {
        let err = run_sync(never::<i32, String>()).unwrap_err();
        assert!(!err.is_expected() && !err.is_aborted());
        assert_eq!(err.to_string(), "unexpected defect: did not complete synchronously");
    }
}
