//! Forking effects into background tasks and observing them via `Handle`.
//!
//! A child gets its own cancellation scope linked to the parent's, and the
//! caller is handed a lightweight, clonable observer rather than the task
//! itself. The observer is backed by a `tokio::sync::watch` channel, which
//! gives single-assignment, multi-observer delivery for free.

use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::effect::{make, Effect};
use crate::env::Env;
use crate::failure::{Failure, Outcome};

/// An observer of a forked effect's eventual result.
pub struct Handle<A, E> {
    result_rx: tokio::sync::watch::Receiver<Option<Outcome<A, E>>>,
    cancel_token: CancellationToken,
    is_root: bool,
}

impl<A, E> Clone for Handle<A, E> {
    fn clone(&self) -> Self {
        Handle {
            result_rx: self.result_rx.clone(),
            cancel_token: self.cancel_token.clone(),
            is_root: self.is_root,
        }
    }
}

impl<A: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> Handle<A, E> {
    /// True for handles produced by `fork_daemon` / `run_fork` — forks whose
    /// lifetime is not tied to any enclosing scope.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Synchronously inspects whatever result has landed so far, without
    /// waiting. `None` means the fork hasn't completed yet.
    pub fn unsafe_poll(&self) -> Option<Outcome<A, E>> {
        self.result_rx.borrow().clone()
    }

    /// Requests cancellation without waiting for it to take effect.
    pub fn unsafe_abort(&self) {
        self.cancel_token.cancel();
    }

    /// Waits for the fork to complete and reifies its result as a value —
    /// this effect itself cannot fail with `Expected`.
    pub fn await_outcome(&self) -> Effect<Outcome<A, E>, std::convert::Infallible> {
        let rx = self.result_rx.clone();
        make(move |_env: Env| {
            let mut rx = rx.clone();
            async move {
                loop {
                    if let Some(o) = rx.borrow().clone() {
                        return Ok(o);
                    }
                    if rx.changed().await.is_err() {
                        return Ok(Err(Failure::Aborted));
                    }
                }
            }
        })
    }

    /// Waits for the fork to complete and unwraps its result, propagating
    /// the child's failure as this effect's own.
    pub fn join(&self) -> Effect<A, E> {
        let rx = self.result_rx.clone();
        make(move |_env: Env| {
            let mut rx = rx.clone();
            async move {
                loop {
                    if let Some(o) = rx.borrow().clone() {
                        return o;
                    }
                    if rx.changed().await.is_err() {
                        return Err(Failure::Aborted);
                    }
                }
            }
        })
    }

    /// Requests cancellation and waits for the fork to actually finish.
    pub fn abort(&self) -> Effect<(), std::convert::Infallible> {
        let cancel_token = self.cancel_token.clone();
        let await_eff = self.await_outcome();
        make(move |env: Env| {
            let cancel_token = cancel_token.clone();
            let await_eff = await_eff.clone();
            async move {
                cancel_token.cancel();
                match await_eff.run(env).await {
                    Ok(_outcome) => Ok(()),
                    Err(f) => Err(f),
                }
            }
        })
    }
}

fn spawn_and_watch<A, E>(effect: Effect<A, E>, env: Env, cancel_token: CancellationToken) -> tokio::sync::watch::Receiver<Option<Outcome<A, E>>>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let (tx, rx) = tokio::sync::watch::channel(None);
    let completion_token = cancel_token;
    tokio::spawn(async move {
        let outcome = effect.run(env).await;
        let _ = tx.send(Some(outcome));
        completion_token.cancel();
    });
    rx
}

/// Forks `effect` into a task whose cancellation is linked to the current
/// region: cancelling the parent cancels the child, but cancelling the
/// child (via the returned `Handle`) does not affect the parent.
pub fn fork<A, E>(effect: Effect<A, E>) -> Effect<Handle<A, E>, std::convert::Infallible>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    make(move |env: Env| {
        let effect = effect.clone();
        async move {
            let child_token = env.child_cancel_token();
            let child_env = env.with_cancel_token(child_token.clone()).with_interruptible(true);
            let rx = spawn_and_watch(effect, child_env, child_token.clone());
            Ok(Handle { result_rx: rx, cancel_token: child_token, is_root: false })
        }
    })
}

/// Forks `effect` with its own root cancellation scope, independent of the
/// caller's — the effect survives the caller's own region closing.
pub fn fork_daemon<A, E>(effect: Effect<A, E>) -> Effect<Handle<A, E>, std::convert::Infallible>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    make(move |env: Env| {
        let effect = effect.clone();
        async move {
            let root_token = CancellationToken::new();
            let child_env = env.with_cancel_token(root_token.clone()).with_interruptible(true);
            let rx = spawn_and_watch(effect, child_env, root_token.clone());
            Ok(Handle { result_rx: rx, cancel_token: root_token, is_root: true })
        }
    })
}

/// The true top-level entry point: forks `effect` with a fresh root `Env`
/// built from the default `RuntimeConfig`, outside of any existing effect
/// execution. Used to bridge from ordinary host code into the effect world,
/// mirroring `run_promise`/`run_sync` but handing back a `Handle` instead of
/// awaiting to completion.
pub fn run_fork<A, E>(effect: Effect<A, E>) -> Handle<A, E>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    run_fork_with(&RuntimeConfig::default(), effect)
}

/// Like `run_fork`, but against a root `Env` built from `config`.
pub fn run_fork_with<A, E>(config: &RuntimeConfig, effect: Effect<A, E>) -> Handle<A, E>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let root_token = CancellationToken::new();
    let env = config.build_env().with_cancel_token(root_token.clone()).with_interruptible(true);
    let rx = spawn_and_watch(effect, env, root_token.clone());
    Handle { result_rx: rx, cancel_token: root_token, is_root: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, never, succeed};
    use crate::run::run_promise;
    use std::time::Duration;

    #[tokio::test]
    async fn fork_and_join_round_trips() {
        crate::init_test_tracing();
        let e = crate::combinators::flat_map(fork(succeed::<i32, String>(5)), |h: Handle<i32, String>| h.join());
        assert_eq!(run_promise(e).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn abort_resolves_even_for_a_never_completing_fork() {
        let handle = run_fork(never::<i32, String>());
        tokio::time::sleep(Duration::from_millis(10)).await;
        run_promise(handle.abort()).await.unwrap();
        assert!(handle.unsafe_poll().unwrap().is_err());
    }

    #[tokio::test]
    async fn join_surfaces_child_failure() {
        let handle = run_fork(fail::<i32, String>("bad".into()));
        let err = run_promise(handle.join()).await.unwrap_err();
        assert_eq!(err.to_string(), "expected failure: \"bad\"");
    }
}
