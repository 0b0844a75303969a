//! `Effect<A, E>`: a suspended, re-runnable computation.
//!
//! An `Effect` is a function from `Env` to a boxed `Future` of an `Outcome`.
//! Rust's `async`/`await` already compiles to a non-recursive state machine,
//! so sequencing and generator-style code (see `gen.rs`) both reduce to
//! ordinary `async` blocks composed over this one type, rather than needing
//! a second execution model.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use crate::env::Env;
use crate::failure::{Failure, Outcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type RunFn<A, E> = dyn Fn(Env) -> BoxFuture<'static, Outcome<A, E>> + Send + Sync;

/// A description of a computation. Inert until `run`; cheap to clone (it's
/// an `Arc` underneath), and may be run any number of times — each run is
/// independent and observes the `Env` live at that call.
pub struct Effect<A, E> {
    run: Arc<RunFn<A, E>>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Effect { run: self.run.clone() }
    }
}

impl<A: Send + 'static, E: Send + 'static> Effect<A, E> {
    pub fn run(&self, env: Env) -> BoxFuture<'static, Outcome<A, E>> {
        (self.run)(env)
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Env) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<A, E>> + Send + 'static,
    {
        Effect { run: Arc::new(move |env| Box::pin(f(env))) }
    }
}

/// Builds an effect whose body is only ever invoked if the universal
/// preflight check passes: every effect constructed this way first asks
/// whether the current region is interruptible and already cancelled, and
/// if so delivers `Aborted` without calling `body` at all.
pub(crate) fn make<A, E, F, Fut>(body: F) -> Effect<A, E>
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<A, E>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    Effect::from_fn(move |env: Env| {
        let should_abort = env.interruptible() && env.is_cancelled();
        let fut = if should_abort { None } else { Some(body(env)) };
        async move {
            match fut {
                None => Err(Failure::Aborted),
                Some(fut) => fut.await,
            }
        }
    })
}

fn catch_panic<A>(f: impl FnOnce() -> A) -> Result<A, Arc<anyhow::Error>> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Arc::new(anyhow::anyhow!("panicked: {msg}"))
    })
}

/// An effect that always succeeds with `a`.
pub fn succeed<A: Clone + Send + 'static, E: Send + 'static>(a: A) -> Effect<A, E> {
    make(move |_env| {
        let a = a.clone();
        async move { Ok(a) }
    })
}

/// An effect that always fails with the expected error `e`.
pub fn fail<A: Send + 'static, E: Clone + Send + 'static>(e: E) -> Effect<A, E> {
    make(move |_env| {
        let e = e.clone();
        async move { Err(Failure::Expected(e)) }
    })
}

pub(crate) fn die_from_arc<A: Send + 'static, E: Send + 'static>(d: Arc<anyhow::Error>) -> Effect<A, E> {
    make(move |_env| {
        let d = d.clone();
        async move { Err(Failure::Unexpected(d)) }
    })
}

/// An effect that always dies with the defect `err`.
pub fn die<A: Send + 'static, E: Send + 'static>(err: impl Into<anyhow::Error>) -> Effect<A, E> {
    die_from_arc(Arc::new(err.into()))
}

/// Wraps a synchronous, possibly panicking, thunk. A panic is caught and
/// turned into `Unexpected`, matching the fallibility `sync` advertises.
pub fn sync<A: Send + 'static, E: Send + 'static>(
    thunk: impl Fn() -> A + Send + Sync + 'static,
) -> Effect<A, E> {
    make(move |_env| {
        let result = catch_panic(&thunk);
        async move {
            match result {
                Ok(a) => Ok(a),
                Err(d) => Err(Failure::Unexpected(d)),
            }
        }
    })
}

/// Defers construction of an effect until run, catching panics raised
/// while building it the same way `sync` does for its thunk.
pub fn suspend<A: Send + 'static, E: Send + 'static>(
    f: impl Fn() -> Effect<A, E> + Send + Sync + 'static,
) -> Effect<A, E> {
    make(move |env| {
        let built = catch_panic(&f);
        async move {
            match built {
                Ok(effect) => effect.run(env).await,
                Err(d) => Err(Failure::Unexpected(d)),
            }
        }
    })
}

pub fn from_option<A: Clone + Send + 'static, E: Clone + Send + 'static>(
    o: Option<A>,
    on_none: E,
) -> Effect<A, E> {
    match o {
        Some(a) => succeed(a),
        None => fail(on_none),
    }
}

pub fn from_result<A: Clone + Send + 'static, E: Clone + Send + 'static>(
    r: Result<A, E>,
) -> Effect<A, E> {
    match r {
        Ok(a) => succeed(a),
        Err(e) => fail(e),
    }
}

/// Reads a service of type `T` out of the current `Env`. Missing services
/// are a defect (a wiring mistake), not an expected failure.
pub fn service<T: Send + Sync + 'static, E: Send + 'static>() -> Effect<Arc<T>, E> {
    make(|env: Env| async move {
        match env.context().get::<T>() {
            Some(v) => Ok(v),
            None => Err(Failure::die(anyhow::anyhow!(
                "service `{}` not found in Env",
                std::any::type_name::<T>()
            ))),
        }
    })
}

pub fn with_service<T: Send + Sync + 'static, A: Send + 'static, E: Send + 'static>(
    effect: Effect<A, E>,
    value: Arc<T>,
) -> Effect<A, E> {
    make(move |env: Env| {
        let effect = effect.clone();
        let env = env.with_context(env.context().add(value.clone()));
        async move { effect.run(env).await }
    })
}

/// Resumes at most once; further calls are silently ignored. Shared via
/// clone so `register` can hand it to another task, a callback, or both a
/// success and an error path.
pub struct Resume<A, E> {
    tx: Arc<parking_lot::Mutex<Option<tokio::sync::oneshot::Sender<Outcome<A, E>>>>>,
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Resume { tx: self.tx.clone() }
    }
}

impl<A, E> Resume<A, E> {
    pub fn send(&self, outcome: Outcome<A, E>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Bridges a callback-based host API into the effect world. `register` is
/// invoked synchronously with a `Resume` handle and the token governing the
/// current interruptibility region; it may hand the `Resume` off to whatever
/// eventually produces a result. If cancellation arrives first, the optional
/// cleanup effect returned by `register` runs (uninterruptibly) and the
/// overall result is `Aborted`.
pub fn async_effect<A, E, F>(register: F) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    F: Fn(Resume<A, E>, tokio_util::sync::CancellationToken) -> Option<Effect<(), std::convert::Infallible>>
        + Send
        + Sync
        + 'static,
{
    make(move |env: Env| {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let resume = Resume { tx: Arc::new(parking_lot::Mutex::new(Some(tx))) };
        let cleanup = register(resume, env.cancel_token().clone());
        let cancel_token = env.cancel_token().clone();
        let cleanup_env = env.with_interruptible(false);
        async move {
            tokio::select! {
                res = rx => match res {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Failure::Aborted),
                },
                _ = cancel_token.cancelled() => {
                    if let Some(cleanup) = cleanup {
                        if let Err(f) = cleanup.run(cleanup_env).await {
                            tracing::warn!(failure = %f, "async_effect cleanup failed");
                        }
                    }
                    Err(Failure::Aborted)
                }
            }
        }
    })
}

/// Runs `fut_factory()` on the host executor and resumes with its output.
pub fn from_future<A, E, Fut, F>(fut_factory: F) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    Fut: Future<Output = A> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    async_effect(move |resume, _token| {
        let fut = fut_factory();
        tokio::spawn(async move {
            resume.send(Ok(fut.await));
        });
        None
    })
}

/// Like `from_future` but for a future whose own output is a `Result`;
/// `catch` maps the error side onto the effect's expected error type.
pub fn try_from_future<A, E, Err2, Fut, F, C>(fut_factory: F, catch: C) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    Err2: Send + 'static,
    Fut: Future<Output = Result<A, Err2>> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    C: Fn(Err2) -> E + Send + Sync + 'static,
{
    let catch = Arc::new(catch);
    async_effect(move |resume, _token| {
        let fut = fut_factory();
        let resume2 = resume.clone();
        let catch = catch.clone();
        tokio::spawn(async move {
            match fut.await {
                Ok(a) => resume2.send(Ok(a)),
                Err(e) => resume2.send(Err(Failure::Expected(catch(e)))),
            }
        });
        None
    })
}

pub fn yield_now<E: Send + 'static>() -> Effect<(), E> {
    make(|_env| async move {
        tokio::task::yield_now().await;
        Ok(())
    })
}

/// An effect that never completes on its own — only external cancellation
/// of the current region can resolve it.
pub fn never<A: Send + 'static, E: Send + 'static>() -> Effect<A, E> {
    async_effect(|_resume, _token| None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::run_promise;

    #[tokio::test]
    async fn succeed_delivers_value() {
        let e: Effect<i32, String> = succeed(5);
        assert_eq!(run_promise(e).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn fail_delivers_expected() {
        let e: Effect<i32, String> = fail("boom".to_string());
        let err = run_promise(e).await.unwrap_err();
        assert_eq!(err.to_string(), "expected failure: \"boom\"");
    }

    #[tokio::test]
    async fn sync_catches_panics() {
        let e: Effect<i32, String> = sync(|| panic!("nope"));
        assert!(run_promise(e).await.is_err());
    }

    #[tokio::test]
    async fn reusable_effect_runs_twice() {
        let e: Effect<i32, String> = succeed(9);
        assert_eq!(run_promise(e.clone()).await.unwrap(), 9);
        assert_eq!(run_promise(e).await.unwrap(), 9);
    }
}
