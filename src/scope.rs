//! Scopes: finalizer registration and resource acquire/release.
//!
//! A shared, mutex-guarded state machine that flips from open to closed
//! exactly once and runs registered cleanup on the way: a single `Scope`
//! with an `Open(Vec<(id, Finalizer)>)` / `Closed(ScopeExit)` state. The id
//! lets a child scope deregister its own finalizer from a parent it has
//! already outlived.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::combinators::{as_result, retag};
use crate::effect::{make, succeed, Effect};
use crate::env::Env;
use crate::failure::{Failure, Outcome};
use crate::interrupt::{uninterruptible, uninterruptible_mask};

/// A type-erased summary of how a scope's owning effect finished, handed to
/// finalizers so they can decide how to clean up without needing to know
/// the owner's concrete `A`/`E`.
#[derive(Clone, Debug)]
pub enum ScopeExit {
    Success,
    Expected(String),
    Unexpected(Arc<anyhow::Error>),
    Aborted,
}

impl ScopeExit {
    pub fn from_outcome<A, E: std::fmt::Debug>(outcome: &Outcome<A, E>) -> Self {
        match outcome {
            Ok(_) => ScopeExit::Success,
            Err(Failure::Expected(e)) => ScopeExit::Expected(format!("{e:?}")),
            Err(Failure::Unexpected(d)) => ScopeExit::Unexpected(d.clone()),
            Err(Failure::Aborted) => ScopeExit::Aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScopeExit::Success)
    }
}

type Finalizer = Arc<dyn Fn(&ScopeExit) -> Effect<(), std::convert::Infallible> + Send + Sync>;

enum ScopeState {
    Open(Vec<(u64, Finalizer)>),
    Closed(ScopeExit),
}

/// A registry of finalizers that runs them, most-recently-added first, the
/// moment it closes. Closing twice is a no-op — the second `close` observes
/// `Closed` and returns immediately.
pub struct Scope {
    state: Mutex<ScopeState>,
    next_id: std::sync::atomic::AtomicU64,
    parent_link: Mutex<Option<(Arc<Scope>, u64)>>,
}

impl Scope {
    pub fn new() -> Arc<Scope> {
        Arc::new(Scope {
            state: Mutex::new(ScopeState::Open(Vec::new())),
            next_id: std::sync::atomic::AtomicU64::new(0),
            parent_link: Mutex::new(None),
        })
    }

    fn register(&self, fin: Finalizer) -> Result<u64, ScopeExit> {
        let mut guard = self.state.lock();
        match &mut *guard {
            ScopeState::Open(fs) => {
                let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                fs.push((id, fin));
                Ok(id)
            }
            ScopeState::Closed(exit) => Err(exit.clone()),
        }
    }

    /// Removes a previously registered finalizer, if the scope is still
    /// open and that finalizer hasn't already run. A no-op otherwise.
    fn deregister(&self, id: u64) {
        let mut guard = self.state.lock();
        if let ScopeState::Open(fs) = &mut *guard {
            fs.retain(|(fid, _)| *fid != id);
        }
    }

    /// Registers `fin` to run when the scope closes. If the scope is
    /// already closed, `fin` runs immediately against the recorded exit.
    pub fn add_finalizer(
        self: &Arc<Self>,
        fin: impl Fn(&ScopeExit) -> Effect<(), std::convert::Infallible> + Send + Sync + 'static,
    ) -> Effect<(), std::convert::Infallible> {
        let fin: Finalizer = Arc::new(fin);
        let scope = self.clone();
        make(move |env: Env| {
            let fin = fin.clone();
            let result = scope.register(fin.clone());
            async move {
                match result {
                    Ok(_id) => Ok(()),
                    Err(exit) => fin(&exit).run(env).await,
                }
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), ScopeState::Closed(_))
    }

    /// Closes the scope, running every registered finalizer (most recently
    /// added first) against `exit`. The first finalizer failure is what's
    /// returned; the rest are logged and swallowed. If this scope was
    /// created with `fork_child`, it also deregisters itself from its
    /// parent so the parent doesn't keep a cleanup finalizer around for a
    /// child that has already wound itself down.
    pub async fn close(&self, env: &Env, exit: ScopeExit) -> Outcome<(), std::convert::Infallible> {
        let finalizers = {
            let mut guard = self.state.lock();
            if matches!(&*guard, ScopeState::Closed(_)) {
                None
            } else {
                let prior = std::mem::replace(&mut *guard, ScopeState::Closed(exit.clone()));
                match prior {
                    ScopeState::Open(fs) => Some(fs),
                    ScopeState::Closed(_) => unreachable!(),
                }
            }
        };

        let mut fs = match finalizers {
            None => return Ok(()),
            Some(fs) => fs,
        };
        fs.reverse();

        let mut first_failure = None;
        for (_, fin) in fs {
            if let Err(f) = fin(&exit).run(env.clone()).await {
                if first_failure.is_none() {
                    first_failure = Some(f);
                } else {
                    tracing::warn!(%f, "scope finalizer failed after an earlier one already did");
                }
            }
        }

        if let Some((parent, id)) = self.parent_link.lock().take() {
            parent.deregister(id);
        }

        match first_failure {
            None => Ok(()),
            Some(f) => Err(f),
        }
    }

    /// Creates a scope nested under `self`: closing `self` closes the child
    /// too. If `self` is already closed, the child inherits the closed
    /// state immediately. If the child closes on its own first, it
    /// deregisters itself from `self` rather than leaving a dangling
    /// cleanup finalizer behind.
    pub fn fork_child(self: &Arc<Self>) -> Arc<Scope> {
        let child = Scope::new();
        let child_for_finalizer = child.clone();
        let fin: Finalizer = Arc::new(move |_parent_exit: &ScopeExit| {
            let child = child_for_finalizer.clone();
            make(move |env: Env| {
                let child = child.clone();
                async move { child.close(&env, ScopeExit::Aborted).await }
            })
        });
        match self.register(fin) {
            Ok(id) => *child.parent_link.lock() = Some((self.clone(), id)),
            Err(exit) => *child.state.lock() = ScopeState::Closed(exit),
        }
        child
    }
}

fn env_with_scope(env: &Env, scope: &Arc<Scope>) -> Env {
    env.with_context(env.context().add(scope.clone()))
}

/// Opens a fresh scope for `effect`, supplying it via the `Env`'s service
/// map, and closes it with an exit derived from `effect`'s own outcome once
/// it completes.
pub fn scoped<A, E>(effect: Effect<A, E>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static + std::fmt::Debug,
{
    make(move |env: Env| {
        let effect = effect.clone();
        async move {
            let scope = Scope::new();
            let child_env = env_with_scope(&env, &scope);
            let outcome = effect.run(child_env.clone()).await;
            let exit = ScopeExit::from_outcome(&outcome);
            if let Err(f) = scope.close(&child_env, exit).await {
                tracing::warn!(%f, "scope close reported a finalizer failure");
            }
            outcome
        }
    })
}

/// Acquires `acquire` uninterruptibly, registering `release` with the
/// current scope (taken from the `Env`'s service map — must be run inside
/// `scoped`). `release` is always run, regardless of how the scope ends.
pub fn acquire_release<A, E>(
    acquire: Effect<A, E>,
    release: impl Fn(&A, &ScopeExit) -> Effect<(), std::convert::Infallible> + Send + Sync + 'static,
) -> Effect<A, E>
where
    A: Clone + Send + 'static,
    E: Send + 'static,
{
    let release = Arc::new(release);
    crate::combinators::flat_map(uninterruptible(acquire), move |a: A| {
        let release = release.clone();
        let a_for_release = a.clone();
        make(move |env: Env| {
            let a_for_release = a_for_release.clone();
            let release = release.clone();
            let a_ret = a.clone();
            async move {
                match env.context().get::<Scope>() {
                    Some(scope) => {
                        let fin_effect = scope.add_finalizer(move |exit| release(&a_for_release, exit));
                        match fin_effect.run(env).await {
                            Ok(()) => Ok(a_ret),
                            Err(f) => retag(Err(f)),
                        }
                    }
                    None => Err(Failure::die(anyhow::anyhow!("acquire_release used outside of `scoped`"))),
                }
            }
        })
    })
}

/// Acquires a resource, uses it, and releases it — the release observing
/// the outcome of the use step. The whole acquire step is uninterruptible;
/// `use_fn` runs with whatever interruptibility was ambient before the
/// uninterruptible mask was entered.
pub fn acquire_use_release<A, B, E>(
    acquire: Effect<A, E>,
    use_fn: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    release: impl Fn(&A, &Outcome<B, E>) -> Effect<(), std::convert::Infallible> + Send + Sync + 'static,
) -> Effect<B, E>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    let use_fn = Arc::new(use_fn);
    let release = Arc::new(release);
    uninterruptible_mask(move |restore| {
        let use_fn = use_fn.clone();
        let release = release.clone();
        let acquire = acquire.clone();
        crate::combinators::flat_map(acquire, move |a: A| {
            let use_fn = use_fn.clone();
            let release = release.clone();
            let restore = restore;
            let a_for_release = a.clone();
            let used = restore.apply(use_fn(a));
            crate::combinators::flat_map(as_result(used), move |r| {
                let release_effect = release(&a_for_release, &r);
                crate::combinators::flat_map(release_effect, move |_| from_outcome(r))
            })
        })
    })
}

/// Runs `f` once `effect` completes, observing the full outcome. `f`'s own
/// failure only surfaces if `effect` itself succeeded; if `effect` failed,
/// that original failure wins.
pub fn on_result<A, E>(
    effect: Effect<A, E>,
    f: impl Fn(&Outcome<A, E>) -> Effect<(), std::convert::Infallible> + Send + Sync + 'static,
) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let f = Arc::new(f);
    make(move |env: Env| {
        let effect = effect.clone();
        let f = f.clone();
        async move {
            let outcome = effect.run(env.clone()).await;
            let observer_result = f(&outcome).run(env).await;
            match (outcome, observer_result) {
                (Ok(a), Ok(())) => Ok(a),
                (Ok(_), Err(f)) => Err(crate::failure::retag_infallible(f)),
                (Err(e), _) => Err(e),
            }
        }
    })
}

/// `on_result` filtered to cancellation: `f` runs only when `effect` is
/// aborted.
pub fn on_interrupt<A, E>(effect: Effect<A, E>, f: impl Fn() -> Effect<(), std::convert::Infallible> + Send + Sync + 'static) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let f = Arc::new(f);
    on_result(effect, move |outcome| {
        if matches!(outcome, Err(Failure::Aborted)) {
            f()
        } else {
            succeed(())
        }
    })
}

/// Reifies an already-computed `Outcome` as a one-shot effect: run exactly
/// once per `from_outcome` call (a second run is a defect), avoiding a
/// `Clone` bound on `A`/`E` that would otherwise leak out of `Scope`'s
/// internal plumbing.
fn from_outcome<A, E>(outcome: Outcome<A, E>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let cell = Arc::new(Mutex::new(Some(outcome)));
    make(move |_env: Env| {
        let cell = cell.clone();
        async move {
            cell.lock()
                .take()
                .unwrap_or_else(|| Err(Failure::die(anyhow::anyhow!("from_outcome effect run more than once"))))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, succeed};
    use crate::run::run_promise;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn acquire_release_runs_release_on_success() {
        crate::init_test_tracing();
        let released = Arc::new(AtomicBool::new(false));
        let released2 = released.clone();
        let e = scoped(crate::combinators::flat_map(
            acquire_release(succeed::<i32, String>(1), move |_a, _exit| {
                released2.store(true, Ordering::SeqCst);
                succeed(())
            }),
            |a| succeed::<i32, String>(a + 1),
        ));
        assert_eq!(run_promise(e).await.unwrap(), 2);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn acquire_release_runs_release_on_failure() {
        let released = Arc::new(AtomicBool::new(false));
        let released2 = released.clone();
        let e: Effect<i32, String> = scoped(crate::combinators::and_then_effect(
            acquire_release(succeed::<i32, String>(1), move |_a, _exit| {
                released2.store(true, Ordering::SeqCst);
                succeed(())
            }),
            fail("boom".into()),
        ));
        assert!(run_promise(e).await.is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn acquire_use_release_observes_use_outcome() {
        let seen_ok = Arc::new(AtomicBool::new(false));
        let seen_ok2 = seen_ok.clone();
        let e = acquire_use_release(
            succeed::<i32, String>(5),
            |a| succeed::<i32, String>(a * 2),
            move |_a, r| {
                seen_ok2.store(r.is_ok(), Ordering::SeqCst);
                succeed(())
            },
        );
        assert_eq!(run_promise(e).await.unwrap(), 10);
        assert!(seen_ok.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fork_child_inherits_an_already_closed_parent() {
        let parent = Scope::new();
        let env = Env::new();
        parent.close(&env, ScopeExit::Success).await.unwrap();
        let child = parent.fork_child();
        assert!(child.is_closed());
    }

    #[tokio::test]
    async fn closing_the_parent_closes_the_child() {
        let parent = Scope::new();
        let child = parent.fork_child();
        let env = Env::new();
        assert!(!child.is_closed());
        parent.close(&env, ScopeExit::Success).await.unwrap();
        assert!(child.is_closed());
        assert_matches!(&*child.state.lock(), ScopeState::Closed(ScopeExit::Aborted));
    }

    #[tokio::test]
    async fn child_closing_first_deregisters_from_the_parent() {
        let parent = Scope::new();
        let child = parent.fork_child();
        let env = Env::new();
        child.close(&env, ScopeExit::Success).await.unwrap();
        match &*parent.state.lock() {
            ScopeState::Open(fs) => assert!(fs.is_empty()),
            ScopeState::Closed(_) => panic!("parent should still be open"),
        }
        // Closing the parent afterwards must not try to re-close the child
        // through a stale finalizer.
        parent.close(&env, ScopeExit::Success).await.unwrap();
        assert_matches!(&*child.state.lock(), ScopeState::Closed(ScopeExit::Success));
    }
}
