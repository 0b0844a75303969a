//! Sequencing and error-recovery combinators over `Effect`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::effect::{die_from_arc, make, succeed, Effect};
use crate::env::Env;
use crate::failure::{retag_infallible, Failure, NonExpected, Outcome};

fn catch_panic<A>(f: impl FnOnce() -> A) -> Result<A, Arc<anyhow::Error>> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| Arc::new(anyhow::anyhow!("panicked in combinator callback")))
}

/// Transforms a success value. A panic inside `f` is a defect, consistent
/// with every other callback boundary in this crate.
pub fn map<A, B, E>(effect: Effect<A, E>, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B, E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    let f = Arc::new(f);
    make(move |env: Env| {
        let effect = effect.clone();
        let f = f.clone();
        let fut = effect.run(env);
        async move {
            match fut.await {
                Ok(a) => match catch_panic(|| f(a)) {
                    Ok(b) => Ok(b),
                    Err(d) => Err(Failure::Unexpected(d)),
                },
                Err(e) => Err(e),
            }
        }
    })
}

/// Sequences `effect` into an effect built from its success value.
pub fn flat_map<A, B, E>(
    effect: Effect<A, E>,
    f: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
) -> Effect<B, E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    let f = Arc::new(f);
    make(move |env: Env| {
        let effect = effect.clone();
        let env2 = env.clone();
        let f = f.clone();
        async move {
            match effect.run(env).await {
                Ok(a) => match catch_panic(|| f(a)) {
                    Ok(next) => next.run(env2).await,
                    Err(d) => Err(Failure::Unexpected(d)),
                },
                Err(e) => Err(e),
            }
        }
    })
}

/// Runs `next` after `effect`, discarding `effect`'s success value.
pub fn and_then_effect<A, B, E>(effect: Effect<A, E>, next: Effect<B, E>) -> Effect<B, E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    flat_map(effect, move |_| next.clone())
}

/// Runs `effect` then succeeds with the fixed `value`, discarding the
/// original success.
pub fn and_then_val<A, B, E>(effect: Effect<A, E>, value: B) -> Effect<B, E>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    E: Send + 'static,
{
    map(effect, move |_| value.clone())
}

/// Runs `f` for its side effect, keeping `effect`'s own success value
/// unless `f` itself fails.
pub fn tap<A, E>(
    effect: Effect<A, E>,
    f: impl Fn(&A) -> Effect<(), E> + Send + Sync + 'static,
) -> Effect<A, E>
where
    A: Clone + Send + 'static,
    E: Send + 'static,
{
    flat_map(effect, move |a| {
        let side = f(&a);
        and_then_val(side, a)
    })
}

/// Reifies `effect`'s result as a value: the returned effect itself never
/// fails with `Expected` (its failure type is `Infallible`), surfacing the
/// original success-or-failure as data.
pub fn as_result<A, E>(effect: Effect<A, E>) -> Effect<Outcome<A, E>, std::convert::Infallible>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let effect = effect.clone();
        async move { Ok(effect.run(env).await) }
    })
}

/// Wraps a failure known not to be `Expected` back into an effect, without
/// needing `E2: Clone`.
pub(crate) fn from_non_expected<B: Send + 'static, E2: Send + 'static>(ne: NonExpected) -> Effect<B, E2> {
    match ne {
        NonExpected::Unexpected(d) => die_from_arc(d),
        NonExpected::Aborted => make(|_env| async move { Err(Failure::Aborted) }),
    }
}

/// Full pattern match over `effect`'s result.
pub fn match_failure<A, E, B, E2>(
    effect: Effect<A, E>,
    on_failure: impl Fn(Failure<E>) -> Effect<B, E2> + Send + Sync + 'static,
    on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
) -> Effect<B, E2>
where
    A: Send + 'static,
    E: Send + 'static,
    B: Send + 'static,
    E2: Send + 'static,
{
    let on_failure = Arc::new(on_failure);
    let on_success = Arc::new(on_success);
    make(move |env: Env| {
        let effect = effect.clone();
        let env2 = env.clone();
        let on_failure = on_failure.clone();
        let on_success = on_success.clone();
        async move {
            match effect.run(env).await {
                Ok(a) => match catch_panic(|| on_success(a)) {
                    Ok(next) => next.run(env2).await,
                    Err(d) => Err(Failure::Unexpected(d)),
                },
                Err(f) => match catch_panic(|| on_failure(f)) {
                    Ok(next) => next.run(env2).await,
                    Err(d) => Err(Failure::Unexpected(d)),
                },
            }
        }
    })
}

/// Like `match_failure`, but only intercepts `Expected` failures; defects
/// and cancellation pass straight through.
pub fn match_effect<A, E, B, E2>(
    effect: Effect<A, E>,
    on_expected: impl Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
    on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
) -> Effect<B, E2>
where
    A: Send + 'static,
    E: Send + 'static,
    B: Send + 'static,
    E2: Send + 'static,
{
    match_failure(
        effect,
        move |f| match f.split() {
            Ok(e) => on_expected(e),
            Err(ne) => from_non_expected(ne),
        },
        on_success,
    )
}

/// Recovers from any failure (including defects and cancellation).
pub fn catch_all_failure<A, E, E2>(
    effect: Effect<A, E>,
    f: impl Fn(Failure<E>) -> Effect<A, E2> + Send + Sync + 'static,
) -> Effect<A, E2>
where
    A: Clone + Send + 'static,
    E: Send + 'static,
    E2: Send + 'static,
{
    match_failure(effect, f, succeed)
}

/// Recovers from `Expected` failures only.
pub fn catch_all<A, E, E2>(
    effect: Effect<A, E>,
    f: impl Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
) -> Effect<A, E2>
where
    A: Clone + Send + 'static,
    E: Send + 'static,
    E2: Send + 'static,
{
    match_effect(effect, f, succeed)
}

/// Promotes every failure to a defect: the result can no longer fail with
/// `Expected` (`E2 = Infallible`), but can still be `Unexpected` or `Aborted`.
pub fn or_die<A, E>(effect: Effect<A, E>) -> Effect<A, std::convert::Infallible>
where
    A: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    catch_all(effect, |e| die_from_arc(Arc::new(anyhow::Error::new(e))))
}

/// Recovers from `Expected` failures by substituting a synchronously
/// computed fallback value.
pub fn or_else_succeed<A, E>(
    effect: Effect<A, E>,
    thunk: impl Fn() -> A + Send + Sync + 'static,
) -> Effect<A, std::convert::Infallible>
where
    A: Clone + Send + 'static,
    E: Send + 'static,
{
    let thunk = Arc::new(thunk);
    catch_all(effect, move |_| {
        let thunk = thunk.clone();
        crate::effect::sync(move || thunk())
    })
}

/// Discards both the success value and any `Expected` failure; defects still
/// propagate (rethrown via `die`), since those represent bugs rather than
/// recoverable conditions this caller is choosing to ignore.
pub fn ignore<A, E>(effect: Effect<A, E>) -> Effect<(), std::convert::Infallible>
where
    A: Send + 'static,
    E: Send + 'static,
{
    match_failure(
        effect,
        |f| match f {
            Failure::Unexpected(d) => die_from_arc(d),
            _ => succeed(()),
        },
        |_| succeed(()),
    )
}

/// Converts an `Infallible`-failing effect's result back into a caller's own
/// failure type, used where internal plumbing (finalizers, `Scope::close`)
/// hands back a result that structurally cannot be `Expected`.
pub(crate) fn retag<A: Send + 'static, E: Send + 'static>(
    outcome: Outcome<A, std::convert::Infallible>,
) -> Outcome<A, E> {
    outcome.map_err(retag_infallible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, succeed};
    use crate::run::run_promise;

    #[tokio::test]
    async fn map_transforms_success() {
        let e = map(succeed::<i32, String>(2), |x| x * 10);
        assert_eq!(run_promise(e).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn flat_map_sequences() {
        let e = flat_map(succeed::<i32, String>(2), |x| succeed(x + 1));
        assert_eq!(run_promise(e).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn catch_all_recovers() {
        let e = catch_all(fail::<i32, String>("boom".into()), |_| succeed(0));
        assert_eq!(run_promise(e).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ignore_swallows_expected() {
        let e = ignore(fail::<i32, String>("boom".into()));
        assert!(run_promise(e).await.is_ok());
    }

    #[tokio::test]
    async fn ignore_rethrows_defects() {
        let e = ignore(crate::effect::die::<i32, String>(anyhow::anyhow!("kaboom")));
        assert!(run_promise(e).await.is_err());
    }
}
