//! Concurrent and sequential iteration.
//!
//! A single `for_each` that either collects results or discards them based on
//! a runtime flag can't be expressed as one function signature in Rust, so
//! this splits into two monomorphic entry points: `for_each` (collects
//! results) and `for_each_discard` (returns `()`).

use std::num::NonZeroUsize;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::combinators::map;
use crate::effect::{make, BoxFuture, Effect};
use crate::env::{Concurrency, Env};
use crate::failure::{Failure, Outcome};

/// The fan-out width requested for one `for_each` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForEachConcurrency {
    /// Use whatever `Env::concurrency` is currently in effect.
    Inherit,
    Unbounded,
    Bounded(NonZeroUsize),
}

impl ForEachConcurrency {
    fn resolve(self, env: &Env) -> Concurrency {
        match self {
            ForEachConcurrency::Inherit => env.concurrency(),
            ForEachConcurrency::Unbounded => Concurrency::Unbounded,
            ForEachConcurrency::Bounded(n) => Concurrency::Bounded(n),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForEachOptions {
    pub concurrency: ForEachConcurrency,
}

impl Default for ForEachOptions {
    fn default() -> Self {
        Self { concurrency: ForEachConcurrency::Inherit }
    }
}

/// Runs `f` over every item in `items`, honoring `opts.concurrency`, and
/// collects the results in input order. The first failure cancels every
/// still-running branch (via a child token) and is awaited out before being
/// returned; results already in flight are allowed to land first.
pub fn for_each<A, B, E>(
    items: Vec<A>,
    f: impl Fn(A) -> Effect<B, E> + Clone + Send + Sync + 'static,
    opts: ForEachOptions,
) -> Effect<Vec<B>, E>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let items = items.clone();
        let f = f.clone();
        async move {
            match opts.concurrency.resolve(&env) {
                Concurrency::Bounded(n) if n.get() == 1 => run_sequential(items, f, env).await,
                other => run_concurrent(items, f, env, other).await,
            }
        }
    })
}

/// `for_each`, discarding the collected results.
pub fn for_each_discard<A, B, E>(
    items: Vec<A>,
    f: impl Fn(A) -> Effect<B, E> + Clone + Send + Sync + 'static,
    opts: ForEachOptions,
) -> Effect<(), E>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    map(for_each(items, f, opts), |_| ())
}

async fn run_sequential<A, B, E>(
    items: Vec<A>,
    f: impl Fn(A) -> Effect<B, E>,
    env: Env,
) -> Outcome<Vec<B>, E>
where
    B: Send + 'static,
    E: Send + 'static,
{
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match f(item).run(env.clone()).await {
            Ok(b) => out.push(b),
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

async fn run_concurrent<A, B, E>(
    items: Vec<A>,
    f: impl Fn(A) -> Effect<B, E>,
    env: Env,
    concurrency: Concurrency,
) -> Outcome<Vec<B>, E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    let child_token = env.child_cancel_token();
    let child_env = env.with_cancel_token(child_token.clone());
    let limit = match concurrency {
        Concurrency::Unbounded => usize::MAX,
        Concurrency::Bounded(n) => n.get(),
    };

    let total = items.len();
    let mut results: Vec<Option<B>> = (0..total).map(|_| None).collect();
    let mut pending: FuturesUnordered<BoxFuture<'static, (usize, Outcome<B, E>)>> = FuturesUnordered::new();
    let mut iter = items.into_iter().enumerate();
    let mut failure: Option<Failure<E>> = None;

    let mut spawn_next = |iter: &mut std::iter::Enumerate<std::vec::IntoIter<A>>,
                           pending: &mut FuturesUnordered<BoxFuture<'static, (usize, Outcome<B, E>)>>| {
        if let Some((idx, item)) = iter.next() {
            let fut = f(item).run(child_env.clone());
            pending.push(Box::pin(async move { (idx, fut.await) }));
        }
    };

    for _ in 0..limit.min(total) {
        spawn_next(&mut iter, &mut pending);
    }

    while let Some((idx, outcome)) = pending.next().await {
        match outcome {
            Ok(b) => {
                results[idx] = Some(b);
                if failure.is_none() {
                    spawn_next(&mut iter, &mut pending);
                }
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                    child_token.cancel();
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(results.into_iter().map(|o| o.expect("for_each: missing result for a completed item")).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, succeed};
    use crate::run::run_promise;

    #[tokio::test]
    async fn sequential_preserves_order() {
        let items = vec![1, 2, 3];
        let e = for_each(
            items,
            |x: i32| succeed::<i32, String>(x * 2),
            ForEachOptions { concurrency: ForEachConcurrency::Bounded(NonZeroUsize::new(1).unwrap()) },
        );
        assert_eq!(run_promise(e).await.unwrap(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn unbounded_preserves_order_despite_concurrency() {
        let items = vec![1, 2, 3, 4, 5];
        let e = for_each(
            items,
            |x: i32| succeed::<i32, String>(x * x),
            ForEachOptions { concurrency: ForEachConcurrency::Unbounded },
        );
        assert_eq!(run_promise(e).await.unwrap(), vec![1, 4, 9, 16, 25]);
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let items = vec![1, 2, 3];
        let e = for_each(
            items,
            |x: i32| if x == 2 { fail::<i32, String>("bad".into()) } else { succeed(x) },
            ForEachOptions::default(),
        );
        assert!(run_promise(e).await.is_err());
    }

    #[tokio::test]
    async fn discard_drops_the_collected_values() {
        let items = vec![1, 2, 3];
        let e = for_each_discard(items, |x: i32| succeed::<i32, String>(x), ForEachOptions::default());
        assert_eq!(run_promise(e).await.unwrap(), ());
    }
}
