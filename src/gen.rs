//! Generator-style sequencing.
//!
//! `gen` is sugar over a native `async` block: `GenCtx` just re-exposes
//! `Effect::run` as an awaitable, so `?` on its `Outcome<A, E>` short-circuits
//! the way a hand-rolled generator loop would, and the heap-allocated async
//! state machine Rust already builds means looping thousands of times never
//! touches the call stack.

use std::future::Future;
use std::marker::PhantomData;

use crate::effect::{make, Effect};
use crate::env::Env;
use crate::failure::Outcome;

pub struct GenCtx<E> {
    env: Env,
    _marker: PhantomData<E>,
}

impl<E: Send + 'static> GenCtx<E> {
    /// Runs `effect` against the generator's ambient `Env`. The returned
    /// `Outcome` is plain data — use `?` to propagate a failure as the
    /// generator's own result.
    pub async fn yield_effect<A: Send + 'static>(&self, effect: Effect<A, E>) -> Outcome<A, E> {
        effect.run(self.env.clone()).await
    }
}

/// Builds an effect from a generator body. The body receives a `GenCtx` and
/// returns a future producing the generator's `Outcome`; `gen` itself is
/// just `make` plus handing the body its own `Env`.
pub fn gen<A, E, F, Fut>(f: F) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    F: Fn(GenCtx<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<A, E>> + Send + 'static,
{
    make(move |env: Env| {
        let ctx = GenCtx { env, _marker: PhantomData };
        f(ctx)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, succeed};
    use crate::run::run_promise;

    #[tokio::test]
    async fn gen_sequences_with_question_mark() {
        let e = gen(|ctx: GenCtx<String>| async move {
            let a = ctx.yield_effect(succeed(1)).await?;
            let b = ctx.yield_effect(succeed(2)).await?;
            Ok(a + b)
        });
        assert_eq!(run_promise(e).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn gen_short_circuits_on_failure() {
        let e = gen(|ctx: GenCtx<String>| async move {
            ctx.yield_effect(fail::<i32, String>("nope".into())).await?;
            unreachable!("should have short-circuited");
        });
        assert!(run_promise(e).await.is_err());
    }

    #[tokio::test]
    async fn gen_loops_ten_thousand_times_without_overflow() {
        let e = gen(|ctx: GenCtx<String>| async move {
            let mut total = 0i64;
            for _ in 0..10_000 {
                total += ctx.yield_effect(succeed(1i64)).await?;
            }
            Ok(total)
        });
        assert_eq!(run_promise(e).await.unwrap(), 10_000);
    }
}
