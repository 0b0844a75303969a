//! Racing effects against one another.
//!
//! Branches run concurrently on a `FuturesUnordered`, each under a child
//! cancellation token derived from the current one; deciding a winner cancels
//! that child token so losers wind down promptly.

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::effect::{make, BoxFuture, Effect};
use crate::env::Env;
use crate::failure::{Failure, Outcome};

fn child_env_and_token(env: &Env) -> (Env, tokio_util::sync::CancellationToken) {
    let token = env.child_cancel_token();
    (env.with_cancel_token(token.clone()), token)
}

fn spawn_branches<A, E>(effects: Vec<Effect<A, E>>, env: Env) -> FuturesUnordered<BoxFuture<'static, (usize, Outcome<A, E>)>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    effects
        .into_iter()
        .enumerate()
        .map(|(i, effect)| {
            let env = env.clone();
            Box::pin(async move { (i, effect.run(env).await) }) as BoxFuture<'static, (usize, Outcome<A, E>)>
        })
        .collect()
}

/// Runs every effect in `effects` concurrently; the first one to *succeed*
/// wins. Once a winner is recorded, the remaining branches are cancelled
/// via a child token and awaited to completion before the result is
/// delivered — a success landing after the winner is logged and dropped.
pub fn race_all<A, E>(effects: Vec<Effect<A, E>>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let effects = effects.clone();
        async move {
            let (child_env, child_token) = child_env_and_token(&env);
            let mut futs = spawn_branches(effects, child_env);

            let mut winner: Option<A> = None;
            let mut failures: Vec<(usize, Failure<E>)> = Vec::new();

            while let Some((i, outcome)) = futs.next().await {
                match outcome {
                    Ok(a) => {
                        if winner.is_none() {
                            winner = Some(a);
                            child_token.cancel();
                        } else {
                            tracing::debug!(branch = i, "race_all: dropping success recorded after a winner");
                        }
                    }
                    Err(f) => failures.push((i, f)),
                }
            }

            match winner {
                Some(a) => Ok(a),
                None => {
                    failures.sort_by_key(|(i, _)| *i);
                    Err(failures.into_iter().next().map(|(_, f)| f).unwrap_or(Failure::Aborted))
                }
            }
        }
    })
}

/// Like `race_all`, but the first outcome of *either* polarity wins —
/// success or failure, whichever settles first.
pub fn race_all_first<A, E>(effects: Vec<Effect<A, E>>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let effects = effects.clone();
        async move {
            let (child_env, child_token) = child_env_and_token(&env);
            let mut futs = spawn_branches(effects, child_env);

            let mut winner: Option<Outcome<A, E>> = None;
            while let Some((_, outcome)) = futs.next().await {
                if winner.is_none() {
                    winner = Some(outcome);
                    child_token.cancel();
                }
            }
            winner.unwrap_or(Err(Failure::Aborted))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{fail, never, succeed};
    use crate::run::run_promise;
    use crate::timing::delay;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn race_all_picks_the_success() {
        let fast = succeed::<i32, String>(1);
        let slow = delay(fail::<i32, String>("too slow".into()), Duration::from_secs(5));
        let e = race_all(vec![fast, slow]);
        assert_eq!(run_promise(e).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn race_all_fails_only_if_everyone_fails() {
        let a = fail::<i32, String>("a".into());
        let b = fail::<i32, String>("b".into());
        let e = race_all(vec![a, b]);
        assert!(run_promise(e).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn race_all_first_takes_whatever_settles_first() {
        let quick_failure = fail::<i32, String>("first".into());
        let e = race_all_first(vec![quick_failure, never()]);
        assert!(run_promise(e).await.is_err());
    }
}
