//! Delays and timeouts.

use std::time::Duration;

use crate::combinators::and_then_effect;
use crate::effect::{async_effect, fail, sync, Effect};
use crate::race::race_all_first;

/// Resolves after `duration`, unless the current region is cancelled first
/// (in which case the pending timer task is aborted by the cleanup effect
/// `async_effect` runs on its behalf).
pub fn sleep<E: Send + 'static>(duration: Duration) -> Effect<(), E> {
    async_effect(move |resume, _token| {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            resume.send(Ok(()));
        });
        Some(sync(move || {
            handle.abort();
        }))
    })
}

/// Runs `effect` only after `duration` has elapsed.
pub fn delay<A, E>(effect: Effect<A, E>, duration: Duration) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    and_then_effect(sleep(duration), effect)
}

/// Races `effect` against `duration`; if the timer wins, `effect` is
/// cancelled and `on_timeout` is run in its place.
pub fn timeout_or_else<A, E>(effect: Effect<A, E>, duration: Duration, on_timeout: Effect<A, E>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    race_all_first(vec![effect, and_then_effect(sleep(duration), on_timeout)])
}

/// Races `effect` against `duration`, failing with `on_timeout()` if the
/// timer wins. `on_timeout` is only invoked once the timer has actually
/// fired, not eagerly at construction.
pub fn timeout<A, E>(
    effect: Effect<A, E>,
    duration: Duration,
    on_timeout: impl Fn() -> E + Send + Sync + 'static,
) -> Effect<A, E>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    let fallback = and_then_effect(sleep(duration), crate::effect::suspend(move || fail(on_timeout())));
    timeout_or_else(effect, duration, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{never, succeed};
    use crate::run::run_promise;

    #[tokio::test(start_paused = true)]
    async fn sleep_resolves_after_duration() {
        let start = tokio::time::Instant::now();
        run_promise(sleep::<String>(Duration::from_secs(1))).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_when_effect_is_slow() {
        let e: crate::effect::Effect<i32, String> =
            timeout(never(), Duration::from_secs(1), || "timed out".to_string());
        let err = run_promise(e).await.unwrap_err();
        assert_eq!(err.to_string(), "expected failure: \"timed out\"");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_does_not_fire_when_effect_is_fast() {
        let e = timeout(succeed::<i32, String>(5), Duration::from_secs(10), || "timed out".to_string());
        assert_eq!(run_promise(e).await.unwrap(), 5);
    }
}
