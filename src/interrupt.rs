//! Interruptibility regions.
//!
//! `tokio_util::sync::CancellationToken` unifies a cancellation controller
//! and its signal into one handle, but `uninterruptible` still has to swap
//! in a fresh one so the masked effect stops observing the ambient signal
//! entirely. That fresh token would orphan anything nested inside that
//! later re-enters via plain `interruptible`, so `uninterruptible` stashes
//! the token it suppressed in the service map for `interruptible` to hand
//! back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::effect::{make, Effect};
use crate::env::Env;

struct SuppressedToken(CancellationToken);

/// Runs `effect` in a fresh, unlinked interruptibility region: external
/// cancellation of the enclosing region no longer reaches it.
pub fn uninterruptible<A, E>(effect: Effect<A, E>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let effect = effect.clone();
        let context = env
            .context()
            .add(Arc::new(SuppressedToken(env.cancel_token().clone())));
        let inner_env = env
            .with_cancel_token(CancellationToken::new())
            .with_interruptible(false)
            .with_context(context);
        async move { effect.run(inner_env).await }
    })
}

/// Re-enables interruptibility for `effect`. If this sits directly inside
/// `uninterruptible`, the parent's own token — the one `uninterruptible`
/// captured from the `Env` at the point it was applied — is restored,
/// rather than leaving `effect` watching the orphaned replacement token
/// forever.
pub fn interruptible<A, E>(effect: Effect<A, E>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let effect = effect.clone();
        let inner_env = match env.context().get::<SuppressedToken>() {
            Some(suppressed) => env.with_cancel_token(suppressed.0.clone()).with_interruptible(true),
            None => env.with_interruptible(true),
        };
        async move { effect.run(inner_env).await }
    })
}

/// Whether to re-wrap a nested effect in `interruptible` (if the mask
/// entered an uninterruptible region) or leave it untouched (if it was
/// already uninterruptible). Handed to the body of `uninterruptible_mask`.
#[derive(Clone, Copy)]
pub struct Restore(bool);

impl Restore {
    pub fn apply<A: Send + 'static, E: Send + 'static>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        if self.0 {
            interruptible(effect)
        } else {
            effect
        }
    }
}

/// Enters an uninterruptible region (unless already in one) and hands the
/// body a `Restore` it can use to carve out interruptible windows inside.
pub fn uninterruptible_mask<A, E>(
    f: impl Fn(Restore) -> Effect<A, E> + Send + Sync + 'static,
) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    make(move |env: Env| {
        let restore = Restore(env.interruptible());
        let inner = f(restore);
        let inner_env = env.with_interruptible(false);
        async move { inner.run(inner_env).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::succeed;
    use crate::run::run_promise;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn uninterruptible_runs_to_completion() {
        let e: crate::effect::Effect<i32, String> = uninterruptible(succeed(1));
        assert_eq!(run_promise(e).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mask_restore_is_identity_when_already_uninterruptible() {
        let e: crate::effect::Effect<i32, String> =
            uninterruptible(uninterruptible_mask(|restore| restore.apply(succeed(2))));
        assert_eq!(run_promise(e).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn interruptible_nested_in_uninterruptible_observes_the_parent_token() {
        let token = CancellationToken::new();
        token.cancel();
        let e: crate::effect::Effect<i32, String> = uninterruptible(interruptible(succeed(3)));
        let env = Env::new().with_cancel_token(token).with_interruptible(false);
        let result = e.run(env).await;
        assert_matches!(result, Err(crate::failure::Failure::Aborted));
    }

    #[tokio::test]
    async fn interruptible_with_no_suppressed_token_uses_the_ambient_one() {
        let token = CancellationToken::new();
        token.cancel();
        let e: crate::effect::Effect<i32, String> = interruptible(succeed(4));
        let env = Env::new().with_cancel_token(token).with_interruptible(false);
        let result = e.run(env).await;
        assert_matches!(result, Err(crate::failure::Failure::Aborted));
    }
}
