//! A lightweight effect runtime: a suspended-computation value type composing
//! success, typed failure, defects, and cancellation, executed with
//! structured concurrency, scoped finalization, and cooperative cancellation
//! on top of `tokio`.
//!
//! The core type is [`Effect<A, E>`]; everything else is a constructor or
//! combinator over it. Start at [`run_promise`] to drive one to completion.

mod combinators;
mod config;
mod context;
mod effect;
mod env;
mod error;
mod foreach;
mod fork;
mod gen;
mod interrupt;
mod race;
mod run;
mod scope;
mod timing;

pub use combinators::{
    and_then_effect, and_then_val, as_result, catch_all, catch_all_failure, flat_map, ignore, map,
    match_effect, match_failure, or_die, or_else_succeed, tap,
};
pub use config::{default_concurrency, RuntimeConfig};
pub use context::ServiceMap;
pub use effect::{
    async_effect, die, fail, from_future, from_option, from_result, never, service, succeed,
    suspend, sync, try_from_future, with_service, yield_now, Effect, Resume,
};
pub use env::{Concurrency, Env};
pub use error::RunError;
pub use foreach::{for_each, for_each_discard, ForEachConcurrency, ForEachOptions};
pub use fork::{fork, fork_daemon, run_fork, run_fork_with, Handle};
pub use gen::{gen, GenCtx};
pub use interrupt::{interruptible, uninterruptible, uninterruptible_mask, Restore};
pub use race::{race_all, race_all_first};
pub use run::{run_promise, run_promise_with, run_sync, run_sync_with};
pub use scope::{
    acquire_release, acquire_use_release, on_interrupt, on_result, scoped, Scope, ScopeExit,
};
pub use timing::{delay, sleep, timeout, timeout_or_else};

pub use failure::{Failure, Outcome};

mod failure;

#[cfg(test)]
pub(crate) use config::init_test_tracing;
