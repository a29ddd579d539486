//! Replay-aware logging on top of `tracing`.
//!
//! Orchestration code runs again on every turn. `durable_info!`,
//! `durable_warn!` and `durable_error!` stay silent while the context is
//! replaying so each line is emitted once per decision. `durable_debug!`
//! always emits and tags the event with `replaying` instead.

/// Install the default fmt subscriber (`RUST_LOG`, else `info`). Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

#[macro_export]
macro_rules! durable_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::info!(instance = %$ctx.instance_id(), turn_idx = $ctx.turn_index(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! durable_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::warn!(instance = %$ctx.instance_id(), turn_idx = $ctx.turn_index(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! durable_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::error!(instance = %$ctx.instance_id(), turn_idx = $ctx.turn_index(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! durable_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        ::tracing::debug!(
            instance = %$ctx.instance_id(),
            turn_idx = $ctx.turn_index(),
            replaying = $ctx.is_replaying(),
            $($arg)+
        );
    }};
}
