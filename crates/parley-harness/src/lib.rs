//! Deterministic simulation harness for Parley session testing.
//!
//! In-memory implementations of the [`Environment`] and [`Transport`] traits.
//! Combined with tokio's paused clock, a whole session (connect, typing
//! timers, reconnect backoff) runs deterministically and instantly.
//!
//! [`Environment`]: parley_core::env::Environment
//! [`Transport`]: parley_client::Transport

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod sim_env;
pub mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;

/// Let spawned session tasks run until they block.
///
/// Under a current-thread runtime, tasks only progress while the test task
/// yields.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
