//! Keyed pooling of shell sessions.
//!
//! Spawning and logging in a shell session takes seconds, so callers check
//! sessions out of a [`SessionPool`] keyed by credential set and hand them
//! back when done. An adaptive background maintenance pass keeps a warm
//! minimum per key and retires sessions by idle time, lifetime, and use
//! count.

pub mod clock;
pub mod config;
pub mod pool;

pub use clock::{Clock, SystemClock};
pub use config::PoolConfig;
pub use pool::{SessionFactory, SessionPool};
