//! Live trading: session tasks, their manager and the stream resilience pieces.

pub mod backoff;
pub mod manager;
pub mod rate_limit;
pub mod session;
pub mod window;
