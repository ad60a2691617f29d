//! roster-metrics — rate measurement and exposition for the Roster registry.
//!
//! The registry counts renewals and outbound replications with a
//! [`MeasuredRate`]: a double-buffered counter that reports how many
//! events happened during the last *completed* interval. Readers never
//! see a partially filled window.
//!
//! # Architecture
//!
//! ```text
//! MeasuredRate
//!   ├── increment() ← request threads, lock-free
//!   ├── count()     ← eviction sweep, lock-free
//!   └── start()/stop() → one tokio task rotating current → last
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for scraping or a textfile collector
//! ```

pub mod prometheus;
pub mod rate;

pub use prometheus::render_prometheus;
pub use rate::{MeasuredRate, RateError, RateResult};
