//! Leasehold integration test harness.
//!
//! Every test starts its own daemon in-process on an ephemeral loopback
//! port and talks to it over HTTP, the way a remote worker would.
//!
//!   cargo test --test integration
//!
//! Daemons are dropped with their test; nothing is shared between tests.

mod infra;

mod admin;
mod protocol;
mod worker;

pub use infra::*;
