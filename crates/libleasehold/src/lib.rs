//! libleasehold — worker-side client for leaseholdd.

pub mod client;
pub mod retry;
pub mod worker;

pub use client::{base_url, ExchangeClient, DEFAULT_PORT};
pub use retry::{RetryPolicy, RetryingExchange};
pub use worker::{AttemptOutcome, ClientApp, EchoApp, Worker};
