//! leasehold-core — shared protocol types, token primitives, errors and config.
//! All other leasehold crates depend on this one.

pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod message;
pub mod wire;

pub use crypto::{Token, TokenDigest};
pub use error::ExchangeError;
pub use exchange::{ExchangeApi, ExchangeResult};
pub use message::{Message, MessageMetadata};
pub use wire::{ClientAppInputs, Context, Fab, NodeId, OutcomeCode, OutcomeStatus, Run, RunId};
