//! leasehold-services — server-side state for the task-leasing exchange.

pub mod exchange;
pub mod expiry;
pub mod inputs_store;
pub mod lease;
pub mod message_channel;
pub mod outputs_sink;
pub mod pending;
pub mod run_store;

pub use exchange::{ExchangeService, ExchangeStatus, LeaseView, QueueView, SweepReport};
pub use inputs_store::InputsStore;
pub use lease::{Lease, LeaseManager, LeaseState, LeaseStats};
pub use message_channel::{MessageChannel, QueueDepth};
pub use outputs_sink::{OutputsRecord, OutputsSink};
pub use pending::{PendingEntry, PendingRegistry};
pub use run_store::{RunProvider, RunStore};
