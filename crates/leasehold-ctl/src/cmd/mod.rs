//! CLI command modules.

pub mod appio;
pub mod http;
pub mod runs;
pub mod status;
pub mod worker;
