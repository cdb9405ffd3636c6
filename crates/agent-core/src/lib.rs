//! Agent Core - Foundation for the realtime dataset agent
//!
//! Provides the shared types, error handling, configuration, lease
//! bookkeeping and shutdown signalling used by every other crate.

pub mod config;
pub mod error;
pub mod lease;
pub mod shutdown;
pub mod types;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use lease::{LeaseTable, LeaseTableHandle, LeaseTransition};
pub use shutdown::{Shutdown, ShutdownHandle, ShutdownReceiver};
pub use types::*;
