//! Call routing for podcall.
//!
//! This crate receives intercepted calls and decides where they run:
//! - [`CallRouter`]: Applies each method's policy and forwards the call
//! - [`PoolTable`]: Pre-started execution units per method
//! - [`RemoteInvoker`]: HTTP client speaking the execution unit wire contract
//! - [`CallEnvelope`]: The `[key, ...args]` call format
//!
//! # Lifecycle
//!
//! 1. [`CallRouter::register`] every method at start-up.
//! 2. [`CallRouter::warm_up`] starts the pooled units.
//! 3. [`CallRouter::intercept`] serves calls.
//! 4. [`CallRouter::shutdown`] stops every pooled unit and releases the
//!    orchestrator's shared resources.

pub mod envelope;
pub mod pool;
pub mod registration;
pub mod remote;
pub mod router;

pub use envelope::CallEnvelope;
pub use pool::PoolTable;
pub use registration::{LocalError, LocalHandler, MethodRegistration, local_handler};
pub use remote::RemoteInvoker;
pub use router::CallRouter;
