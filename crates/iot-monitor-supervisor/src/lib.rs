//! Background job supervision for the IoT device-method monitor.
//!
//! A background job is a script run in a separate OS process by a
//! configured runtime ("node", "python3 -u", ...). The supervisor owns
//! the child's captured stdio, forwards stdout/stderr/exit as hub
//! events, and keeps a registry of live jobs.

pub mod job;
pub mod runtime;
pub mod supervisor;

pub use job::Job;
pub use runtime::{RuntimeCommand, RuntimeError};
pub use supervisor::{JobSupervisor, SpawnError};
