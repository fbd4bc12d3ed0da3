//! arcam-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `arcam` binary share the same module tree.
//!
//! # What does arcam-client do? (for beginners)
//!
//! A receiver answers every request with a response carrying the same zone
//! and command code, but it may also push status updates on its own at any
//! time, and the TCP stream delivers bytes in arbitrary chunks.  This crate
//! hides all of that behind an async API:
//!
//! 1. [`Session`] owns one TCP connection.  A background task reassembles
//!    frames, matches each response to the request waiting for it, enforces
//!    timeouts and spacing between writes, and keeps the link alive.
//! 2. [`PendingTable`] is the bookkeeping behind that matching: at most one
//!    (or, with [`DuplicatePolicy::Queue`], a FIFO of) waiter per
//!    zone/command pair.
//! 3. [`Dispatcher`] turns raw packets into typed calls such as
//!    `volume(Zone::MAIN)` and interprets the answer codes.
//! 4. [`FakeDevice`] emulates a receiver for tests and local development.

/// Application layer: the typed command facade.
pub mod application;

/// Loading and saving [`ClientConfig`].
pub mod config;

/// The error type shared by every client operation.
pub mod error;

/// Infrastructure layer: the connection session, the pending-request table
/// and the emulated receiver.
pub mod infrastructure;

pub use application::dispatch::{CommandTransport, DispatchConfig, Dispatcher};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use infrastructure::fake_device::{FakeDevice, Reply, RunningDevice};
pub use infrastructure::pending::{DuplicatePolicy, PendingTable};
pub use infrastructure::session::{CloseReason, Session, SessionConfig, SessionEvent, SessionState};
