//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `arcam_core`; the
//! `application` layer reaches it only through the `CommandTransport` trait.
//!
//! # Sub-modules
//!
//! - **`session`** – the connection actor: socket I/O, frame reassembly,
//!   response routing, timeouts, write spacing and heartbeat.
//!
//! - **`pending`** – the table of in-flight requests keyed by zone and
//!   command.
//!
//! - **`fake_device`** – a TCP server that plays the receiver's side of the
//!   protocol.

pub mod fake_device;
pub mod pending;
pub mod session;
