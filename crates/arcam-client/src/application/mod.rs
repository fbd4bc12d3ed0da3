//! Application layer for the client.
//!
//! - **`dispatch`** – [`dispatch::Dispatcher`] wraps any
//!   [`dispatch::CommandTransport`] (normally a [`crate::Session`]) and
//!   exposes one method per receiver feature.  It checks zone support,
//!   retries timed-out requests and maps answer codes onto
//!   [`crate::ClientError`].

pub mod dispatch;
