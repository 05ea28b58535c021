//! Session, status, and exposure engine for the Celestron Origin.
//!
//! The Origin announces state changes and finished captures asynchronously
//! over a persistent WebSocket, while clients expect synchronous,
//! poll-driven status and exposure semantics. This crate bridges the two:
//!
//! - [`transport`]: the non-blocking control channel
//! - [`dispatch`]: sequence-id assignment and command serialization
//! - [`status`]: incremental status ingest into a shared snapshot
//! - [`fetch`]: bounded-blocking image retrieval on a worker thread
//! - [`exposure`]: the countdown/notification reconciliation state machine
//! - [`session`]: lifecycle, the `poll()` entry point, and the command
//!   surface
//!
//! See [`session::Session`] for the top-level API.

pub mod dispatch;
pub mod error;
pub mod exposure;
pub mod fetch;
pub mod session;
pub mod status;
pub mod transport;

pub use error::{BackendError, BackendResult, FetchError, TransportError};
pub use exposure::ExposurePhase;
pub use session::{Event, Session};
pub use status::StatusSnapshot;
