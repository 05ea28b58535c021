//! Outbound command dispatch.
//!
//! Builds the wire envelope around a typed command and writes it through the
//! control channel. Every dispatch consumes one sequence id, whether or not
//! the send succeeds, so correlation ids are never reused within a session.
//! The id is currently unused by the firmware's replies but is reserved for
//! request/response matching.

use tracing::{debug, warn};

use origin_protocol::{OutboundCommand, WireMessage};

use crate::error::{BackendError, BackendResult};
use crate::transport::FrameChannel;

/// Self-identifying source tag stamped on every outbound command.
pub const SOURCE_TAG: &str = "OriginBridge";

/// First sequence id of a session.
pub const SEQUENCE_BASE: u32 = 2000;

/// Exclusive upper bound; the counter wraps back to [`SEQUENCE_BASE`]
/// instead of overflowing.
pub const SEQUENCE_CEILING: u32 = 1_000_000;

/// Assigns sequence ids and serializes commands onto the wire.
pub struct CommandDispatcher {
    next_sequence: u32,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    /// Dispatcher with the counter at the session base.
    pub fn new() -> Self {
        Self {
            next_sequence: SEQUENCE_BASE,
        }
    }

    /// Next sequence id without consuming it. Exposed for tests.
    pub fn peek_sequence(&self) -> u32 {
        self.next_sequence
    }

    fn take_sequence(&mut self) -> u32 {
        let id = self.next_sequence;
        self.next_sequence = if id + 1 >= SEQUENCE_CEILING {
            SEQUENCE_BASE
        } else {
            id + 1
        };
        id
    }

    /// Envelope, serialize, and send one command.
    ///
    /// Fire-and-forget: a failed send is returned to the caller but never
    /// queued or retried, and the sequence id it consumed is not reissued.
    pub fn dispatch(
        &mut self,
        channel: &mut dyn FrameChannel,
        command: OutboundCommand,
    ) -> BackendResult<()> {
        // Ids are consumed up front so a failed send still burns one.
        let sequence_id = self.take_sequence();

        if !channel.is_connected() {
            warn!("dropping {} while disconnected", command.verb);
            return Err(BackendError::NotConnected);
        }

        let message = WireMessage {
            source: SOURCE_TAG.to_string(),
            destination: Some(command.destination.to_string()),
            command: Some(command.verb.to_string()),
            message_type: Some("Command".to_string()),
            sequence_id: Some(sequence_id),
            fields: command.params,
        };

        let frame = message.encode()?;
        debug!("send frame: {frame}");
        channel.send(&frame)?;
        Ok(())
    }
}
