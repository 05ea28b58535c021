//! Control channel transport.
//!
//! One persistent WebSocket carries every command and status frame. The
//! session polls this channel from a scheduler callback, so nothing here may
//! block beyond a short bounded syscall: the socket is switched to
//! non-blocking mode once the handshake completes, and an empty receive
//! queue is reported as `Ok(None)` rather than waited on. Long waits belong
//! to the image retrieval channel, never here.
//!
//! After any send or receive error the caller must re-check
//! [`FrameChannel::is_connected`]; a detected peer close flips the internal
//! connected flag and subsequent operations fail fast.

use std::collections::VecDeque;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};
use tungstenite::error::Error as WsError;
use tungstenite::protocol::WebSocket;
use tungstenite::Message;

use crate::error::TransportError;

/// WebSocket endpoint of the mount control channel.
pub const CONTROL_ENDPOINT: &str = "/SmartScope-1.0/mountControlEndpoint";

/// Timeout for TCP connect and the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Non-blocking, message-oriented frame channel.
///
/// The trait is the seam between the session engine and the wire: production
/// code uses [`WsChannel`], tests and offline tooling use [`MockChannel`].
pub trait FrameChannel {
    /// Send one text frame. Fire-and-forget; not retried.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next pending text frame, if any, without blocking.
    ///
    /// `Ok(None)` means no frame is currently available. Control frames
    /// (ping/pong) and binary frames are handled internally and never
    /// surfaced.
    fn try_recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Whether the channel believes the peer is still reachable.
    fn is_connected(&self) -> bool;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// Production control channel over sync `tungstenite`.
pub struct WsChannel {
    socket: Option<WebSocket<TcpStream>>,
}

impl WsChannel {
    /// Connect to the mount control endpoint at `host:port`.
    ///
    /// Resolution, TCP connect, and the upgrade handshake all run under
    /// [`CONNECT_TIMEOUT`]; afterwards the stream is non-blocking.
    pub fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed(format!("resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("no address for {host}:{port}"))
            })?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream.set_read_timeout(Some(CONNECT_TIMEOUT))?;
        stream.set_write_timeout(Some(CONNECT_TIMEOUT))?;

        let url = format!("ws://{host}:{port}{CONTROL_ENDPOINT}");
        let (socket, _response) = tungstenite::client::client(url.as_str(), stream)
            .map_err(|e| TransportError::ConnectionFailed(format!("handshake: {e}")))?;

        socket.get_ref().set_nonblocking(true)?;
        debug!("control channel connected to {url}");

        Ok(Self {
            socket: Some(socket),
        })
    }

    fn drop_socket(&mut self) {
        self.socket = None;
    }
}

impl FrameChannel for WsChannel {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        match socket.send(Message::text(frame)) {
            Ok(()) => Ok(()),
            // Frame is queued in tungstenite's write buffer; the flush in
            // `try_recv` drains it on the next poll.
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                self.drop_socket();
                Err(TransportError::Closed)
            }
            Err(WsError::Io(e)) => {
                self.drop_socket();
                Err(TransportError::Io(e))
            }
            Err(e) => {
                self.drop_socket();
                Err(TransportError::WebSocket(e.to_string()))
            }
        }
    }

    fn try_recv(&mut self) -> Result<Option<String>, TransportError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        loop {
            match socket.read() {
                Ok(Message::Text(text)) => {
                    trace!("recv frame: {text}");
                    return Ok(Some(text.to_string()));
                }
                Ok(Message::Close(_)) => {
                    self.drop_socket();
                    return Err(TransportError::Closed);
                }
                // Ping/pong are answered by tungstenite internally; binary
                // frames are not part of the control protocol.
                Ok(_) => continue,
                Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    // A send that hit a full socket buffer leaves its frame
                    // queued in tungstenite's write buffer. Flushing here
                    // lets the regular poll cadence drain it even when no
                    // further command follows.
                    match socket.flush() {
                        Ok(()) => {}
                        Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                            self.drop_socket();
                            return Err(TransportError::Closed);
                        }
                        Err(WsError::Io(e)) => {
                            self.drop_socket();
                            return Err(TransportError::Io(e));
                        }
                        Err(e) => {
                            self.drop_socket();
                            return Err(TransportError::WebSocket(e.to_string()));
                        }
                    }
                    return Ok(None);
                }
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    self.drop_socket();
                    return Err(TransportError::Closed);
                }
                Err(WsError::Io(e)) => {
                    self.drop_socket();
                    return Err(TransportError::Io(e));
                }
                Err(e) => {
                    self.drop_socket();
                    return Err(TransportError::WebSocket(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None) {
                warn!("error closing control channel: {e}");
            }
        }
    }
}

/// Scripted in-memory channel for tests and offline development.
///
/// Clones share state, so a test can hand one clone to the session and keep
/// another to script inbound frames and inspect what was sent.
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    incoming: VecDeque<String>,
    sent: Vec<String>,
    connected: bool,
}

impl MockChannel {
    /// Create a connected mock channel.
    pub fn connected() -> Self {
        let channel = Self::default();
        channel.set_connected(true);
        channel
    }

    /// Queue an inbound frame.
    pub fn push_frame(&self, frame: impl Into<String>) {
        self.inner.lock().unwrap().incoming.push_back(frame.into());
    }

    /// Frames written through [`FrameChannel::send`], in order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Simulate a peer-side connect or disconnect.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }
}

impl FrameChannel for MockChannel {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.sent.push(frame.to_string());
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<String>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(inner.incoming.pop_front())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }
}
