//! Session lifecycle and the poll entry point.
//!
//! [`Session`] owns every piece of cross-call state: the control channel,
//! the sequence counter, the status snapshot, and the exposure machine. An
//! external scheduler calls [`Session::poll`] at a fixed cadence; each call
//! drains the frames that have already arrived (in arrival order), applies
//! any finished retrievals, and evaluates the exposure countdown. Nothing in
//! `poll` waits for more data; the only blocking operation in the crate,
//! the image fetch, runs on its own worker thread and reports back through
//! a channel.
//!
//! Completion and status-change reporting is a [`crossbeam_channel`] the
//! caller polls via [`Session::events`], not a callback.
//!
//! ```no_run
//! use std::time::Duration;
//! use origin_backend::session::{Event, Session};
//!
//! # fn main() -> Result<(), origin_backend::error::BackendError> {
//! let mut session = Session::new();
//! session.connect("192.168.1.169", 80)?;
//! let events = session.events();
//!
//! session.start_exposure(5.0, 200)?;
//! loop {
//!     session.poll();
//!     if let Ok(Event::ExposureComplete { data, .. }) = events.try_recv() {
//!         println!("got {} bytes", data.len());
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(250));
//! }
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use origin_protocol::{command, OutboundCommand, WireMessage};

use crate::dispatch::CommandDispatcher;
use crate::error::{BackendError, BackendResult, FetchError, TransportError};
use crate::exposure::{ExposureOutcome, ExposurePhase, ExposureSync};
use crate::fetch::{self, FetchResult, DEFAULT_FETCH_TIMEOUT};
use crate::status::StatusSnapshot;
use crate::transport::{FrameChannel, WsChannel};

/// Minimum spacing between automatic reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the outward event queue. When a caller stops draining it,
/// the oldest events are shed so memory stays bounded.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Outward notifications, delivered on the channel returned by
/// [`Session::events`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A tracking/slewing flag changed; re-read the snapshot.
    StatusChanged,
    /// An exposure finished and its image was retrieved.
    ExposureComplete {
        /// File reference the image server announced.
        file: String,
        /// Raw image payload.
        data: Vec<u8>,
        /// Pointing at capture time, when the announcement carried it.
        ra_hours: Option<f64>,
        dec_degrees: Option<f64>,
        /// Exposure length in seconds, when the announcement carried it.
        exposure_secs: Option<f64>,
    },
    /// An exposure ended without an image.
    ExposureFailed {
        /// Why retrieval failed.
        error: FetchError,
    },
}

/// One logical connection lifetime to the telescope.
pub struct Session {
    channel: Option<Box<dyn FrameChannel>>,
    dispatcher: CommandDispatcher,
    snapshot: StatusSnapshot,
    exposure: ExposureSync,
    fetch_tx: Sender<FetchResult>,
    fetch_rx: Receiver<FetchResult>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    /// Last-known control address, reused by reconnect attempts.
    address: Option<(String, u16)>,
    /// Host (optionally `host:port`) the image server is fetched from.
    image_host: Option<String>,
    auto_reconnect: bool,
    last_reconnect: Option<Instant>,
    fetch_timeout: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a disconnected session.
    pub fn new() -> Self {
        let (fetch_tx, fetch_rx) = unbounded();
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_DEPTH);
        Self {
            channel: None,
            dispatcher: CommandDispatcher::new(),
            snapshot: StatusSnapshot::default(),
            exposure: ExposureSync::new(),
            fetch_tx,
            fetch_rx,
            events_tx,
            events_rx,
            address: None,
            image_host: None,
            auto_reconnect: false,
            last_reconnect: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Connect the control channel and start a fresh session.
    ///
    /// Resets the snapshot, the exposure machine, and the sequence counter,
    /// then requests an initial status report so the snapshot fills in
    /// without waiting for the mount's next delta.
    pub fn connect(&mut self, host: &str, port: u16) -> BackendResult<()> {
        info!("connecting to {host}:{port}");
        let channel = WsChannel::open(host, port)?;

        self.channel = Some(Box::new(channel));
        self.address = Some((host.to_string(), port));
        self.image_host = Some(host.to_string());
        self.dispatcher = CommandDispatcher::new();
        self.snapshot = StatusSnapshot::default();
        self.exposure.abort();

        if let Err(e) = self.dispatch(command::get_status()) {
            warn!("initial status request failed: {e}");
        }
        Ok(())
    }

    /// Attach an already-open channel instead of dialing out.
    ///
    /// Used by tests and offline tooling; `image_host` is where retrievals
    /// for this channel's notifications are fetched from.
    pub fn attach_channel(&mut self, channel: Box<dyn FrameChannel>, image_host: &str) {
        self.channel = Some(channel);
        self.image_host = Some(image_host.to_string());
    }

    /// Tear the session down.
    ///
    /// Forgets the remote address (no reconnect attempts follow an explicit
    /// disconnect) and resets the snapshot and exposure machine; a late
    /// fetch result from this session no longer matches any generation.
    pub fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.address = None;
        self.image_host = None;
        self.snapshot = StatusSnapshot::default();
        self.exposure.abort();
        info!("session disconnected");
    }

    /// Whether the control channel is currently up.
    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Reconnect automatically (throttled) after a dropped connection.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    /// Override the image retrieval timeout.
    pub fn set_fetch_timeout(&mut self, timeout: Duration) {
        self.fetch_timeout = timeout;
    }

    /// Receiver for outward notifications. Clones share one queue.
    ///
    /// The queue holds at most [`EVENT_QUEUE_DEPTH`] events; when nobody
    /// drains it, the oldest events are dropped in favor of new ones.
    pub fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    /// Last-known instrument state.
    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    /// Current exposure lifecycle phase.
    pub fn exposure_phase(&self) -> ExposurePhase {
        self.exposure.phase()
    }

    /// Countdown time left on the active exposure, if counting.
    pub fn exposure_remaining(&self) -> Option<Duration> {
        self.exposure.remaining(Instant::now())
    }

    /// Drain pending frames and advance timing. Cheap and non-blocking;
    /// call at a fixed cadence.
    pub fn poll(&mut self) {
        let now = Instant::now();
        self.maybe_reconnect(now);
        self.drain_frames();
        self.drain_fetch_results();
        self.exposure.tick(now);
    }

    // ------------------------------------------------------------------
    // Command surface
    // ------------------------------------------------------------------

    /// Slew to the given equatorial position.
    pub fn goto(&mut self, ra_hours: f64, dec_degrees: f64) -> BackendResult<()> {
        validate_ra_dec(ra_hours, dec_degrees)?;
        self.dispatch(command::goto_ra_dec(ra_hours, dec_degrees))
    }

    /// Declare the current pointing to be the given position.
    pub fn sync_to(&mut self, ra_hours: f64, dec_degrees: f64) -> BackendResult<()> {
        validate_ra_dec(ra_hours, dec_degrees)?;
        self.dispatch(command::sync_to_ra_dec(ra_hours, dec_degrees))
    }

    /// Stop all axis motion.
    pub fn abort_motion(&mut self) -> BackendResult<()> {
        self.dispatch(command::abort_axis_movement())
    }

    /// Park the mount.
    pub fn park(&mut self) -> BackendResult<()> {
        self.dispatch(command::park())
    }

    /// Unpark the mount.
    pub fn unpark(&mut self) -> BackendResult<()> {
        self.dispatch(command::unpark())
    }

    /// Enable or disable sidereal tracking.
    pub fn set_tracking(&mut self, enabled: bool) -> BackendResult<()> {
        self.dispatch(command::set_tracking(enabled))
    }

    /// Request an incremental status report.
    pub fn request_status(&mut self) -> BackendResult<()> {
        self.dispatch(command::get_status())
    }

    /// Start a single exposure.
    ///
    /// Dispatches the capture command and starts the local countdown. Fails
    /// with [`BackendError::ExposureBusy`] while an exposure is active; a
    /// dispatch failure leaves the machine idle.
    pub fn start_exposure(&mut self, duration_secs: f64, iso: u32) -> BackendResult<()> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(BackendError::InvalidArgument(format!(
                "exposure duration {duration_secs} s"
            )));
        }
        self.exposure.ensure_idle()?;
        self.dispatch(command::run_sample_capture(duration_secs, iso))?;
        self.exposure
            .begin(Instant::now(), Duration::from_secs_f64(duration_secs))
    }

    /// Cancel the active exposure, if any.
    ///
    /// Safe to call while a retrieval is in flight: the generation bump
    /// makes its eventual result stale.
    pub fn abort_exposure(&mut self) {
        self.exposure.abort();
    }

    // ------------------------------------------------------------------
    // Poll internals
    // ------------------------------------------------------------------

    /// Queue an event, shedding the oldest one when the queue is full.
    fn publish(&self, event: Event) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            debug!("event queue full, shedding oldest event");
            let _ = self.events_rx.try_recv();
            let _ = self.events_tx.try_send(event);
        }
    }

    fn dispatch(&mut self, cmd: OutboundCommand) -> BackendResult<()> {
        let Some(channel) = self.channel.as_deref_mut() else {
            return Err(BackendError::NotConnected);
        };
        self.dispatcher.dispatch(channel, cmd)
    }

    fn drain_frames(&mut self) {
        loop {
            let frame = match self.channel.as_deref_mut() {
                None => return,
                Some(channel) => match channel.try_recv() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return,
                    Err(TransportError::Closed) => {
                        warn!("control channel closed by peer");
                        return;
                    }
                    Err(TransportError::NotConnected) => return,
                    Err(e) => {
                        warn!("control channel receive error: {e}");
                        return;
                    }
                },
            };
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping undecodable frame: {e}");
                return;
            }
        };

        let outcome = self.snapshot.apply(&message);

        if outcome.mount_state_changed {
            self.publish(Event::StatusChanged);
        }

        if let Some(notification) = outcome.notification {
            if let Some(request) = self.exposure.accept_notification(notification) {
                let host = self.image_host.clone().unwrap_or_default();
                fetch::spawn_fetch(
                    host,
                    request.file,
                    request.generation,
                    self.fetch_timeout,
                    self.fetch_tx.clone(),
                );
            }
        }
    }

    fn drain_fetch_results(&mut self) {
        while let Ok(result) = self.fetch_rx.try_recv() {
            if let Some(outcome) = self.exposure.accept_fetch(result) {
                let event = match outcome {
                    ExposureOutcome::Complete {
                        file,
                        data,
                        ra_hours,
                        dec_degrees,
                        exposure_secs,
                    } => {
                        info!(%file, bytes = data.len(), "exposure complete");
                        Event::ExposureComplete {
                            file,
                            data,
                            ra_hours,
                            dec_degrees,
                            exposure_secs,
                        }
                    }
                    ExposureOutcome::Failed { error } => {
                        warn!("exposure failed: {error}");
                        Event::ExposureFailed { error }
                    }
                };
                self.publish(event);
            }
        }
    }

    fn maybe_reconnect(&mut self, now: Instant) {
        if !self.auto_reconnect || self.is_connected() {
            return;
        }
        let Some((host, port)) = self.address.clone() else {
            return;
        };
        if let Some(last) = self.last_reconnect {
            if now.duration_since(last) < RECONNECT_INTERVAL {
                return;
            }
        }
        self.last_reconnect = Some(now);

        match WsChannel::open(&host, port) {
            Ok(channel) => {
                info!("reconnected to {host}:{port}");
                self.channel = Some(Box::new(channel));
                if let Err(e) = self.dispatch(command::get_status()) {
                    warn!("status request after reconnect failed: {e}");
                }
            }
            Err(e) => debug!("reconnect to {host}:{port} failed: {e}"),
        }
    }
}

fn validate_ra_dec(ra_hours: f64, dec_degrees: f64) -> BackendResult<()> {
    if !(0.0..24.0).contains(&ra_hours) || !(-90.0..=90.0).contains(&dec_degrees) {
        return Err(BackendError::InvalidArgument(format!(
            "RA {ra_hours} h, Dec {dec_degrees}°"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChannel;

    fn mock_session() -> (Session, MockChannel) {
        let channel = MockChannel::connected();
        let mut session = Session::new();
        session.attach_channel(Box::new(channel.clone()), "127.0.0.1:1");
        (session, channel)
    }

    #[test]
    fn test_goto_sends_command() {
        let (mut session, channel) = mock_session();
        session.goto(6.0, 45.0).unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        let msg = WireMessage::decode(&sent[0]).unwrap();
        assert_eq!(msg.command.as_deref(), Some("GotoRaDec"));
    }

    #[test]
    fn test_goto_rejects_out_of_range() {
        let (mut session, channel) = mock_session();
        assert!(matches!(
            session.goto(24.5, 0.0),
            Err(BackendError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.goto(0.0, 91.0),
            Err(BackendError::InvalidArgument(_))
        ));
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_commands_fail_when_disconnected() {
        let mut session = Session::new();
        assert!(matches!(session.park(), Err(BackendError::NotConnected)));
    }

    #[test]
    fn test_status_changed_event_on_tracking_update() {
        let (mut session, channel) = mock_session();
        let events = session.events();

        channel.push_frame(r#"{"Source":"Mount","Type":"Status","IsTracking":true}"#);
        session.poll();

        assert!(session.snapshot().is_tracking);
        assert!(matches!(events.try_recv(), Ok(Event::StatusChanged)));
    }

    #[test]
    fn test_event_queue_stays_bounded_when_undrained() {
        let (mut session, channel) = mock_session();
        let events = session.events();

        // Nobody drains the queue while tracking flaps far past capacity.
        for i in 0..(4 * EVENT_QUEUE_DEPTH) {
            channel.push_frame(format!(
                r#"{{"Source":"Mount","Type":"Status","IsTracking":{}}}"#,
                i % 2 == 0
            ));
        }
        session.poll();

        let mut queued = 0;
        while events.try_recv().is_ok() {
            queued += 1;
        }
        assert!(queued > 0);
        assert!(queued <= EVENT_QUEUE_DEPTH);
    }

    #[test]
    fn test_frames_processed_in_arrival_order() {
        let (mut session, channel) = mock_session();
        channel.push_frame(r#"{"Source":"Mount","Type":"Status","IsGotoOver":false}"#);
        channel.push_frame(r#"{"Source":"Mount","Type":"Status","IsGotoOver":true}"#);
        session.poll();
        // The later frame wins.
        assert!(!session.snapshot().is_slewing);
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        let (mut session, channel) = mock_session();
        channel.push_frame("!! not json !!");
        channel.push_frame(r#"{"Source":"Mount","Type":"Status","IsTracking":true}"#);
        session.poll();
        assert!(session.snapshot().is_tracking);
    }

    #[test]
    fn test_start_exposure_dispatches_capture() {
        let (mut session, channel) = mock_session();
        session.start_exposure(2.0, 200).unwrap();

        let msg = WireMessage::decode(&channel.sent()[0]).unwrap();
        assert_eq!(msg.command.as_deref(), Some("RunSampleCapture"));
        assert_eq!(msg.destination.as_deref(), Some("TaskController"));
        assert_eq!(msg.f64_field("ExposureTime"), Some(2.0));
        assert_eq!(session.exposure_phase(), ExposurePhase::Counting);
    }

    #[test]
    fn test_second_exposure_is_busy() {
        let (mut session, _channel) = mock_session();
        session.start_exposure(2.0, 200).unwrap();
        assert!(matches!(
            session.start_exposure(1.0, 200),
            Err(BackendError::ExposureBusy)
        ));
        assert_eq!(session.exposure_phase(), ExposurePhase::Counting);
    }

    #[test]
    fn test_exposure_rejects_bad_duration() {
        let (mut session, _channel) = mock_session();
        assert!(matches!(
            session.start_exposure(0.0, 200),
            Err(BackendError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.start_exposure(f64::NAN, 200),
            Err(BackendError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failed_dispatch_leaves_exposure_idle() {
        let (mut session, channel) = mock_session();
        channel.set_connected(false);
        assert!(session.start_exposure(2.0, 200).is_err());
        assert_eq!(session.exposure_phase(), ExposurePhase::Idle);
    }

    #[test]
    fn test_disconnect_resets_state() {
        let (mut session, channel) = mock_session();
        channel.push_frame(r#"{"Source":"Mount","Type":"Status","IsTracking":true}"#);
        session.poll();
        session.start_exposure(2.0, 200).unwrap();

        session.disconnect();
        assert!(!session.is_connected());
        assert_eq!(*session.snapshot(), StatusSnapshot::default());
        assert_eq!(session.exposure_phase(), ExposurePhase::Idle);
    }

    #[test]
    fn test_abort_exposure_allows_restart() {
        let (mut session, _channel) = mock_session();
        session.start_exposure(2.0, 200).unwrap();
        session.abort_exposure();
        assert_eq!(session.exposure_phase(), ExposurePhase::Idle);
        session.start_exposure(1.0, 200).unwrap();
    }
}
