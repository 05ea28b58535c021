//! Exposure lifecycle synchronization.
//!
//! The client contract is "start an exposure, count it down, receive the
//! image", but the telescope announces image availability on its own
//! schedule, independent of the requested duration. The two signals come
//! from unrelated clocks (local wall clock vs. remote capture pipeline), so
//! an exposure is only complete once *both* have fired: the countdown may
//! expire long before the announcement, and the announcement can land while
//! the countdown is still running.
//!
//! ```text
//!            begin               elapsed >= duration
//!   Idle ───────────► Counting ─────────────────────► AwaitingImage
//!     ▲                  │                                  │
//!     │                  └──────── notification ────────────┤
//!     │                                                     ▼
//!     └──────────── fetch result (same generation) ──── Downloading
//! ```
//!
//! Every `begin` and `abort` bumps a generation counter. Notifications and
//! fetch results carry the generation they were produced for; anything
//! stale (a download finishing after an abort, an announcement for a
//! previous capture) is discarded instead of being misattributed to the
//! current exposure. Only one exposure may be active at a time.
//!
//! The machine is pure decision logic: it performs no I/O and takes the
//! clock as a parameter, so tests drive it with fabricated instants.

use std::time::{Duration, Instant};

use tracing::debug;

use origin_protocol::ImageNotification;

use crate::error::{BackendError, BackendResult, FetchError};
use crate::fetch::FetchResult;

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposurePhase {
    /// No exposure in progress.
    Idle,
    /// Capture command dispatched; local countdown running.
    Counting,
    /// Countdown expired; still waiting for the remote announcement.
    AwaitingImage,
    /// Announcement received; retrieval worker running.
    Downloading,
}

/// Instruction to start a retrieval worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// File reference to retrieve.
    pub file: String,
    /// Generation the result must carry to be applied.
    pub generation: u64,
}

/// Terminal outcome of one exposure, delivered to the client exactly once.
#[derive(Debug)]
pub enum ExposureOutcome {
    /// Retrieval succeeded with a non-empty payload.
    Complete {
        file: String,
        data: Vec<u8>,
        ra_hours: Option<f64>,
        dec_degrees: Option<f64>,
        exposure_secs: Option<f64>,
    },
    /// Retrieval failed; the exposure is over.
    Failed { error: FetchError },
}

enum Phase {
    Idle,
    Counting { started: Instant, duration: Duration },
    AwaitingImage,
    Downloading { notification: ImageNotification },
}

/// The exposure state machine. One instance per camera session.
pub struct ExposureSync {
    phase: Phase,
    generation: u64,
}

impl Default for ExposureSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureSync {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ExposurePhase {
        match self.phase {
            Phase::Idle => ExposurePhase::Idle,
            Phase::Counting { .. } => ExposurePhase::Counting,
            Phase::AwaitingImage => ExposurePhase::AwaitingImage,
            Phase::Downloading { .. } => ExposurePhase::Downloading,
        }
    }

    /// Current exposure generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fail unless no exposure is active.
    pub fn ensure_idle(&self) -> BackendResult<()> {
        match self.phase {
            Phase::Idle => Ok(()),
            _ => Err(BackendError::ExposureBusy),
        }
    }

    /// Start the countdown for a freshly dispatched capture.
    ///
    /// The caller dispatches the capture command first; a dispatch failure
    /// means this is never reached and no transition occurs.
    pub fn begin(&mut self, now: Instant, duration: Duration) -> BackendResult<()> {
        self.ensure_idle()?;
        self.generation += 1;
        self.phase = Phase::Counting {
            started: now,
            duration,
        };
        debug!(
            generation = self.generation,
            ?duration,
            "exposure countdown started"
        );
        Ok(())
    }

    /// Evaluate the countdown against the clock.
    ///
    /// An expired countdown with no announcement yet moves to
    /// `AwaitingImage`, never straight to completion.
    pub fn tick(&mut self, now: Instant) {
        if let Phase::Counting { started, duration } = self.phase {
            if now.duration_since(started) >= duration {
                debug!("countdown expired, awaiting image announcement");
                self.phase = Phase::AwaitingImage;
            }
        }
    }

    /// Countdown time left, while counting.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.phase {
            Phase::Counting { started, duration } => {
                Some(duration.saturating_sub(now.duration_since(started)))
            }
            _ => None,
        }
    }

    /// Feed an image-ready announcement into the machine.
    ///
    /// Returns the retrieval to start when the announcement belongs to the
    /// active exposure. With no exposure in flight (or one already
    /// downloading) the announcement is discarded.
    pub fn accept_notification(&mut self, notification: ImageNotification) -> Option<FetchRequest> {
        match self.phase {
            Phase::Counting { .. } | Phase::AwaitingImage => {
                let request = FetchRequest {
                    file: notification.file.clone(),
                    generation: self.generation,
                };
                self.phase = Phase::Downloading { notification };
                Some(request)
            }
            _ => {
                debug!(file = %notification.file, "discarding image notification with no active exposure");
                None
            }
        }
    }

    /// Feed a retrieval result back into the machine.
    ///
    /// A result whose generation does not match the current one belongs to
    /// an aborted or superseded exposure and is dropped. A matching result
    /// ends the exposure and yields its terminal outcome.
    pub fn accept_fetch(&mut self, result: FetchResult) -> Option<ExposureOutcome> {
        if result.generation != self.generation {
            debug!(
                stale = result.generation,
                current = self.generation,
                "discarding fetch result from a previous exposure generation"
            );
            return None;
        }

        let Phase::Downloading { notification } =
            std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            // Generation matched but nothing is downloading; nothing to
            // deliver.
            return None;
        };

        Some(match result.outcome {
            Ok(data) => ExposureOutcome::Complete {
                file: result.file,
                data,
                ra_hours: notification.ra_hours,
                dec_degrees: notification.dec_degrees,
                exposure_secs: notification.exposure_secs,
            },
            Err(error) => ExposureOutcome::Failed { error },
        })
    }

    /// Cancel whatever is in flight and return to `Idle`.
    ///
    /// Bumping the generation here is what makes a concurrent in-flight
    /// retrieval harmless: its result arrives with the old generation and
    /// is discarded.
    pub fn abort(&mut self) {
        self.generation += 1;
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(file: &str) -> ImageNotification {
        ImageNotification {
            file: file.to_string(),
            ra_hours: None,
            dec_degrees: None,
            exposure_secs: None,
        }
    }

    fn fetch_ok(generation: u64, bytes: usize) -> FetchResult {
        FetchResult {
            generation,
            file: "img001.tiff".to_string(),
            outcome: Ok(vec![0u8; bytes]),
        }
    }

    #[test]
    fn test_countdown_below_duration_keeps_counting() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();

        sync.tick(t0 + Duration::from_secs(4));
        assert_eq!(sync.phase(), ExposurePhase::Counting);
    }

    #[test]
    fn test_expired_countdown_awaits_image_not_complete() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();

        sync.tick(t0 + Duration::from_millis(5100));
        assert_eq!(sync.phase(), ExposurePhase::AwaitingImage);
    }

    #[test]
    fn test_notification_before_countdown_expiry() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();

        let request = sync.accept_notification(notification("img001.tiff")).unwrap();
        assert_eq!(sync.phase(), ExposurePhase::Downloading);
        assert_eq!(request.file, "img001.tiff");
        assert_eq!(request.generation, sync.generation());
    }

    #[test]
    fn test_full_lifecycle_delivers_once() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();
        sync.tick(t0 + Duration::from_millis(5100));

        let request = sync.accept_notification(notification("img001.tiff")).unwrap();
        let outcome = sync.accept_fetch(fetch_ok(request.generation, 1024)).unwrap();

        match outcome {
            ExposureOutcome::Complete { data, file, .. } => {
                assert_eq!(data.len(), 1024);
                assert_eq!(file, "img001.tiff");
            }
            ExposureOutcome::Failed { error } => panic!("unexpected failure: {error}"),
        }
        assert_eq!(sync.phase(), ExposurePhase::Idle);

        // A duplicate result for the finished exposure yields nothing.
        assert!(sync.accept_fetch(fetch_ok(request.generation, 1024)).is_none());
    }

    #[test]
    fn test_busy_while_active() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();
        let generation = sync.generation();

        assert!(matches!(
            sync.begin(t0, Duration::from_secs(1)),
            Err(BackendError::ExposureBusy)
        ));
        // The in-flight exposure is untouched.
        assert_eq!(sync.phase(), ExposurePhase::Counting);
        assert_eq!(sync.generation(), generation);
    }

    #[test]
    fn test_abort_discards_late_notification_and_fetch() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(5)).unwrap();
        let request = sync.accept_notification(notification("img001.tiff")).unwrap();

        sync.abort();
        assert_eq!(sync.phase(), ExposurePhase::Idle);

        // Late results from the aborted generation change nothing.
        assert!(sync.accept_fetch(fetch_ok(request.generation, 1024)).is_none());
        assert!(sync.accept_notification(notification("img002.tiff")).is_none());
        assert_eq!(sync.phase(), ExposurePhase::Idle);
    }

    #[test]
    fn test_notification_with_no_exposure_is_discarded() {
        let mut sync = ExposureSync::new();
        assert!(sync.accept_notification(notification("img001.tiff")).is_none());
        assert_eq!(sync.phase(), ExposurePhase::Idle);
    }

    #[test]
    fn test_failed_fetch_fails_exposure() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(1)).unwrap();
        let request = sync.accept_notification(notification("img001.tiff")).unwrap();

        let outcome = sync
            .accept_fetch(FetchResult {
                generation: request.generation,
                file: request.file,
                outcome: Err(FetchError::Timeout),
            })
            .unwrap();

        assert!(matches!(
            outcome,
            ExposureOutcome::Failed {
                error: FetchError::Timeout
            }
        ));
        assert_eq!(sync.phase(), ExposurePhase::Idle);
    }

    #[test]
    fn test_generation_bumps_on_begin_and_abort() {
        let t0 = Instant::now();
        let mut sync = ExposureSync::new();
        sync.begin(t0, Duration::from_secs(1)).unwrap();
        let first = sync.generation();
        sync.abort();
        sync.begin(t0, Duration::from_secs(1)).unwrap();
        assert!(sync.generation() > first + 1);
    }
}
