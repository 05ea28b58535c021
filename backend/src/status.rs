//! Status ingest and the shared instrument snapshot.
//!
//! The telescope reports state as incremental deltas, not full snapshots: a
//! mount status frame carries only the fields that changed. Ingest merges
//! each decoded frame into [`StatusSnapshot`], leaving absent fields at
//! their last-known values. The snapshot is owned by the session and only
//! mutated here, one frame at a time, so readers always observe a whole
//! frame's worth of updates.

use tracing::trace;

use origin_protocol::{
    radians_to_degrees, radians_to_hours, ImageNotification, MessageKind, WireMessage,
};

/// Source tag of mount status frames.
pub const MOUNT_SOURCE: &str = "Mount";

/// Source tag of environment sensor frames.
pub const ENVIRONMENT_SOURCE: &str = "Environment";

/// Source tag of the capture scheduler.
pub const TASK_CONTROLLER_SOURCE: &str = "TaskController";

/// Last-known instrument state.
///
/// Every field holds either the most recent value received from a matching
/// status frame or the documented default. Reset to defaults on disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// Right ascension in hours. Default 0.
    pub ra_hours: f64,
    /// Declination in degrees. Default 0.
    pub dec_degrees: f64,
    /// Altitude in degrees. Default 0.
    pub alt_degrees: f64,
    /// Azimuth in degrees. Default 0.
    pub az_degrees: f64,
    /// Whether sidereal tracking is active. Default false.
    pub is_tracking: bool,
    /// Whether a goto is in progress (wire reports the inverse,
    /// `IsGotoOver`). Default false.
    pub is_slewing: bool,
    /// Whether the mount is parked. Default false.
    pub is_parked: bool,
    /// Whether the mount has completed alignment. Default false.
    pub is_aligned: bool,
    /// Free-text label of the current scheduler stage. Default `"Idle"`.
    pub current_operation: String,
    /// Ambient temperature in °C. Default 20.
    pub temperature_celsius: f64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            ra_hours: 0.0,
            dec_degrees: 0.0,
            alt_degrees: 0.0,
            az_degrees: 0.0,
            is_tracking: false,
            is_slewing: false,
            is_parked: false,
            is_aligned: false,
            current_operation: "Idle".to_string(),
            temperature_celsius: 20.0,
        }
    }
}

/// What one ingested frame produced.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// A tracking or slewing flag was updated; listeners should re-read the
    /// snapshot.
    pub mount_state_changed: bool,
    /// The frame was an image-ready announcement.
    pub notification: Option<ImageNotification>,
}

impl StatusSnapshot {
    /// Merge one decoded frame into the snapshot.
    ///
    /// Fields absent from the frame are left unchanged. Frames from
    /// unrecognized sources are ignored without error.
    pub fn apply(&mut self, msg: &WireMessage) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        if let Some(notification) = ImageNotification::from_message(msg) {
            outcome.notification = Some(notification);
            return outcome;
        }

        match msg.source.as_str() {
            MOUNT_SOURCE => self.apply_mount(msg, &mut outcome),
            ENVIRONMENT_SOURCE => {
                if let Some(temp) = msg.f64_field("AmbientTemperature") {
                    self.temperature_celsius = temp;
                }
            }
            TASK_CONTROLLER_SOURCE => {
                if msg.kind() == MessageKind::Status {
                    if let Some(stage) = msg.str_field("Stage") {
                        self.current_operation = stage.to_string();
                    }
                }
            }
            other => trace!("ignoring frame from {other:?}"),
        }

        outcome
    }

    fn apply_mount(&mut self, msg: &WireMessage, outcome: &mut IngestOutcome) {
        if let Some(ra) = msg.f64_field("Ra") {
            self.ra_hours = radians_to_hours(ra);
        }
        if let Some(dec) = msg.f64_field("Dec") {
            self.dec_degrees = radians_to_degrees(dec);
        }
        if let Some(alt) = msg.f64_field("Alt") {
            self.alt_degrees = radians_to_degrees(alt);
        }
        if let Some(az) = msg.f64_field("Azm") {
            self.az_degrees = radians_to_degrees(az);
        }
        if let Some(tracking) = msg.bool_field("IsTracking") {
            self.is_tracking = tracking;
            outcome.mount_state_changed = true;
        }
        if let Some(goto_over) = msg.bool_field("IsGotoOver") {
            self.is_slewing = !goto_over;
            outcome.mount_state_changed = true;
        }
        if let Some(parked) = msg.bool_field("IsParked") {
            self.is_parked = parked;
        }
        if let Some(aligned) = msg.bool_field("IsAligned") {
            self.is_aligned = aligned;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(json: &str) -> WireMessage {
        WireMessage::decode(json).unwrap()
    }

    #[test]
    fn test_partial_update_leaves_other_fields() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.apply(&frame(
            r#"{"Source":"Mount","Type":"Status","Ra":1.5707963267948966,"Dec":0.5235987755982988}"#,
        ));
        let before = snapshot.clone();

        // A frame carrying only the tracking flag must not touch position.
        snapshot.apply(&frame(r#"{"Source":"Mount","Type":"Status","IsTracking":true}"#));

        assert!(snapshot.is_tracking);
        assert_eq!(snapshot.ra_hours, before.ra_hours);
        assert_eq!(snapshot.dec_degrees, before.dec_degrees);
        assert_eq!(snapshot.temperature_celsius, before.temperature_celsius);
    }

    #[test]
    fn test_angle_conversion_on_ingest() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.apply(&frame(
            r#"{"Source":"Mount","Type":"Status","Ra":1.5707963267948966,"Dec":-0.5235987755982988}"#,
        ));
        assert_relative_eq!(snapshot.ra_hours, 6.0, epsilon = 1e-9);
        assert_relative_eq!(snapshot.dec_degrees, -30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_goto_over_inversion() {
        let mut snapshot = StatusSnapshot::default();
        let outcome =
            snapshot.apply(&frame(r#"{"Source":"Mount","Type":"Status","IsGotoOver":false}"#));
        assert!(snapshot.is_slewing);
        assert!(outcome.mount_state_changed);

        snapshot.apply(&frame(r#"{"Source":"Mount","Type":"Status","IsGotoOver":true}"#));
        assert!(!snapshot.is_slewing);
    }

    #[test]
    fn test_position_only_update_raises_no_state_change() {
        let mut snapshot = StatusSnapshot::default();
        let outcome = snapshot.apply(&frame(r#"{"Source":"Mount","Type":"Status","Ra":0.1}"#));
        assert!(!outcome.mount_state_changed);
    }

    #[test]
    fn test_environment_temperature() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.apply(&frame(
            r#"{"Source":"Environment","Type":"Status","AmbientTemperature":3.5}"#,
        ));
        assert_eq!(snapshot.temperature_celsius, 3.5);
    }

    #[test]
    fn test_task_controller_stage() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.apply(&frame(
            r#"{"Source":"TaskController","Type":"Status","Stage":"Imaging"}"#,
        ));
        assert_eq!(snapshot.current_operation, "Imaging");
    }

    #[test]
    fn test_unknown_source_ignored() {
        let mut snapshot = StatusSnapshot::default();
        let before = snapshot.clone();
        let outcome = snapshot.apply(&frame(r#"{"Source":"FocusMotor","Position":12.0}"#));
        assert_eq!(snapshot, before);
        assert!(!outcome.mount_state_changed);
        assert!(outcome.notification.is_none());
    }

    #[test]
    fn test_notification_does_not_touch_snapshot() {
        let mut snapshot = StatusSnapshot::default();
        let before = snapshot.clone();
        let outcome = snapshot.apply(&frame(
            r#"{"Source":"ImageServer","Command":"NewImageReady","Type":"Notification","FileLocation":"img001.tiff"}"#,
        ));
        assert_eq!(snapshot, before);
        assert_eq!(outcome.notification.unwrap().file, "img001.tiff");
    }
}
