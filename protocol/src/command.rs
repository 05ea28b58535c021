//! Typed constructors for the fixed outbound command set.
//!
//! The Origin exposes a narrow verb vocabulary split across two subsystems:
//! the `Mount` handles pointing and tracking, the `TaskController` owns
//! capture scheduling. These builders produce the verb, destination, and
//! parameter map; the dispatcher in `origin-backend` stamps the envelope
//! (source tag, sequence id) at send time.

use serde_json::{json, Map, Value};

use crate::angle::{degrees_to_radians, hours_to_radians};

/// Mount subsystem name.
pub const MOUNT: &str = "Mount";

/// Capture scheduling subsystem name.
pub const TASK_CONTROLLER: &str = "TaskController";

/// One outbound command before envelope stamping.
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    /// Verb identifier.
    pub verb: &'static str,
    /// Target subsystem.
    pub destination: &'static str,
    /// Verb-specific parameters.
    pub params: Map<String, Value>,
}

impl OutboundCommand {
    fn bare(verb: &'static str, destination: &'static str) -> Self {
        Self {
            verb,
            destination,
            params: Map::new(),
        }
    }
}

fn ra_dec_params(ra_hours: f64, dec_degrees: f64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("Ra".to_string(), json!(hours_to_radians(ra_hours)));
    params.insert("Dec".to_string(), json!(degrees_to_radians(dec_degrees)));
    params
}

/// Slew to the given equatorial position.
pub fn goto_ra_dec(ra_hours: f64, dec_degrees: f64) -> OutboundCommand {
    OutboundCommand {
        verb: "GotoRaDec",
        destination: MOUNT,
        params: ra_dec_params(ra_hours, dec_degrees),
    }
}

/// Declare the current pointing to be the given position.
pub fn sync_to_ra_dec(ra_hours: f64, dec_degrees: f64) -> OutboundCommand {
    OutboundCommand {
        verb: "SyncToRaDec",
        destination: MOUNT,
        params: ra_dec_params(ra_hours, dec_degrees),
    }
}

/// Stop all axis motion.
pub fn abort_axis_movement() -> OutboundCommand {
    OutboundCommand::bare("AbortAxisMovement", MOUNT)
}

/// Park the mount.
pub fn park() -> OutboundCommand {
    OutboundCommand::bare("Park", MOUNT)
}

/// Unpark the mount.
pub fn unpark() -> OutboundCommand {
    OutboundCommand::bare("Unpark", MOUNT)
}

/// Enable or disable sidereal tracking.
pub fn set_tracking(enabled: bool) -> OutboundCommand {
    if enabled {
        OutboundCommand::bare("StartTracking", MOUNT)
    } else {
        OutboundCommand::bare("StopTracking", MOUNT)
    }
}

/// Request an incremental status report.
pub fn get_status() -> OutboundCommand {
    OutboundCommand::bare("GetStatus", MOUNT)
}

/// Start a single capture with the given exposure length and sensitivity.
pub fn run_sample_capture(exposure_secs: f64, iso: u32) -> OutboundCommand {
    let mut params = Map::new();
    params.insert("ExposureTime".to_string(), json!(exposure_secs));
    params.insert("ISO".to_string(), json!(iso));
    OutboundCommand {
        verb: "RunSampleCapture",
        destination: TASK_CONTROLLER,
        params,
    }
}
