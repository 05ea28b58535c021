//! Classification of image-ready notifications.
//!
//! The image server announces finished captures asynchronously; the
//! announcement carries a file reference to be fetched over the separate
//! HTTP channel, plus (firmware permitting) the capture pointing and
//! exposure length.

use crate::angle::{radians_to_degrees, radians_to_hours};
use crate::message::{MessageKind, WireMessage};

/// Source tag of the image server.
pub const IMAGE_SERVER_SOURCE: &str = "ImageServer";

/// Verb announcing a finished capture.
pub const NEW_IMAGE_READY: &str = "NewImageReady";

/// File suffix of retrievable captures.
pub const IMAGE_SUFFIX: &str = ".tiff";

/// A capture announcement extracted from the control channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageNotification {
    /// Opaque file reference, resolved against the image server's base path.
    pub file: String,
    /// Right ascension at capture time, when reported.
    pub ra_hours: Option<f64>,
    /// Declination at capture time, when reported.
    pub dec_degrees: Option<f64>,
    /// Exposure length in seconds, when reported.
    pub exposure_secs: Option<f64>,
}

impl ImageNotification {
    /// Classify a decoded frame as an image-ready notification.
    ///
    /// Returns `None` unless the source/verb/type signature matches and the
    /// file reference ends in the recognized suffix (case-insensitively).
    /// A notification for any other file type is not retrievable and is
    /// dropped here rather than downstream.
    pub fn from_message(msg: &WireMessage) -> Option<Self> {
        if msg.source != IMAGE_SERVER_SOURCE
            || msg.command.as_deref() != Some(NEW_IMAGE_READY)
            || msg.kind() != MessageKind::Notification
        {
            return None;
        }

        let file = msg.str_field("FileLocation")?;
        if file.is_empty() || !file.to_ascii_lowercase().ends_with(IMAGE_SUFFIX) {
            return None;
        }

        Some(Self {
            file: file.to_string(),
            ra_hours: msg.f64_field("Ra").map(radians_to_hours),
            dec_degrees: msg.f64_field("Dec").map(radians_to_degrees),
            exposure_secs: msg.f64_field("ExposureTime"),
        })
    }
}
