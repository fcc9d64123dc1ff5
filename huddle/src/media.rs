//! Platform media surface consumed by the session coordinator.
//!
//! The coordinator never talks to capture hardware directly. Everything it
//! needs from the platform - device enumeration, camera/microphone and
//! display capture, and frequency analysis for the speaking indicator - is
//! expressed here as traits so the transport and platform layers stay
//! swappable (and mockable in tests).

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::Error;

pub type MediaStreamId = Uuid;

#[allow(clippy::upper_case_acronyms)]
#[derive(Serialize, Deserialize, Display, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

/// A single capture track within a [`MediaStream`].
///
/// `set_enabled` flips the live mute state without releasing the hardware;
/// `stop` releases the hardware permanently.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// Handle to a platform capture stream. Cloning the handle does not clone the
/// underlying tracks.
#[derive(Clone)]
pub struct MediaStream {
    id: MediaStreamId,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> MediaStreamId {
        self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Flips the enabled flag of the first track of the given kind and
    /// returns the new value.
    pub fn toggle_track(&self, kind: TrackKind) -> Result<bool, Error> {
        let track = self.track(kind).ok_or(Error::MissingTrack(kind))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Stops every track, releasing the capture hardware.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl core::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// A display-capture stream plus the platform notification that fires when
/// the user stops sharing from outside the application (e.g. the browser's
/// "stop sharing" affordance).
pub struct DisplayCapture {
    pub stream: MediaStream,
    pub ended: oneshot::Receiver<()>,
}

#[derive(Serialize, Deserialize, Display, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    #[serde(rename = "audioinput")]
    #[display(fmt = "audioinput")]
    AudioInput,
    #[serde(rename = "videoinput")]
    #[display(fmt = "videoinput")]
    VideoInput,
}

/// Entry from the platform device inventory. Labels may be empty until a
/// capture permission has been granted at least once.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}

/// Device selection for capture acquisition. `None` means the platform
/// default device of that kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
}

/// The platform media surface.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Lists capture devices. Returns [`Error::DeviceEnumerationUnsupported`]
    /// when the platform exposes no enumeration capability.
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, Error>;

    /// Acquires a camera/microphone stream matching the constraints.
    async fn acquire_capture(&self, constraints: CaptureConstraints)
        -> Result<MediaStream, Error>;

    /// Acquires a display-capture stream. Fails when the user cancels the
    /// picker.
    async fn acquire_display(&self) -> Result<DisplayCapture, Error>;

    /// Creates an audio analysis context. The coordinator creates at most
    /// one per session and shares it across every analysed stream.
    fn create_analysis_context(&self) -> Result<Arc<dyn AnalysisContext>, Error>;
}

/// Shared audio processing context. One per session, owned by the session
/// coordinator and passed by reference to the activity monitor.
pub trait AnalysisContext: Send + Sync {
    /// Attaches a frequency-domain analyser to the stream's audio track.
    fn create_analyser(&self, stream: &MediaStream) -> Result<Box<dyn StreamAnalyser>, Error>;
}

/// Per-stream frequency analyser. Must be disposed when the monitored
/// participant leaves so the underlying source node is released.
pub trait StreamAnalyser: Send {
    /// Current frequency-domain magnitudes, one byte per bin (0-255).
    fn frequency_data(&mut self) -> Vec<u8>;

    /// Releases the analyser and its stream-source node.
    fn dispose(&mut self);
}
