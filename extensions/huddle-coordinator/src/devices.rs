//! Capture-device management: enumeration, selection, and a timed preview
//! used to validate devices before a session starts. Touches no session
//! state.

use std::sync::Arc;
use std::time::Duration;

use huddle::error::Error;
use huddle::media::{CaptureConstraints, DeviceDescriptor, DeviceKind, MediaHost, TrackKind};

/// How long a preview stream holds the hardware before it is released.
const PREVIEW_WINDOW: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Default)]
pub struct DeviceInventory {
    pub audio_inputs: Vec<DeviceDescriptor>,
    pub video_inputs: Vec<DeviceDescriptor>,
    /// False when the platform exposes no device-enumeration capability.
    pub enumeration_supported: bool,
}

/// Outcome of a device preview. `error` carries the user-facing description
/// from the media error taxonomy when acquisition failed.
#[derive(Clone, Debug, Default)]
pub struct DeviceTestReport {
    pub audio_ok: bool,
    pub video_ok: bool,
    pub error: Option<String>,
}

pub struct DeviceManager {
    media: Arc<dyn MediaHost>,
    selected_audio: Option<String>,
    selected_video: Option<String>,
}

impl DeviceManager {
    pub fn new(media: Arc<dyn MediaHost>) -> Self {
        Self {
            media,
            selected_audio: None,
            selected_video: None,
        }
    }

    /// Lists capture devices, auto-selecting the first of each kind when
    /// nothing is selected yet.
    ///
    /// Human-readable labels are only guaranteed after a capture permission
    /// has been granted, so a throw-away combined grant is acquired and
    /// immediately released first. Callers must still tolerate anonymous
    /// device ids if that grant is refused.
    pub async fn enumerate_devices(&mut self) -> DeviceInventory {
        match self.media.acquire_capture(CaptureConstraints::default()).await {
            Ok(preview) => preview.stop_all(),
            Err(e) => log::debug!("label-permission grant unavailable: {e}"),
        }

        let devices = match self.media.enumerate_devices().await {
            Ok(devices) => devices,
            Err(Error::DeviceEnumerationUnsupported) => {
                return DeviceInventory {
                    enumeration_supported: false,
                    ..Default::default()
                }
            }
            Err(e) => {
                log::error!("failed to enumerate devices: {e}");
                return DeviceInventory {
                    enumeration_supported: true,
                    ..Default::default()
                };
            }
        };

        let mut inventory = DeviceInventory {
            enumeration_supported: true,
            ..Default::default()
        };
        for device in devices {
            match device.kind {
                DeviceKind::AudioInput => inventory.audio_inputs.push(device),
                DeviceKind::VideoInput => inventory.video_inputs.push(device),
            }
        }

        if self.selected_audio.is_none() {
            self.selected_audio = inventory
                .audio_inputs
                .first()
                .map(|d| d.device_id.clone());
        }
        if self.selected_video.is_none() {
            self.selected_video = inventory
                .video_inputs
                .first()
                .map(|d| d.device_id.clone());
        }

        inventory
    }

    pub fn select_audio(&mut self, device_id: impl Into<String>) {
        self.selected_audio = Some(device_id.into());
    }

    pub fn select_video(&mut self, device_id: impl Into<String>) {
        self.selected_video = Some(device_id.into());
    }

    /// Constraints for the current selection, suitable for `start_call`.
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            audio_device: self.selected_audio.clone(),
            video_device: self.selected_video.clone(),
        }
    }

    /// Acquires a preview stream with the given selection, reports per-kind
    /// success, and releases the hardware after [`PREVIEW_WINDOW`].
    pub async fn test_devices(
        &self,
        audio_id: Option<&str>,
        video_id: Option<&str>,
    ) -> DeviceTestReport {
        let constraints = CaptureConstraints {
            audio_device: audio_id
                .map(str::to_string)
                .or_else(|| self.selected_audio.clone()),
            video_device: video_id
                .map(str::to_string)
                .or_else(|| self.selected_video.clone()),
        };
        match self.media.acquire_capture(constraints).await {
            Ok(stream) => {
                let report = DeviceTestReport {
                    audio_ok: stream.track(TrackKind::Audio).is_some(),
                    video_ok: stream.track(TrackKind::Video).is_some(),
                    error: None,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(PREVIEW_WINDOW).await;
                    stream.stop_all();
                });
                report
            }
            Err(e) => DeviceTestReport {
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}
