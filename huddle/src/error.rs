//! Errors shared between the core types and coordinator implementations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    //Media acquisition errors
    #[error("Permission denied. Please allow camera and microphone access")]
    MediaPermissionDenied,
    #[error("No camera or microphone matching the request was found")]
    MediaDeviceNotFound,
    #[error("The capture device is already in use by another application")]
    MediaDeviceBusy,
    #[error("Could not access media devices: {0}")]
    UnknownMediaError(String),
    #[error("Device enumeration is not supported on this platform")]
    DeviceEnumerationUnsupported,
    #[error("Stream has no {0} track")]
    MissingTrack(crate::media::TrackKind),

    //Session errors
    #[error("A call is already in progress")]
    CallAlreadyInProgress,
    #[error("Call is not in progress")]
    CallNotInProgress,
    #[error("The session coordinator has terminated")]
    CoordinatorTerminated,

    //Control delegation errors
    #[error("A control delegation is already in progress")]
    ControlInProgress,
    #[error("No control request is pending")]
    NoPendingControlRequest,

    //Signaling errors
    #[error("Failed to send signal: {0}")]
    FailedToSendSignal(String),

    //External meeting errors
    #[error("Unable to open external meeting window: {0}")]
    ExternalWindowFailure(String),

    #[error("{0}")]
    OtherWithContext(String),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
    #[error("Functionality is not yet implemented")]
    Unimplemented,
    #[error("An unknown error has occurred")]
    Other,
}
