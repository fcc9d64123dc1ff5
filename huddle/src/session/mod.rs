//! Core surface of the collaboration session coordinator. It covers:
//! - joining/leaving a multi-party call identified by an opaque room id
//! - mute/camera state, screen-share substitution, and remote-control
//!   delegation
//! - speaking-activity indication and session-scoped chat
//!
//! The signaling transport and the platform media surface are consumed
//! through the traits in [`crate::signaling`] and [`crate::media`];
//! implementations live in extension crates.

mod control;
mod participant;

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;

pub use control::ControlState;
pub use participant::{ChatMessage, Participant, ParticipantRegistry, Sid};

use crate::error::Error;
use crate::media::CaptureConstraints;

/// Session lifecycle. One session is active per client at a time.
#[derive(Display, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Connecting")]
    Connecting,
    #[display(fmt = "InCall")]
    InCall,
    #[display(fmt = "Ended")]
    Ended,
}

/// Result of classifying the `start_call` input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A room was joined; the session is now in-call.
    Joined,
    /// The input matched an external-meeting URL; no session was created.
    ExternalRedirect { url: String },
}

/// Drives the UI.
#[derive(Clone, Debug)]
pub enum SessionEventKind {
    StatusChanged {
        status: SessionStatus,
    },
    /// Human-readable status line ("Waiting for others to join...",
    /// media-error descriptions, and the like).
    StatusMessage {
        message: String,
    },
    ParticipantJoined {
        sid: Sid,
        username: String,
    },
    ParticipantLeft {
        sid: Sid,
    },
    /// A remote stream arrived or was replaced for this participant.
    ParticipantStream {
        sid: Sid,
    },
    TrackStateChanged {
        sid: Sid,
        mic_muted: bool,
        camera_off: bool,
    },
    ParticipantSpeaking {
        sid: Sid,
    },
    ParticipantNotSpeaking {
        sid: Sid,
    },
    SelfSpeaking,
    SelfNotSpeaking,
    IncomingControlRequest {
        requester: Sid,
        username: String,
    },
    ControlChanged {
        state: ControlState,
    },
    ScreenShareChanged {
        sharing: bool,
    },
    ChatReceived {
        message: ChatMessage,
    },
    ExternalMeetingRedirect {
        url: String,
    },
    CallEnded,
}

pub struct SessionEventStream(pub BoxStream<'static, SessionEventKind>);

impl core::ops::Deref for SessionEventStream {
    type Target = BoxStream<'static, SessionEventKind>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for SessionEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Opens external meeting links in a browser window. Consumed by the
/// coordinator when `start_call` input matches a recognized meeting URL.
pub trait MeetingLauncher: Send + Sync {
    fn open_external(&self, url: &str) -> Result<(), Error>;
}

/// Hosts whose URLs bypass the internal session entirely.
const EXTERNAL_MEETING_HOSTS: &[&str] = &["meet.google.com/"];

/// Classifies `start_call` input. Returns the normalized absolute URL when
/// the input is a recognizable external-meeting link, `None` when it is an
/// opaque room id.
pub fn external_meeting_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !EXTERNAL_MEETING_HOSTS
        .iter()
        .any(|host| trimmed.contains(host))
    {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("https://{trimmed}"))
    }
}

/// Provides collaboration session coordination.
#[async_trait]
pub trait Huddle {
    /// The event stream notifies the UI of session related events. Each call
    /// returns an independent subscriber.
    async fn get_event_stream(&mut self) -> Result<SessionEventStream, Error>;

    // ------ Session lifecycle ------

    /// Classifies `input` and either opens an external meeting window or
    /// acquires local media and joins the room. On acquisition failure the
    /// session rolls back to idle with no partial room entry.
    async fn start_call(
        &mut self,
        input: &str,
        username: &str,
        devices: CaptureConstraints,
    ) -> Result<StartOutcome, Error>;

    /// Stops local media, leaves the room, and clears all session state.
    /// Idempotent and safe to call from any state.
    async fn end_call(&mut self) -> Result<(), Error>;

    // ------ Media controls ------

    /// Flips the local audio track and broadcasts the new enabled flag.
    /// Returns the flag.
    async fn toggle_mic(&mut self) -> Result<bool, Error>;

    /// Flips the local video track and broadcasts the new enabled flag.
    /// Returns the flag.
    async fn toggle_video(&mut self) -> Result<bool, Error>;

    /// Swaps the outgoing stream between camera/mic and display capture.
    /// Returns true when now sharing.
    async fn toggle_screen_share(&mut self) -> Result<bool, Error>;

    // ------ Control delegation ------

    async fn request_control(&mut self, username: &str) -> Result<(), Error>;
    async fn grant_control(&mut self) -> Result<(), Error>;
    async fn revoke_control(&mut self) -> Result<(), Error>;

    // ------ Chat ------

    async fn send_chat_message(&mut self, username: &str, message: &str) -> Result<(), Error>;

    // ------ Utility functions ------

    async fn session_status(&self) -> Result<SessionStatus, Error>;
    async fn participants(&self) -> Result<Vec<Participant>, Error>;
    async fn control_state(&self) -> Result<ControlState, Error>;
    async fn chat_history(&self) -> Result<Vec<ChatMessage>, Error>;
}
