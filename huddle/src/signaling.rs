//! Signaling channel contract.
//!
//! The transport carries membership, control, chat, and track-toggle events
//! out-of-band; it never carries media. Implementations are expected to be
//! best-effort: delivery is fire-and-forget and the coordinator does not
//! retry failed sends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::media::{MediaStream, MediaStreamId, TrackKind};
use crate::session::Sid;

/// Broadcast signals sent to the other members of the room.
#[derive(Serialize, Deserialize, Display, Clone, Debug, PartialEq, Eq)]
pub enum CallSignal {
    /// Ask the active screen sharer for remote control.
    #[display(fmt = "RequestControl")]
    RequestControl { username: String },
    /// Grant the pending request from `requester`.
    #[display(fmt = "GrantControl")]
    GrantControl { requester: Sid },
    /// Tear down the control delegation, whichever side of it we are on.
    #[display(fmt = "RevokeControl")]
    RevokeControl,
    #[display(fmt = "Chat")]
    Chat { username: String, message: String },
    /// Announce that a local track was enabled or disabled. `enabled` is the
    /// wire polarity; the data model stores `mic_muted`/`camera_off` and
    /// translates only here at the signaling edge.
    #[display(fmt = "TrackToggle")]
    TrackToggle { kind: TrackKind, enabled: bool },
}

/// Inbound events produced by the signaling channel.
///
/// Events may arrive in any order relative to each other and to local
/// actions; every consumer must treat them as idempotent and tolerate
/// duplicates.
#[derive(Clone, Debug)]
pub enum SignalEvent {
    UserJoined {
        sid: Sid,
        username: String,
    },
    UserLeft {
        sid: Sid,
    },
    Stream {
        sid: Sid,
        stream: MediaStream,
    },
    RequestControl {
        requester: Sid,
        username: String,
    },
    GrantControl,
    RevokeControl,
    Chat {
        username: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    TrackToggle {
        sid: Sid,
        kind: TrackKind,
        enabled: bool,
    },
}

/// The consumed side of the signaling channel.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Registers the outgoing stream with the session resource.
    fn set_local_stream(&self, stream: MediaStream);

    async fn join_room(&self, room_id: &str, username: &str) -> Result<(), Error>;

    async fn leave_room(&self) -> Result<(), Error>;

    /// Swaps the outgoing stream without tearing down the session.
    async fn replace_stream(&self, old: MediaStreamId, new: MediaStream) -> Result<(), Error>;

    /// Fire-and-forget broadcast to the room.
    fn send(&self, signal: CallSignal) -> Result<(), Error>;
}
