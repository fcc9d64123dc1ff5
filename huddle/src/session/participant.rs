use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::media::{MediaStream, TrackKind};

/// Signaling-assigned session id, unique within a session. Opaque.
#[derive(Serialize, Deserialize, Display, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(String);

impl Sid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sid {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Sid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A remote member of the session.
///
/// Entries are created on the first sighting of a `sid` via any signaling
/// event - join, stream arrival, or track toggle, in any order - so a
/// freshly created entry may carry an empty username until the join
/// notification lands.
#[derive(Clone, Debug)]
pub struct Participant {
    pub sid: Sid,
    pub username: String,
    pub stream: Option<MediaStream>,
    pub mic_muted: bool,
    pub camera_off: bool,
    pub speaking: bool,
}

impl Participant {
    fn new(sid: Sid) -> Self {
        Self {
            sid,
            username: String::new(),
            stream: None,
            mic_muted: false,
            camera_off: false,
            speaking: false,
        }
    }
}

/// Ephemeral chat entry, ordered by arrival, never persisted past the
/// session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Mapping from `sid` to [`Participant`], kept consistent with inbound
/// signaling events.
///
/// All mutations merge idempotently: applying the same events in any order
/// yields the same entry, and a merge never clobbers a previously stored
/// stream or username.
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: HashMap<Sid, Participant>,
}

impl ParticipantRegistry {
    fn entry(&mut self, sid: &Sid) -> &mut Participant {
        self.participants
            .entry(sid.clone())
            .or_insert_with(|| Participant::new(sid.clone()))
    }

    pub fn upsert_joined(&mut self, sid: &Sid, username: &str) {
        let participant = self.entry(sid);
        if !username.is_empty() {
            participant.username = username.to_string();
        }
    }

    pub fn attach_stream(&mut self, sid: &Sid, stream: MediaStream) {
        self.entry(sid).stream.replace(stream);
    }

    /// Applies an inbound track toggle. `enabled` is the wire polarity:
    /// `camera_off = !enabled` for video, `mic_muted = !enabled` for audio.
    pub fn apply_track_toggle(&mut self, sid: &Sid, kind: TrackKind, enabled: bool) {
        let participant = self.entry(sid);
        match kind {
            TrackKind::Audio => participant.mic_muted = !enabled,
            TrackKind::Video => participant.camera_off = !enabled,
        }
    }

    /// Returns true when the flag changed. Unknown sids are ignored rather
    /// than created; a speaking sample alone does not constitute a sighting.
    pub fn set_speaking(&mut self, sid: &Sid, speaking: bool) -> bool {
        match self.participants.get_mut(sid) {
            Some(p) if p.speaking != speaking => {
                p.speaking = speaking;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, sid: &Sid) -> Option<Participant> {
        self.participants.remove(sid)
    }

    pub fn get(&self, sid: &Sid) -> Option<&Participant> {
        self.participants.get(sid)
    }

    pub fn contains(&self, sid: &Sid) -> bool {
        self.participants.contains_key(sid)
    }

    /// Snapshot ordered by sid for deterministic presentation.
    pub fn participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| a.sid.cmp(&b.sid));
        list
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
