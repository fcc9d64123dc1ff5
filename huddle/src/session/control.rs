use crate::error::Error;
use crate::session::Sid;

/// Session-scoped control delegation state.
///
/// A participant holds at most one outstanding or active delegation at a
/// time; this is an intentional constraint, not an oversight. A second
/// inbound request while one is pending silently replaces the first and the
/// displaced requester is not notified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ControlState {
    #[default]
    Idle,
    /// We asked for control and are waiting for an answer.
    PendingOutgoing,
    /// A peer asked us for control and we have not answered.
    PendingIncoming { requester: Sid, username: String },
    /// Our request was granted; we control the peer's shared screen.
    GrantedAsRequester,
    /// We granted the request; `grantee` controls our shared screen.
    GrantedAsGrantor { grantee: Sid },
}

impl ControlState {
    pub fn has_control(&self) -> bool {
        matches!(self, ControlState::GrantedAsRequester)
    }

    pub fn is_being_controlled(&self) -> bool {
        matches!(self, ControlState::GrantedAsGrantor { .. })
    }

    /// `Idle -> PendingOutgoing`. Any other state is a conflicting
    /// delegation.
    pub fn begin_outgoing(&mut self) -> Result<(), Error> {
        match self {
            ControlState::Idle => {
                *self = ControlState::PendingOutgoing;
                Ok(())
            }
            _ => Err(Error::ControlInProgress),
        }
    }

    /// Records an inbound request. Replaces a pending request; ignored while
    /// a grant is active so an active delegation is never silently dropped.
    /// Returns true when the request was recorded.
    pub fn incoming_request(&mut self, requester: Sid, username: String) -> bool {
        match self {
            ControlState::GrantedAsRequester | ControlState::GrantedAsGrantor { .. } => false,
            _ => {
                *self = ControlState::PendingIncoming {
                    requester,
                    username,
                };
                true
            }
        }
    }

    /// Grantor side: `PendingIncoming -> GrantedAsGrantor`. Returns the
    /// requester to acknowledge over signaling.
    pub fn grant(&mut self) -> Result<Sid, Error> {
        match self {
            ControlState::PendingIncoming { requester, .. } => {
                let requester = requester.clone();
                *self = ControlState::GrantedAsGrantor {
                    grantee: requester.clone(),
                };
                Ok(requester)
            }
            _ => Err(Error::NoPendingControlRequest),
        }
    }

    /// Requester side, on receiving the grant event:
    /// `PendingOutgoing -> GrantedAsRequester`. A grant that does not match
    /// an outstanding request is stale and ignored.
    pub fn granted(&mut self) -> bool {
        match self {
            ControlState::PendingOutgoing => {
                *self = ControlState::GrantedAsRequester;
                true
            }
            _ => false,
        }
    }

    /// `* -> Idle`. Reachable from any state, including mid-grant, and
    /// idempotent.
    pub fn reset(&mut self) {
        *self = ControlState::Idle;
    }

    /// The peer this relationship references, if any.
    pub fn peer(&self) -> Option<&Sid> {
        match self {
            ControlState::PendingIncoming { requester, .. } => Some(requester),
            ControlState::GrantedAsGrantor { grantee } => Some(grantee),
            _ => None,
        }
    }
}
