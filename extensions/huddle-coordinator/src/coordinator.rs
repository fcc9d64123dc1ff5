use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{
    broadcast,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot, Notify,
};

use huddle::error::Error;
use huddle::media::{
    CaptureConstraints, DisplayCapture, MediaHost, MediaStream, MediaStreamId, TrackKind,
};
use huddle::session::{
    external_meeting_url, ChatMessage, ControlState, Huddle, MeetingLauncher, Participant,
    ParticipantRegistry, SessionEventKind, SessionEventStream, SessionStatus, StartOutcome,
};
use huddle::signaling::{CallSignal, SignalEvent, SignalingChannel};

use crate::activity::{ActivityEvent, ActivityMonitor, MonitorKey};
use crate::notify_wrapper::NotifyWrapper;

#[derive(Debug)]
enum Cmd {
    StartCall {
        input: String,
        username: String,
        constraints: CaptureConstraints,
        rsp: oneshot::Sender<Result<StartOutcome, Error>>,
    },
    EndCall {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    ToggleTrack {
        kind: TrackKind,
        rsp: oneshot::Sender<Result<bool, Error>>,
    },
    ToggleScreenShare {
        rsp: oneshot::Sender<Result<bool, Error>>,
    },
    RequestControl {
        username: String,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    GrantControl {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    RevokeControl {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    SendChat {
        username: String,
        message: String,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    GetStatus {
        rsp: oneshot::Sender<SessionStatus>,
    },
    GetParticipants {
        rsp: oneshot::Sender<Vec<Participant>>,
    },
    GetControlState {
        rsp: oneshot::Sender<ControlState>,
    },
    GetChatHistory {
        rsp: oneshot::Sender<Vec<ChatMessage>>,
    },
    /// Internal: the platform-level "stop sharing" affordance fired for the
    /// given display stream.
    DisplayEnded {
        stream_id: MediaStreamId,
    },
}

pub struct Args {
    pub media: Arc<dyn MediaHost>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub launcher: Arc<dyn MeetingLauncher>,
    pub signal_rx: UnboundedReceiver<SignalEvent>,
}

/// Handle to the spawned session coordinator. Cheap to clone; the run loop
/// winds down when the last handle is dropped.
#[derive(Clone)]
pub struct SessionCoordinator {
    ch: UnboundedSender<Cmd>,
    ui_event_ch: broadcast::Sender<SessionEventKind>,
    notify: Arc<NotifyWrapper>,
}

impl SessionCoordinator {
    pub fn new(args: Args) -> Self {
        let (tx, cmd_rx) = mpsc::unbounded_channel();
        let (ui_event_ch, _rx) = broadcast::channel(1024);
        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();
        let events = ui_event_ch.clone();
        let self_ch = tx.clone();
        tokio::spawn(async move {
            run(args, events, self_ch, cmd_rx, notify2).await;
        });
        Self {
            ch: tx,
            ui_event_ch,
            notify: Arc::new(NotifyWrapper { notify }),
        }
    }

    async fn request<T>(
        &self,
        cmd: Cmd,
        rx: oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.ch
            .send(cmd)
            .map_err(|_| Error::CoordinatorTerminated)?;
        rx.await.map_err(|_| Error::CoordinatorTerminated)?
    }

    async fn query<T>(&self, cmd: Cmd, rx: oneshot::Receiver<T>) -> Result<T, Error> {
        self.ch
            .send(cmd)
            .map_err(|_| Error::CoordinatorTerminated)?;
        rx.await.map_err(|_| Error::CoordinatorTerminated)
    }
}

#[async_trait]
impl Huddle for SessionCoordinator {
    async fn get_event_stream(&mut self) -> Result<SessionEventStream, Error> {
        let mut rx = self.ui_event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => {}
                }
            }
        };
        Ok(SessionEventStream(stream.boxed()))
    }

    async fn start_call(
        &mut self,
        input: &str,
        username: &str,
        devices: CaptureConstraints,
    ) -> Result<StartOutcome, Error> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Cmd::StartCall {
                input: input.to_string(),
                username: username.to_string(),
                constraints: devices,
                rsp: tx,
            },
            rx,
        )
        .await
    }

    async fn end_call(&mut self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.request(Cmd::EndCall { rsp: tx }, rx).await
    }

    async fn toggle_mic(&mut self) -> Result<bool, Error> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Cmd::ToggleTrack {
                kind: TrackKind::Audio,
                rsp: tx,
            },
            rx,
        )
        .await
    }

    async fn toggle_video(&mut self) -> Result<bool, Error> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Cmd::ToggleTrack {
                kind: TrackKind::Video,
                rsp: tx,
            },
            rx,
        )
        .await
    }

    async fn toggle_screen_share(&mut self) -> Result<bool, Error> {
        let (tx, rx) = oneshot::channel();
        self.request(Cmd::ToggleScreenShare { rsp: tx }, rx).await
    }

    async fn request_control(&mut self, username: &str) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Cmd::RequestControl {
                username: username.to_string(),
                rsp: tx,
            },
            rx,
        )
        .await
    }

    async fn grant_control(&mut self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.request(Cmd::GrantControl { rsp: tx }, rx).await
    }

    async fn revoke_control(&mut self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.request(Cmd::RevokeControl { rsp: tx }, rx).await
    }

    async fn send_chat_message(&mut self, username: &str, message: &str) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Cmd::SendChat {
                username: username.to_string(),
                message: message.to_string(),
                rsp: tx,
            },
            rx,
        )
        .await
    }

    async fn session_status(&self) -> Result<SessionStatus, Error> {
        let (tx, rx) = oneshot::channel();
        self.query(Cmd::GetStatus { rsp: tx }, rx).await
    }

    async fn participants(&self) -> Result<Vec<Participant>, Error> {
        let (tx, rx) = oneshot::channel();
        self.query(Cmd::GetParticipants { rsp: tx }, rx).await
    }

    async fn control_state(&self) -> Result<ControlState, Error> {
        let (tx, rx) = oneshot::channel();
        self.query(Cmd::GetControlState { rsp: tx }, rx).await
    }

    async fn chat_history(&self) -> Result<Vec<ChatMessage>, Error> {
        let (tx, rx) = oneshot::channel();
        self.query(Cmd::GetChatHistory { rsp: tx }, rx).await
    }
}

/// Everything the active session owns. Dropped wholesale on teardown.
struct ActiveSession {
    constraints: CaptureConstraints,
    /// The current outgoing stream (camera/mic, or display while sharing).
    local_stream: MediaStream,
    /// Every stream acquired during this session; all of their tracks are
    /// stopped on teardown.
    held_streams: Vec<MediaStream>,
    screen_sharing: bool,
    registry: ParticipantRegistry,
    control: ControlState,
    chat: Vec<ChatMessage>,
    monitor: Option<ActivityMonitor>,
}

impl ActiveSession {
    fn monitor_attach(&mut self, key: MonitorKey, stream: &MediaStream) {
        if stream.track(TrackKind::Audio).is_none() {
            return;
        }
        if let Some(monitor) = self.monitor.as_mut() {
            if let Err(e) = monitor.attach(key, stream) {
                log::error!("failed to attach analyser: {e}");
            }
        }
    }

    fn monitor_detach(&mut self, key: &MonitorKey) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.detach(key);
        }
    }
}

struct LoopState {
    media: Arc<dyn MediaHost>,
    signaling: Arc<dyn SignalingChannel>,
    launcher: Arc<dyn MeetingLauncher>,
    ui_event_ch: broadcast::Sender<SessionEventKind>,
    self_ch: UnboundedSender<Cmd>,
    activity_tx: UnboundedSender<ActivityEvent>,
    status: SessionStatus,
    session: Option<ActiveSession>,
}

async fn run(
    args: Args,
    ui_event_ch: broadcast::Sender<SessionEventKind>,
    self_ch: UnboundedSender<Cmd>,
    mut cmd_rx: UnboundedReceiver<Cmd>,
    notify: Arc<Notify>,
) {
    let Args {
        media,
        signaling,
        launcher,
        mut signal_rx,
    } = args;

    let (activity_tx, mut activity_rx) = mpsc::unbounded_channel();
    let mut state = LoopState {
        media,
        signaling,
        launcher,
        ui_event_ch,
        self_ch,
        activity_tx,
        status: SessionStatus::Idle,
        session: None,
    };

    loop {
        tokio::select! {
            _ = notify.notified() => {
                log::debug!("quitting session coordinator");
                state.end_call().await;
                break;
            }
            opt = cmd_rx.recv() => {
                let cmd = match opt {
                    Some(cmd) => cmd,
                    None => {
                        log::debug!("coordinator cmd channel is closed. quitting");
                        state.end_call().await;
                        break;
                    }
                };
                state.handle_cmd(cmd).await;
            }
            opt = signal_rx.recv() => {
                let event = match opt {
                    Some(event) => event,
                    None => {
                        log::debug!("signaling event channel is closed. quitting");
                        state.end_call().await;
                        break;
                    }
                };
                state.handle_signal(event);
            }
            opt = activity_rx.recv() => {
                // the loop owns a sender clone, so this channel never closes
                if let Some(event) = opt {
                    state.handle_activity(event);
                }
            }
        }
    }
}

impl LoopState {
    fn emit(&self, event: SessionEventKind) {
        let _ = self.ui_event_ch.send(event);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(SessionEventKind::StatusChanged { status });
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::StartCall {
                input,
                username,
                constraints,
                rsp,
            } => {
                let _ = rsp.send(self.start_call(&input, &username, constraints).await);
            }
            Cmd::EndCall { rsp } => {
                self.end_call().await;
                let _ = rsp.send(Ok(()));
            }
            Cmd::ToggleTrack { kind, rsp } => {
                let _ = rsp.send(self.toggle_track(kind));
            }
            Cmd::ToggleScreenShare { rsp } => {
                let _ = rsp.send(self.toggle_screen_share().await);
            }
            Cmd::RequestControl { username, rsp } => {
                let _ = rsp.send(self.request_control(&username));
            }
            Cmd::GrantControl { rsp } => {
                let _ = rsp.send(self.grant_control());
            }
            Cmd::RevokeControl { rsp } => {
                let _ = rsp.send(self.revoke_control());
            }
            Cmd::SendChat {
                username,
                message,
                rsp,
            } => {
                let _ = rsp.send(self.send_chat(&username, &message));
            }
            Cmd::GetStatus { rsp } => {
                let _ = rsp.send(self.status);
            }
            Cmd::GetParticipants { rsp } => {
                let participants = self
                    .session
                    .as_ref()
                    .map(|s| s.registry.participants())
                    .unwrap_or_default();
                let _ = rsp.send(participants);
            }
            Cmd::GetControlState { rsp } => {
                let control = self
                    .session
                    .as_ref()
                    .map(|s| s.control.clone())
                    .unwrap_or_default();
                let _ = rsp.send(control);
            }
            Cmd::GetChatHistory { rsp } => {
                let chat = self
                    .session
                    .as_ref()
                    .map(|s| s.chat.clone())
                    .unwrap_or_default();
                let _ = rsp.send(chat);
            }
            Cmd::DisplayEnded { stream_id } => {
                self.display_ended(stream_id).await;
            }
        }
    }

    async fn start_call(
        &mut self,
        input: &str,
        username: &str,
        constraints: CaptureConstraints,
    ) -> Result<StartOutcome, Error> {
        // external meeting links bypass the internal session entirely
        if let Some(url) = external_meeting_url(input) {
            self.launcher.open_external(&url)?;
            self.emit(SessionEventKind::ExternalMeetingRedirect { url: url.clone() });
            self.emit(SessionEventKind::StatusMessage {
                message: format!("Opening external meeting: {url}"),
            });
            return Ok(StartOutcome::ExternalRedirect { url });
        }

        if matches!(
            self.status,
            SessionStatus::Connecting | SessionStatus::InCall
        ) {
            log::debug!("tried to start a call which is already in progress");
            return Err(Error::CallAlreadyInProgress);
        }

        self.set_status(SessionStatus::Connecting);

        let stream = match self.media.acquire_capture(constraints.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                // rollback: no partial room entry
                self.set_status(SessionStatus::Idle);
                self.emit(SessionEventKind::StatusMessage {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.signaling.set_local_stream(stream.clone());
        if let Err(e) = self.signaling.join_room(input, username).await {
            stream.stop_all();
            self.set_status(SessionStatus::Idle);
            self.emit(SessionEventKind::StatusMessage {
                message: e.to_string(),
            });
            return Err(e);
        }

        // one analysis context per session, shared by every analyser
        let monitor = match self.media.create_analysis_context() {
            Ok(ctx) => Some(ActivityMonitor::new(ctx, self.activity_tx.clone())),
            Err(e) => {
                log::error!("audio analysis unavailable, speaking indicator disabled: {e}");
                None
            }
        };

        let mut session = ActiveSession {
            constraints,
            local_stream: stream.clone(),
            held_streams: vec![stream.clone()],
            screen_sharing: false,
            registry: Default::default(),
            control: ControlState::Idle,
            chat: Vec::new(),
            monitor,
        };
        session.monitor_attach(MonitorKey::Local, &stream);
        self.session = Some(session);

        self.set_status(SessionStatus::InCall);
        self.emit(SessionEventKind::StatusMessage {
            message: "Waiting for others to join...".to_string(),
        });
        Ok(StartOutcome::Joined)
    }

    /// Stops local media, cancels sampling, leaves the room, and clears all
    /// session state in one logical operation. Safe to call from any state.
    async fn end_call(&mut self) {
        let Some(mut session) = self.session.take() else {
            log::debug!("end_call without active session");
            return;
        };
        if let Some(monitor) = session.monitor.as_mut() {
            monitor.detach_all();
        }
        for stream in &session.held_streams {
            stream.stop_all();
        }
        if let Err(e) = self.signaling.leave_room().await {
            log::error!("failed to leave room: {e}");
        }
        // registry, control relationship, and chat history drop with the
        // session; late events for the torn-down session are ignored
        drop(session);
        self.set_status(SessionStatus::Ended);
        self.emit(SessionEventKind::CallEnded);
    }

    fn toggle_track(&mut self, kind: TrackKind) -> Result<bool, Error> {
        let session = self.session.as_mut().ok_or(Error::CallNotInProgress)?;
        let enabled = session.local_stream.toggle_track(kind)?;
        // broadcast so remote views converge; stale until delivered
        if let Err(e) = self.signaling.send(CallSignal::TrackToggle { kind, enabled }) {
            log::error!("failed to send track toggle: {e}");
        }
        Ok(enabled)
    }

    async fn toggle_screen_share(&mut self) -> Result<bool, Error> {
        let session = self.session.as_mut().ok_or(Error::CallNotInProgress)?;
        if !session.screen_sharing {
            // acquisition failure (e.g. the user cancels the picker) leaves
            // the prior stream and sharing flag untouched
            let DisplayCapture { stream, ended } = match self.media.acquire_display().await {
                Ok(capture) => capture,
                Err(e) => {
                    log::debug!("display capture not acquired: {e}");
                    return Err(e);
                }
            };
            if let Err(e) = self
                .signaling
                .replace_stream(session.local_stream.id(), stream.clone())
                .await
            {
                stream.stop_all();
                return Err(e);
            }

            let old = std::mem::replace(&mut session.local_stream, stream.clone());
            old.stop_all();
            session.held_streams.push(stream.clone());
            session.screen_sharing = true;
            session.monitor_detach(&MonitorKey::Local);
            session.monitor_attach(MonitorKey::Local, &stream);

            // wire the platform's "stop sharing" affordance to the reverse
            // transition
            let ch = self.self_ch.clone();
            let stream_id = stream.id();
            tokio::spawn(async move {
                if ended.await.is_ok() {
                    let _ = ch.send(Cmd::DisplayEnded { stream_id });
                }
            });

            self.emit(SessionEventKind::ScreenShareChanged { sharing: true });
            Ok(true)
        } else {
            let stream = match self.media.acquire_capture(session.constraints.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("failed to reacquire camera/mic: {e}");
                    return Err(e);
                }
            };
            if let Err(e) = self
                .signaling
                .replace_stream(session.local_stream.id(), stream.clone())
                .await
            {
                stream.stop_all();
                return Err(e);
            }

            let old = std::mem::replace(&mut session.local_stream, stream.clone());
            old.stop_all();
            session.held_streams.push(stream.clone());
            session.screen_sharing = false;
            session.monitor_detach(&MonitorKey::Local);
            session.monitor_attach(MonitorKey::Local, &stream);

            self.emit(SessionEventKind::ScreenShareChanged { sharing: false });
            Ok(false)
        }
    }

    async fn display_ended(&mut self, stream_id: MediaStreamId) {
        let is_current = self
            .session
            .as_ref()
            .map(|s| s.screen_sharing && s.local_stream.id() == stream_id)
            .unwrap_or(false);
        if !is_current {
            log::debug!("stale display-ended notification ignored");
            return;
        }
        if let Err(e) = self.toggle_screen_share().await {
            log::error!("failed to revert to camera after display capture ended: {e}");
        }
    }

    fn request_control(&mut self, username: &str) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or(Error::CallNotInProgress)?;
        session.control.begin_outgoing()?;
        if let Err(e) = self.signaling.send(CallSignal::RequestControl {
            username: username.to_string(),
        }) {
            session.control.reset();
            return Err(Error::FailedToSendSignal(e.to_string()));
        }
        self.emit(SessionEventKind::ControlChanged {
            state: ControlState::PendingOutgoing,
        });
        Ok(())
    }

    fn grant_control(&mut self) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or(Error::CallNotInProgress)?;
        let prev = session.control.clone();
        let requester = session.control.grant()?;
        if let Err(e) = self.signaling.send(CallSignal::GrantControl {
            requester: requester.clone(),
        }) {
            session.control = prev;
            return Err(Error::FailedToSendSignal(e.to_string()));
        }
        let state = session.control.clone();
        self.emit(SessionEventKind::ControlChanged { state });
        Ok(())
    }

    /// Resets the delegation from any state. Idempotent; succeeds even when
    /// nothing was delegated.
    fn revoke_control(&mut self) -> Result<(), Error> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.control.reset();
        if let Err(e) = self.signaling.send(CallSignal::RevokeControl) {
            log::error!("failed to send revoke signal: {e}");
        }
        self.emit(SessionEventKind::ControlChanged {
            state: ControlState::Idle,
        });
        Ok(())
    }

    fn send_chat(&mut self, username: &str, message: &str) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or(Error::CallNotInProgress)?;
        // fire and forget; delivery failures are not surfaced to the sender
        if let Err(e) = self.signaling.send(CallSignal::Chat {
            username: username.to_string(),
            message: message.to_string(),
        }) {
            log::error!("failed to send chat message: {e}");
        }
        let entry = ChatMessage {
            username: username.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        session.chat.push(entry.clone());
        self.emit(SessionEventKind::ChatReceived { message: entry });
        Ok(())
    }

    fn handle_signal(&mut self, event: SignalEvent) {
        let Some(session) = self.session.as_mut() else {
            log::debug!("received signal without active session");
            return;
        };
        match event {
            SignalEvent::UserJoined { sid, username } => {
                session.registry.upsert_joined(&sid, &username);
                self.emit(SessionEventKind::ParticipantJoined { sid, username });
            }
            SignalEvent::UserLeft { sid } => {
                if session.registry.remove(&sid).is_none() {
                    log::debug!("user-left for unknown participant {sid}");
                    return;
                }
                session.monitor_detach(&MonitorKey::Peer(sid.clone()));
                // a delegation referencing the departed peer is dangling
                let control_reset = session.control.peer() == Some(&sid);
                if control_reset {
                    session.control.reset();
                }
                if control_reset {
                    self.emit(SessionEventKind::ControlChanged {
                        state: ControlState::Idle,
                    });
                }
                self.emit(SessionEventKind::ParticipantLeft { sid });
            }
            SignalEvent::Stream { sid, stream } => {
                session.registry.attach_stream(&sid, stream.clone());
                session.monitor_attach(MonitorKey::Peer(sid.clone()), &stream);
                self.emit(SessionEventKind::ParticipantStream { sid });
            }
            SignalEvent::RequestControl {
                requester,
                username,
            } => {
                if session
                    .control
                    .incoming_request(requester.clone(), username.clone())
                {
                    let state = session.control.clone();
                    self.emit(SessionEventKind::IncomingControlRequest {
                        requester,
                        username,
                    });
                    self.emit(SessionEventKind::ControlChanged { state });
                } else {
                    log::debug!("control request ignored while a delegation is active");
                }
            }
            SignalEvent::GrantControl => {
                if session.control.granted() {
                    self.emit(SessionEventKind::ControlChanged {
                        state: ControlState::GrantedAsRequester,
                    });
                } else {
                    log::debug!("stale grant-control signal ignored");
                }
            }
            SignalEvent::RevokeControl => {
                session.control.reset();
                self.emit(SessionEventKind::ControlChanged {
                    state: ControlState::Idle,
                });
            }
            SignalEvent::Chat {
                username,
                message,
                timestamp,
            } => {
                let entry = ChatMessage {
                    username,
                    message,
                    timestamp,
                };
                session.chat.push(entry.clone());
                self.emit(SessionEventKind::ChatReceived { message: entry });
            }
            SignalEvent::TrackToggle { sid, kind, enabled } => {
                session.registry.apply_track_toggle(&sid, kind, enabled);
                let flags = session
                    .registry
                    .get(&sid)
                    .map(|p| (p.mic_muted, p.camera_off));
                if let Some((mic_muted, camera_off)) = flags {
                    self.emit(SessionEventKind::TrackStateChanged {
                        sid,
                        mic_muted,
                        camera_off,
                    });
                }
            }
        }
    }

    fn handle_activity(&mut self, event: ActivityEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event.key {
            MonitorKey::Local => {
                self.emit(if event.speaking {
                    SessionEventKind::SelfSpeaking
                } else {
                    SessionEventKind::SelfNotSpeaking
                });
            }
            MonitorKey::Peer(sid) => {
                if session.registry.set_speaking(&sid, event.speaking) {
                    self.emit(if event.speaking {
                        SessionEventKind::ParticipantSpeaking { sid }
                    } else {
                        SessionEventKind::ParticipantNotSpeaking { sid }
                    });
                }
            }
        }
    }
}
