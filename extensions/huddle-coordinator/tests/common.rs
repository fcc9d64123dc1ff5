#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use huddle::error::Error;
use huddle::media::{
    AnalysisContext, CaptureConstraints, DeviceDescriptor, DisplayCapture, MediaHost, MediaStream,
    MediaStreamId, MediaTrack, StreamAnalyser, TrackKind,
};
use huddle::session::MeetingLauncher;
use huddle::sync::{Arc, Mutex};
use huddle::signaling::{CallSignal, SignalEvent, SignalingChannel};
use huddle_coordinator::{Args, SessionCoordinator};

pub async fn timeout<F>(duration: Duration, future: F) -> anyhow::Result<F::Output>
where
    F: std::future::Future,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {duration:?}"))
}

pub struct MockTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for MockTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub fn media_stream(kinds: &[TrackKind]) -> MediaStream {
    MediaStream::new(
        kinds
            .iter()
            .map(|kind| MockTrack::new(*kind) as Arc<dyn MediaTrack>)
            .collect(),
    )
}

struct MockAnalyser {
    level: Arc<AtomicU8>,
    disposed: Arc<AtomicUsize>,
}

impl StreamAnalyser for MockAnalyser {
    fn frequency_data(&mut self) -> Vec<u8> {
        vec![self.level.load(Ordering::SeqCst); 16]
    }

    fn dispose(&mut self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Analysis context whose per-stream amplitude is driven by the test.
#[derive(Default)]
pub struct MockAnalysisContext {
    levels: Mutex<HashMap<MediaStreamId, Arc<AtomicU8>>>,
    pub analysers_created: AtomicUsize,
    pub analysers_disposed: Arc<AtomicUsize>,
}

impl MockAnalysisContext {
    pub fn set_level(&self, id: MediaStreamId, level: u8) {
        self.levels
            .lock()
            .entry(id)
            .or_default()
            .store(level, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.analysers_created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.analysers_disposed.load(Ordering::SeqCst)
    }
}

impl AnalysisContext for MockAnalysisContext {
    fn create_analyser(&self, stream: &MediaStream) -> Result<Box<dyn StreamAnalyser>, Error> {
        if stream.track(TrackKind::Audio).is_none() {
            return Err(Error::MissingTrack(TrackKind::Audio));
        }
        let level = self.levels.lock().entry(stream.id()).or_default().clone();
        self.analysers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockAnalyser {
            level,
            disposed: self.analysers_disposed.clone(),
        }))
    }
}

#[derive(Default)]
pub struct MockMediaHost {
    pub devices: Mutex<Vec<DeviceDescriptor>>,
    pub enumeration_unsupported: AtomicBool,
    /// Taken on the next `acquire_capture` call.
    pub capture_error: Mutex<Option<Error>>,
    /// Taken on the next `acquire_display` call.
    pub display_error: Mutex<Option<Error>>,
    pub captured: Mutex<Vec<MediaStream>>,
    pub displays: Mutex<Vec<MediaStream>>,
    /// Fire one of these to simulate the platform "stop sharing" affordance.
    pub display_ended: Mutex<Vec<oneshot::Sender<()>>>,
    pub contexts_created: AtomicUsize,
    pub analysis: Arc<MockAnalysisContext>,
}

impl MockMediaHost {
    pub fn last_capture(&self) -> MediaStream {
        self.captured.lock().last().cloned().expect("a capture stream")
    }

    pub fn last_display(&self) -> MediaStream {
        self.displays.lock().last().cloned().expect("a display stream")
    }
}

#[async_trait]
impl MediaHost for MockMediaHost {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, Error> {
        if self.enumeration_unsupported.load(Ordering::SeqCst) {
            return Err(Error::DeviceEnumerationUnsupported);
        }
        Ok(self.devices.lock().clone())
    }

    async fn acquire_capture(
        &self,
        _constraints: CaptureConstraints,
    ) -> Result<MediaStream, Error> {
        if let Some(e) = self.capture_error.lock().take() {
            return Err(e);
        }
        let stream = media_stream(&[TrackKind::Audio, TrackKind::Video]);
        self.captured.lock().push(stream.clone());
        Ok(stream)
    }

    async fn acquire_display(&self) -> Result<DisplayCapture, Error> {
        if let Some(e) = self.display_error.lock().take() {
            return Err(e);
        }
        // display capture carries video only
        let stream = media_stream(&[TrackKind::Video]);
        let (tx, rx) = oneshot::channel();
        self.displays.lock().push(stream.clone());
        self.display_ended.lock().push(tx);
        Ok(DisplayCapture { stream, ended: rx })
    }

    fn create_analysis_context(&self) -> Result<Arc<dyn AnalysisContext>, Error> {
        self.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(self.analysis.clone())
    }
}

#[derive(Default)]
pub struct MockSignaling {
    pub local_streams: Mutex<Vec<MediaStream>>,
    pub joined: Mutex<Vec<(String, String)>>,
    pub leaves: AtomicUsize,
    pub replaced: Mutex<Vec<(MediaStreamId, MediaStream)>>,
    pub sent: Mutex<Vec<CallSignal>>,
    /// Taken on the next `join_room` call.
    pub join_error: Mutex<Option<Error>>,
}

impl MockSignaling {
    pub fn sent_signals(&self) -> Vec<CallSignal> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    fn set_local_stream(&self, stream: MediaStream) {
        self.local_streams.lock().push(stream);
    }

    async fn join_room(&self, room_id: &str, username: &str) -> Result<(), Error> {
        if let Some(e) = self.join_error.lock().take() {
            return Err(e);
        }
        self.joined
            .lock()
            .push((room_id.to_string(), username.to_string()));
        Ok(())
    }

    async fn leave_room(&self) -> Result<(), Error> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_stream(&self, old: MediaStreamId, new: MediaStream) -> Result<(), Error> {
        self.replaced.lock().push((old, new));
        Ok(())
    }

    fn send(&self, signal: CallSignal) -> Result<(), Error> {
        self.sent.lock().push(signal);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockLauncher {
    pub opened: Mutex<Vec<String>>,
}

impl MeetingLauncher for MockLauncher {
    fn open_external(&self, url: &str) -> Result<(), Error> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}

pub struct TestHarness {
    pub coordinator: SessionCoordinator,
    pub media: Arc<MockMediaHost>,
    pub signaling: Arc<MockSignaling>,
    pub launcher: Arc<MockLauncher>,
    pub signal_tx: UnboundedSender<SignalEvent>,
}

pub fn setup() -> TestHarness {
    let media = Arc::new(MockMediaHost::default());
    let signaling = Arc::new(MockSignaling::default());
    let launcher = Arc::new(MockLauncher::default());
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let coordinator = SessionCoordinator::new(Args {
        media: media.clone(),
        signaling: signaling.clone(),
        launcher: launcher.clone(),
        signal_rx,
    });
    TestHarness {
        coordinator,
        media,
        signaling,
        launcher,
        signal_tx,
    }
}
