//! Speaking-activity detection.
//!
//! One sampling task per analysed stream, all sharing the session-scoped
//! analysis context. Each task owns its analyser and disposes it when the
//! task winds down, so repeated join/leave churn cannot accumulate
//! audio-graph nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use huddle::error::Error;
use huddle::media::{AnalysisContext, MediaStream, StreamAnalyser};
use huddle::session::Sid;

/// Mean frequency magnitude (0-255 scale) above which a stream counts as
/// speaking. No smoothing is applied.
pub const SPEAKING_THRESHOLD: f32 = 20.0;

/// Per-frame sampling cadence.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MonitorKey {
    Local,
    Peer(Sid),
}

#[derive(Clone, Debug)]
pub struct ActivityEvent {
    pub key: MonitorKey,
    pub speaking: bool,
}

struct SamplerHandle {
    quit: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Samples every attached stream and reports speaking transitions.
pub struct ActivityMonitor {
    ctx: Arc<dyn AnalysisContext>,
    event_tx: UnboundedSender<ActivityEvent>,
    samplers: HashMap<MonitorKey, SamplerHandle>,
}

impl ActivityMonitor {
    pub fn new(ctx: Arc<dyn AnalysisContext>, event_tx: UnboundedSender<ActivityEvent>) -> Self {
        Self {
            ctx,
            event_tx,
            samplers: HashMap::new(),
        }
    }

    /// Attaches an analyser to the stream and starts its sampling loop.
    /// Re-attaching a key replaces (and disposes) the previous sampler.
    pub fn attach(&mut self, key: MonitorKey, stream: &MediaStream) -> Result<(), Error> {
        self.detach(&key);
        let analyser = self.ctx.create_analyser(stream)?;
        let quit = Arc::new(Notify::new());
        let task = tokio::spawn(sample_loop(
            key.clone(),
            analyser,
            quit.clone(),
            self.event_tx.clone(),
        ));
        self.samplers.insert(key, SamplerHandle { quit, task });
        Ok(())
    }

    /// Stops the sampling loop for this key; the loop disposes its analyser
    /// on the way out.
    pub fn detach(&mut self, key: &MonitorKey) {
        if let Some(handle) = self.samplers.remove(key) {
            handle.quit.notify_one();
        }
    }

    pub fn detach_all(&mut self) {
        for (_, handle) in self.samplers.drain() {
            handle.quit.notify_one();
        }
    }

    pub fn is_attached(&self, key: &MonitorKey) -> bool {
        self.samplers.contains_key(key)
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        for (_, handle) in self.samplers.drain() {
            handle.quit.notify_one();
            // fallback in case the runtime never polls the loop again
            handle.task.abort();
        }
    }
}

async fn sample_loop(
    key: MonitorKey,
    mut analyser: Box<dyn StreamAnalyser>,
    quit: Arc<Notify>,
    event_tx: UnboundedSender<ActivityEvent>,
) {
    let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
    let mut speaking = false;
    loop {
        tokio::select! {
            _ = quit.notified() => {
                log::debug!("sampling loop for {key:?} terminated by notify");
                break;
            }
            _ = interval.tick() => {
                let bins = analyser.frequency_data();
                if bins.is_empty() {
                    continue;
                }
                let mean =
                    bins.iter().map(|b| *b as f32).sum::<f32>() / bins.len() as f32;
                let now_speaking = mean > SPEAKING_THRESHOLD;
                if now_speaking != speaking {
                    speaking = now_speaking;
                    if event_tx
                        .send(ActivityEvent { key: key.clone(), speaking })
                        .is_err()
                    {
                        log::debug!("activity event channel closed; stopping sampler");
                        break;
                    }
                }
            }
        }
    }
    analyser.dispose();
}
