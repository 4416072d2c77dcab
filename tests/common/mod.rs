//! Shared test utilities
//!
//! A scripted speech backend and a fake audio source, both reporting what
//! they hold through a shared [`Probe`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wakeword_listener::voice::{
    AudioSource, CaptureError, CaptureSession, CaptureSpec, DecoderError, FrameSink, LoadError,
    ModelCache, ModelRef, Recognizer, SpeechBackend, SpeechModel, TranscriptEvent,
};
use wakeword_listener::{Listener, ListenerOptions, ListenerSnapshot, WakeWordConfig};

/// Resource counters shared by the fakes
#[derive(Debug, Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    pub recognizers_created: AtomicUsize,
    pub live_recognizers: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub live_sessions: AtomicUsize,
    pub decoded: AtomicUsize,
}

impl Probe {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn live_recognizers(&self) -> usize {
        self.live_recognizers.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    /// Nothing is held open
    pub fn at_baseline(&self) -> bool {
        self.live_recognizers() == 0 && self.live_sessions() == 0
    }
}

/// What the recognizer does with the next frame
#[derive(Debug, Clone)]
pub enum Reply {
    Events(Vec<TranscriptEvent>),
    Fail,
}

pub fn partial(text: &str) -> Reply {
    Reply::Events(vec![TranscriptEvent::Partial(text.to_string())])
}

pub fn final_(text: &str) -> Reply {
    Reply::Events(vec![TranscriptEvent::Final(text.to_string())])
}

/// Speech backend whose recognizers replay queued replies, one per frame
pub struct ScriptedBackend {
    pub probe: Arc<Probe>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    load_delay: Duration,
    decode_delay: Duration,
    fail_load: AtomicBool,
    sample_rate: u32,
}

impl ScriptedBackend {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            script: Arc::new(Mutex::new(VecDeque::new())),
            load_delay: Duration::from_millis(50),
            decode_delay: Duration::ZERO,
            fail_load: AtomicBool::new(false),
            sample_rate: 16_000,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Make every decoded frame take `delay`
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Queue the reply for the next decoded frame
    pub fn script(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }
}

impl SpeechBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn load_model(&self, model: &ModelRef) -> Result<Arc<dyn SpeechModel>, LoadError> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);

        if self.fail_load.load(Ordering::SeqCst) {
            return Err(LoadError::NotFound(model.path().to_path_buf()));
        }

        Ok(Arc::new(ScriptedModel {
            probe: Arc::clone(&self.probe),
            script: Arc::clone(&self.script),
            decode_delay: self.decode_delay,
            sample_rate: self.sample_rate,
        }))
    }
}

struct ScriptedModel {
    probe: Arc<Probe>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    decode_delay: Duration,
    sample_rate: u32,
}

impl SpeechModel for ScriptedModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_recognizer(&self) -> Result<Box<dyn Recognizer>, DecoderError> {
        self.probe.recognizers_created.fetch_add(1, Ordering::SeqCst);
        self.probe.live_recognizers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRecognizer {
            probe: Arc::clone(&self.probe),
            script: Arc::clone(&self.script),
            decode_delay: self.decode_delay,
        }))
    }
}

struct ScriptedRecognizer {
    probe: Arc<Probe>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    decode_delay: Duration,
}

impl Recognizer for ScriptedRecognizer {
    fn accept(&mut self, _samples: &[f32]) -> Result<Vec<TranscriptEvent>, DecoderError> {
        std::thread::sleep(self.decode_delay);
        self.probe.decoded.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Reply::Events(events)) => Ok(events),
            Some(Reply::Fail) => Err(DecoderError::Decode("scripted failure".to_string())),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for ScriptedRecognizer {
    fn drop(&mut self) {
        self.probe.live_recognizers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Audio source driven by the test instead of a device
pub struct FakeAudioSource {
    pub probe: Arc<Probe>,
    deny: AtomicBool,
    sample_rate: Option<u32>,
    sink: Mutex<Option<FrameSink>>,
}

impl FakeAudioSource {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            deny: AtomicBool::new(false),
            sample_rate: None,
            sink: Mutex::new(None),
        }
    }

    /// Report `rate` from opened sessions regardless of the request
    pub fn with_session_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Refuse microphone permission on open
    pub fn deny_permission(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Deliver one frame to the current session
    pub fn push_frame(&self) -> bool {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sink| sink.push(vec![0.0; 160]))
    }

    /// Raise a capture fault on the current session
    pub fn inject_fault(&self, error: CaptureError) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.fault(error);
        }
    }
}

impl AudioSource for FakeAudioSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn open(
        &self,
        spec: &CaptureSpec,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("denied by test".to_string()));
        }

        *self.sink.lock().unwrap() = Some(sink);
        self.probe.live_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            probe: Arc::clone(&self.probe),
            open: true,
            sample_rate: self.sample_rate.unwrap_or(spec.sample_rate),
        }))
    }
}

struct FakeSession {
    probe: Arc<Probe>,
    open: bool,
    sample_rate: u32,
}

impl CaptureSession for FakeSession {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            self.probe.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Listener options for the fakes: small frames, test model path
pub fn options() -> ListenerOptions {
    ListenerOptions {
        model: ModelRef::new("/models/test", 16_000),
        capture: CaptureSpec {
            frame_size: 160,
            queue_frames: 16,
            ..CaptureSpec::default()
        },
        activation: wakeword_listener::ActivationPolicy::default(),
    }
}

/// Everything one listener test needs
pub struct Harness {
    pub probe: Arc<Probe>,
    pub backend: Arc<ScriptedBackend>,
    pub source: Arc<FakeAudioSource>,
    pub cache: Arc<ModelCache>,
    pub activations: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        let probe = Arc::new(Probe::default());
        Self::with(
            ScriptedBackend::new(Arc::clone(&probe)),
            FakeAudioSource::new(Arc::clone(&probe)),
        )
    }

    pub fn with(backend: ScriptedBackend, source: FakeAudioSource) -> Self {
        let probe = Arc::clone(&backend.probe);
        let backend = Arc::new(backend);
        let cache = Arc::new(ModelCache::new(Arc::clone(&backend) as Arc<dyn SpeechBackend>));
        Self {
            probe,
            backend,
            source: Arc::new(source),
            cache,
            activations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wake config for `phrase` counting activations
    pub fn wake(&self, phrase: &str) -> WakeWordConfig {
        let activations = Arc::clone(&self.activations);
        WakeWordConfig::new(phrase, move || {
            activations.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn listener(&self, phrase: &str) -> Listener {
        Listener::spawn(
            options(),
            self.wake(phrase),
            Arc::clone(&self.cache),
            Arc::clone(&self.source) as Arc<dyn AudioSource>,
        )
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

/// Fail the test instead of hanging
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// Wait for a snapshot matching `predicate`
pub async fn until(
    listener: &Listener,
    predicate: impl FnMut(&ListenerSnapshot) -> bool,
) -> ListenerSnapshot {
    within(listener.wait_until(predicate)).await.unwrap()
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
