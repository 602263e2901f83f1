//! Shared test utilities
//!
//! Fakes for the microphone, speaker and backend so conversations run
//! without audio hardware or network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sitevoice::capability::{Capabilities, Completer, Synthesizer, Transcriber};
use sitevoice::conversation::{ContextAssembler, ConversationTurn, SiteContent, SiteEntry};
use sitevoice::engine::{ConversationEngine, EngineConfig, EngineHandle, EngineState, HostInterface};
use sitevoice::voice::{
    AudioCaptureSession, AudioClip, DecodedAudio, InputStream, Microphone, ResourceTracker,
    SilenceConfig, Speaker, SpeechPlaybackSession,
};
use sitevoice::{Error, ErrorKind, Result};

/// Sample rate used by the fake microphone
pub const TEST_RATE: u32 = 16_000;

/// Length of one fake microphone frame
pub const FRAME: Duration = Duration::from_millis(20);

const FRAME_SAMPLES: usize = 320;

/// An hour: long enough to count as "never" in paused-time tests
pub const HANG: Duration = Duration::from_secs(3600);

/// Ordered record of interesting events across fakes
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

/// What the fake microphone delivers for one capture
#[derive(Debug, Clone, Copy)]
pub enum MicScript {
    /// 300 ms of speech, then silence
    Speech,
    /// Silence only
    Silence,
    /// Speech that never stops
    Continuous,
    /// A few frames, then a device error
    Fail,
}

/// Microphone that plays back scripted frames
///
/// Each `open` takes the next script; once the queue is empty every capture
/// is silent.
#[derive(Debug, Default)]
pub struct FakeMicrophone {
    scripts: Mutex<VecDeque<MicScript>>,
    open_delays: Mutex<VecDeque<Duration>>,
    deny: AtomicBool,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn new(scripts: impl IntoIterator<Item = MicScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Delay successive opens; later opens are immediate
    pub fn with_open_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.open_delays.lock().unwrap().extend(delays);
        self
    }

    pub fn denied() -> Self {
        let mic = Self::default();
        mic.deny.store(true, Ordering::SeqCst);
        mic
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tracks currently held
    pub fn live_tracks(&self) -> usize {
        self.opened() - self.released()
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> Result<InputStream> {
        let delay = self.open_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("user blocked microphone".to_string()));
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MicScript::Silence);
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut sent = 0usize;
            loop {
                let elapsed = FRAME * u32::try_from(sent).unwrap();
                let frame = match script {
                    MicScript::Speech if elapsed < Duration::from_millis(300) => Ok(tone(0.3)),
                    MicScript::Continuous => Ok(tone(0.3)),
                    MicScript::Fail if sent >= 5 => {
                        Err(Error::Capture("device disconnected".to_string()))
                    }
                    MicScript::Fail => Ok(tone(0.3)),
                    _ => Ok(vec![0.0; FRAME_SAMPLES]),
                };
                let failed = frame.is_err();
                if tx.send(frame).await.is_err() || failed {
                    // keep the channel open after an error so the session sees it first
                    if failed {
                        tokio::time::sleep(HANG).await;
                    }
                    return;
                }
                sent += 1;
                tokio::time::sleep(FRAME).await;
            }
        });

        let released = Arc::clone(&self.released);
        Ok(InputStream::new(rx, TEST_RATE, move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

fn tone(amplitude: f32) -> Vec<f32> {
    (0..FRAME_SAMPLES)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

/// Speaker that "plays" by sleeping
#[derive(Debug)]
pub struct FakeSpeaker {
    delay: Duration,
    fail: bool,
    plays: AtomicUsize,
    log: EventLog,
}

impl FakeSpeaker {
    pub fn new(delay: Duration, log: EventLog) -> Self {
        Self {
            delay,
            fail: false,
            plays: AtomicUsize::new(0),
            log,
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(Duration::from_millis(100), log)
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Speaker for FakeSpeaker {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("play:{}", audio.samples.len()));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::Playback("output device lost".to_string()));
        }
        self.log.push("played");
        Ok(())
    }
}

/// Transcriber, completer and synthesizer with scripted answers
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    transcripts: Mutex<VecDeque<Result<String>>>,
    replies: Mutex<VecDeque<Result<String>>>,
    synthesis_errors: Mutex<VecDeque<Error>>,
    pub transcribe_delay: Duration,
    pub complete_delay: Duration,
    pub synthesize_delay: Duration,
    transcribe_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    spoken: Mutex<Vec<String>>,
    log: EventLog,
}

impl ScriptedBackend {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Queue transcripts; an exhausted queue transcribes to ""
    pub fn with_transcripts<'a>(self, transcripts: impl IntoIterator<Item = &'a str>) -> Self {
        self.transcripts
            .lock()
            .unwrap()
            .extend(transcripts.into_iter().map(|t| Ok(t.to_string())));
        self
    }

    pub fn with_transcript_error(self, error: Error) -> Self {
        self.transcripts.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue completion texts; an exhausted queue replies "Okay."
    pub fn with_replies<'a>(self, replies: impl IntoIterator<Item = &'a str>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(|r| Ok(r.to_string())));
        self
    }

    /// Fail the next synthesis with `error`
    pub fn with_synthesis_error(self, error: Error) -> Self {
        self.synthesis_errors.lock().unwrap().push_back(error);
        self
    }

    pub fn transcribe_calls(&self) -> usize {
        self.transcribe_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedBackend {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(clip.mime, "audio/wav");
        tokio::time::sleep(self.transcribe_delay).await;
        self.transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[async_trait]
impl Completer for ScriptedBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.log.push("complete");
        self.prompts.lock().unwrap().push(prompt.to_string());
        tokio::time::sleep(self.complete_delay).await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Okay.".to_string()))
    }
}

#[async_trait]
impl Synthesizer for ScriptedBackend {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.log.push("synthesize");
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.synthesize_delay).await;
        let failure = self.synthesis_errors.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        AudioClip::from_samples(&vec![0.1; 1600], TEST_RATE)
    }
}

/// Host that records everything it is told
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub states: Mutex<Vec<EngineState>>,
    pub mic: Mutex<Vec<bool>>,
    pub errors: Mutex<Vec<ErrorKind>>,
    pub redirects: Mutex<Vec<String>>,
    log: EventLog,
}

impl RecordingHost {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn states(&self) -> Vec<EngineState> {
        self.states.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.errors.lock().unwrap().clone()
    }

    pub fn mic_enabled(&self) -> Option<bool> {
        self.mic.lock().unwrap().last().copied()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl HostInterface for RecordingHost {
    fn set_mic_enabled(&self, enabled: bool) {
        self.mic.lock().unwrap().push(enabled);
    }

    fn state_changed(&self, state: EngineState) {
        self.states.lock().unwrap().push(state);
    }

    fn show_error(&self, error: &Error) {
        self.errors.lock().unwrap().push(error.kind());
    }

    fn append_bubble(&self, turn: &ConversationTurn) {
        self.log.push(format!("bubble:{}:{}", turn.role(), turn.content()));
    }

    fn redirect(&self, url: &str) {
        self.redirects.lock().unwrap().push(url.to_string());
    }
}

/// A small site with a pricing page
pub fn demo_site() -> SiteContent {
    SiteContent {
        pages: vec![
            SiteEntry {
                title: "Pricing".to_string(),
                url: "/pricing".to_string(),
                content: "Plans start at $10 per month.".to_string(),
            },
            SiteEntry {
                title: "About".to_string(),
                url: "/about".to_string(),
                content: "We build widgets.".to_string(),
            },
        ],
        posts: Vec::new(),
        products: Vec::new(),
        current_page: Some(SiteEntry {
            title: "Home".to_string(),
            url: "/".to_string(),
            content: "Welcome to Acme.".to_string(),
        }),
    }
}

/// A running engine wired to fakes
pub struct Harness {
    pub handle: EngineHandle,
    pub mic: Arc<FakeMicrophone>,
    pub speaker: Arc<FakeSpeaker>,
    pub backend: Arc<ScriptedBackend>,
    pub host: Arc<RecordingHost>,
    pub resources: ResourceTracker,
    pub log: EventLog,
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    mic: FakeMicrophone,
    speaker_delay: Duration,
    speaker_fails: bool,
    backend: ScriptedBackend,
    config: EngineConfig,
    max_capture: Duration,
    log: EventLog,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            mic: FakeMicrophone::default(),
            speaker_delay: Duration::from_millis(500),
            speaker_fails: false,
            backend: ScriptedBackend::new(log.clone()),
            config: EngineConfig::default(),
            max_capture: Duration::from_secs(30),
            log,
        }
    }

    pub fn mic(mut self, mic: FakeMicrophone) -> Self {
        self.mic = mic;
        self
    }

    pub fn speaker_delay(mut self, delay: Duration) -> Self {
        self.speaker_delay = delay;
        self
    }

    pub fn failing_speaker(mut self) -> Self {
        self.speaker_fails = true;
        self
    }

    pub fn backend(mut self, build: impl FnOnce(ScriptedBackend) -> ScriptedBackend) -> Self {
        let log = self.log.clone();
        self.backend = build(std::mem::replace(&mut self.backend, ScriptedBackend::new(log)));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_capture(mut self, max: Duration) -> Self {
        self.max_capture = max;
        self
    }

    /// Spawn the engine; must run inside a tokio runtime
    pub fn spawn(self) -> Harness {
        let resources = ResourceTracker::new();
        let mic = Arc::new(self.mic);
        let speaker = Arc::new(if self.speaker_fails {
            FakeSpeaker::failing(self.log.clone())
        } else {
            FakeSpeaker::new(self.speaker_delay, self.log.clone())
        });
        let backend = Arc::new(self.backend);
        let host = Arc::new(RecordingHost::new(self.log.clone()));

        let capture = AudioCaptureSession::new(
            Arc::clone(&mic) as Arc<dyn Microphone>,
            SilenceConfig::default(),
            resources.clone(),
        )
        .with_max_duration(self.max_capture);
        let playback =
            SpeechPlaybackSession::new(Arc::clone(&speaker) as Arc<dyn Speaker>, resources.clone());
        let capabilities = Capabilities {
            transcriber: Arc::clone(&backend) as Arc<dyn Transcriber>,
            completer: Arc::clone(&backend) as Arc<dyn Completer>,
            synthesizer: Arc::clone(&backend) as Arc<dyn Synthesizer>,
        };

        let handle =
            ConversationEngine::new(self.config, capture, playback, capabilities, resources.clone())
                .with_context(ContextAssembler::new("Acme".to_string(), 500), demo_site())
                .with_host(Arc::clone(&host) as Arc<dyn HostInterface>)
                .spawn();

        Harness {
            handle,
            mic,
            speaker,
            backend,
            host,
            resources,
            log: self.log,
        }
    }
}

/// Poll `condition` while letting (paused) time advance
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
