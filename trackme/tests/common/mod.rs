#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use async_trait::async_trait;

use trackme::{
    ConsentGate, ConsentStorage, Event, LocalConsent, Phase, PlatformContext, SharedConsent, Sink,
    SinkId, SinkNotification, SinkOutcome, SinkResult, SinkStateListener, TrackError,
};

/// What a scripted sink does when one of its operations is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Decline,
    Fault,
    Panic,
    /// Never settles
    Stall,
}

/// Test double whose every operation is scripted per phase
pub struct ScriptedSink {
    id: SinkId,
    consent: Box<dyn ConsentGate>,
    behaviors: HashMap<Phase, Behavior>,
    delay: Option<Duration>,
    initialized: AtomicBool,
    calls: Mutex<Vec<Phase>>,
    logged: Mutex<Vec<String>>,
}

impl ScriptedSink {
    pub fn new(id: &str) -> Self {
        Self {
            id: SinkId::new(id),
            consent: Box::new(LocalConsent::new(false)),
            behaviors: HashMap::new(),
            delay: None,
            initialized: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            logged: Mutex::new(Vec::new()),
        }
    }

    pub fn with_consent(self, consent: bool) -> Self {
        Self {
            consent: Box::new(LocalConsent::new(consent)),
            ..self
        }
    }

    /// Keep consent in `storage` instead of on the sink
    pub fn with_storage(self, storage: Arc<dyn ConsentStorage>) -> Self {
        let consent = SharedConsent::new(self.id.clone(), storage);
        Self {
            consent: Box::new(consent),
            ..self
        }
    }

    pub fn on(mut self, phase: Phase, behavior: Behavior) -> Self {
        self.behaviors.insert(phase, behavior);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, phase: Phase) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| **called == phase)
            .count()
    }

    /// Ids of the events this sink has accepted, in arrival order
    pub fn logged(&self) -> Vec<String> {
        self.logged.lock().unwrap().clone()
    }

    async fn run(&self, phase: Phase) -> SinkResult {
        self.calls.lock().unwrap().push(phase);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behaviors.get(&phase).copied().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => Ok(SinkOutcome::succeeded(&self.id)),
            Behavior::Decline => Ok(SinkOutcome::declined(&self.id)),
            Behavior::Fault => Err(format!("{} refused {}", self.id, phase).into()),
            Behavior::Panic => panic!("{} blew up during {}", self.id, phase),
            Behavior::Stall => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    fn id(&self) -> &SinkId {
        &self.id
    }

    fn consent(&self) -> &dyn ConsentGate {
        self.consent.as_ref()
    }

    async fn initialize(&self, _context: &PlatformContext) -> SinkResult {
        let result = self.run(Phase::Initialize).await;
        if let Ok(outcome) = &result {
            self.initialized.store(outcome.success, Ordering::SeqCst);
        }
        result
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn start(&self) -> SinkResult {
        self.run(Phase::Start).await
    }

    async fn log(&self, event: &Event) -> SinkResult {
        let result = self.run(Phase::Log).await;
        if matches!(&result, Ok(outcome) if outcome.success) {
            self.logged.lock().unwrap().push(event.id().to_string());
        }
        result
    }

    async fn finish(&self) -> SinkResult {
        self.run(Phase::Finish).await
    }
}

/// Listener that keeps every notification for later assertions
#[derive(Default)]
pub struct RecordingListener {
    received: Mutex<Vec<SinkNotification>>,
}

impl RecordingListener {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<SinkNotification> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&SinkNotification) -> bool) -> usize {
        self.received().iter().filter(|&n| predicate(n)).count()
    }

    fn push(&self, notification: SinkNotification) {
        self.received.lock().unwrap().push(notification);
    }
}

impl SinkStateListener for RecordingListener {
    fn on_sink_initialized(&self, sink: &SinkId) {
        self.push(SinkNotification::Initialized(sink.clone()));
    }

    fn on_sink_init_error(&self, error: &TrackError) {
        self.push(SinkNotification::init_error(error));
    }

    fn on_sink_started(&self, sink: &SinkId) {
        self.push(SinkNotification::Started(sink.clone()));
    }

    fn on_sink_finished(&self, sink: &SinkId) {
        self.push(SinkNotification::Finished(sink.clone()));
    }

    fn on_all_sinks_initialized(&self) {
        self.push(SinkNotification::AllInitialized);
    }

    fn on_error(&self, error: &TrackError) {
        self.push(SinkNotification::error(error));
    }
}

pub fn event(id: &str) -> Event {
    Event::builder(id).build().unwrap()
}

pub fn context() -> PlatformContext {
    PlatformContext::new("tests", std::env::temp_dir())
}
