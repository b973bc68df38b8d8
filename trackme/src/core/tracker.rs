/*!
Async coordinator that drives every registered sink through its lifecycle
*/

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use futures::{
    FutureExt,
    future::BoxFuture,
    stream::{FuturesUnordered, StreamExt},
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{
    error::TrackError,
    event::Event,
    listener::SinkStateListener,
    sink::{PlatformContext, Sink, SinkId, SinkOutcome, SinkResult},
};

/// The four lifecycle operations a sink goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialize,
    Start,
    Log,
    Finish,
}

impl Phase {
    fn pending(self) -> Option<SinkPhase> {
        match self {
            Phase::Initialize => Some(SinkPhase::Initializing),
            Phase::Start => Some(SinkPhase::Starting),
            Phase::Finish => Some(SinkPhase::Finishing),
            Phase::Log => None,
        }
    }

    fn settled(self, success: bool) -> Option<SinkPhase> {
        match (self, success) {
            (Phase::Initialize, true) => Some(SinkPhase::Initialized),
            (Phase::Initialize, false) => Some(SinkPhase::InitFailed),
            (Phase::Start, true) => Some(SinkPhase::Started),
            (Phase::Start, false) => Some(SinkPhase::StartFailed),
            (Phase::Finish, true) => Some(SinkPhase::Finished),
            (Phase::Finish, false) => Some(SinkPhase::FinishFailed),
            (Phase::Log, _) => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Initialize => "initialize",
            Phase::Start => "start",
            Phase::Log => "log",
            Phase::Finish => "finish",
        })
    }
}

/// Last lifecycle state the tracker observed for a sink.
///
/// Failed states are not terminal; calling the operation again is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkPhase {
    Registered,
    Initializing,
    Initialized,
    InitFailed,
    Starting,
    Started,
    StartFailed,
    Finishing,
    Finished,
    FinishFailed,
}

/// Per-sink results of one lifecycle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub phase: Phase,
    /// Operations that settled normally, including declined ones
    pub outcomes: Vec<SinkOutcome>,
    /// Sinks whose operation faulted, panicked or timed out
    pub faulted: Vec<SinkId>,
}

impl LifecycleReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            outcomes: Vec::new(),
            faulted: Vec::new(),
        }
    }

    /// How many sinks the call was dispatched to
    pub fn dispatched(&self) -> usize {
        self.outcomes.len() + self.faulted.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &SinkId> {
        self.outcomes.iter().filter(|o| o.success).map(|o| &o.id)
    }

    /// Sinks that ran but reported `success == false`
    pub fn declined(&self) -> impl Iterator<Item = &SinkId> {
        self.outcomes.iter().filter(|o| !o.success).map(|o| &o.id)
    }

    pub fn is_clean(&self) -> bool {
        self.faulted.is_empty() && self.outcomes.iter().all(|o| o.success)
    }
}

/// Staged configuration for a [`Tracker`]
pub struct TrackerBuilder {
    sinks: Vec<Arc<dyn Sink>>,
    consent_override: Option<bool>,
    silent_crashing: bool,
    listener: Option<Arc<dyn SinkStateListener>>,
    blocking: bool,
    operation_timeout: Option<Duration>,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            consent_override: None,
            silent_crashing: true,
            listener: None,
            blocking: false,
            operation_timeout: None,
        }
    }

    /// Register a sink. A later sink with the same id replaces the earlier one.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn Sink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// When enabled, `value` replaces every sink's own consent for untargeted events
    pub fn with_consent_override(mut self, enabled: bool, value: bool) -> Self {
        self.consent_override = enabled.then_some(value);
        self
    }

    /// Turn sink faults into listener notifications (default) instead of returning them
    pub fn with_silent_crashing(mut self, silent_crashing: bool) -> Self {
        self.silent_crashing = silent_crashing;
        self
    }

    pub fn with_sink_listener(mut self, listener: Arc<dyn SinkStateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Recorded for callers that choose between awaiting and spawning lifecycle calls
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Bound every sink operation; an elapsed deadline counts as a fault
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Freeze the configuration
    pub fn freeze(self) -> TrackerSettings {
        let mut sinks: HashMap<SinkId, Arc<dyn Sink>> = HashMap::with_capacity(self.sinks.len());
        for sink in self.sinks {
            let id = sink.id().clone();
            if sinks.insert(id.clone(), sink).is_some() {
                warn!(sink = %id, "sink registered twice, keeping the last registration");
            }
        }

        TrackerSettings {
            sinks,
            consent_override: self.consent_override,
            silent_crashing: self.silent_crashing,
            listener: self.listener,
            blocking: self.blocking,
            operation_timeout: self.operation_timeout,
        }
    }

    pub fn build(self) -> Tracker {
        Tracker::new(self.freeze())
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable tracker configuration produced by [`TrackerBuilder::freeze`]
pub struct TrackerSettings {
    sinks: HashMap<SinkId, Arc<dyn Sink>>,
    consent_override: Option<bool>,
    silent_crashing: bool,
    listener: Option<Arc<dyn SinkStateListener>>,
    blocking: bool,
    operation_timeout: Option<Duration>,
}

impl TrackerSettings {
    pub fn sink_ids(&self) -> impl Iterator<Item = &SinkId> {
        self.sinks.keys()
    }

    pub fn sink(&self, id: &SinkId) -> Option<&Arc<dyn Sink>> {
        self.sinks.get(id)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn consent_override(&self) -> Option<bool> {
        self.consent_override
    }

    pub fn silent_crashing(&self) -> bool {
        self.silent_crashing
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }
}

impl fmt::Debug for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerSettings")
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .field("consent_override", &self.consent_override)
            .field("silent_crashing", &self.silent_crashing)
            .field("listener", &self.listener.is_some())
            .field("blocking", &self.blocking)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

type SinkCall<'a> = (SinkId, BoxFuture<'a, SinkResult>);

enum Settled {
    Resolved(SinkOutcome),
    Faulted(TrackError),
    Panicked(Box<dyn Any + Send>),
}

/// Main tracker that coordinates all sinks
pub struct Tracker {
    settings: TrackerSettings,
    phases: Mutex<HashMap<SinkId, SinkPhase>>,
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        let phases = settings
            .sinks
            .keys()
            .map(|id| (id.clone(), SinkPhase::Registered))
            .collect();

        info!("Tracker configured with {} sinks", settings.sinks.len());
        Self {
            settings,
            phases: Mutex::new(phases),
        }
    }

    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn sink_phase(&self, id: &SinkId) -> Option<SinkPhase> {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    /// Initialize every registered sink concurrently.
    ///
    /// Each settled sink is reported to the listener, then `on_all_sinks_initialized`
    /// fires exactly once.
    pub async fn initialize(&self, context: &PlatformContext) -> Result<LifecycleReport, TrackError> {
        let calls = self
            .settings
            .sinks
            .iter()
            .map(|(id, sink)| (id.clone(), sink.initialize(context)))
            .collect();
        self.dispatch(Phase::Initialize, calls).await
    }

    /// Start every registered sink concurrently. There is no aggregate "all started".
    pub async fn start(&self) -> Result<LifecycleReport, TrackError> {
        let calls = self
            .settings
            .sinks
            .iter()
            .map(|(id, sink)| (id.clone(), sink.start()))
            .collect();
        self.dispatch(Phase::Start, calls).await
    }

    /// Deliver an event to every eligible sink. Successful deliveries are silent.
    pub async fn log(&self, event: &Event) -> Result<LifecycleReport, TrackError> {
        let calls = self
            .eligible_sinks(event)
            .into_iter()
            .map(|(id, sink)| (id.clone(), sink.log(event)))
            .collect();
        self.dispatch(Phase::Log, calls).await
    }

    pub async fn finish(&self) -> Result<LifecycleReport, TrackError> {
        let calls = self
            .settings
            .sinks
            .iter()
            .map(|(id, sink)| (id.clone(), sink.finish()))
            .collect();
        self.dispatch(Phase::Finish, calls).await
    }

    /// Give consent to the named sinks; returns the ids whose consent changed
    pub fn set_consent_true(&self, ids: &[SinkId]) -> Vec<SinkId> {
        self.set_consent(ids, true)
    }

    /// Withdraw consent from the named sinks; returns the ids whose consent changed
    pub fn set_consent_false(&self, ids: &[SinkId]) -> Vec<SinkId> {
        self.set_consent(ids, false)
    }

    /// Give consent and start exactly the sinks that did not have it yet
    pub async fn grant_consent(&self, ids: &[SinkId]) -> Result<LifecycleReport, TrackError> {
        let changed = self.set_consent_true(ids);
        let calls = self
            .registered(&changed)
            .map(|(id, sink)| (id.clone(), sink.start()))
            .collect();
        self.dispatch(Phase::Start, calls).await
    }

    /// Withdraw consent and finish exactly the sinks that had it
    pub async fn revoke_consent(&self, ids: &[SinkId]) -> Result<LifecycleReport, TrackError> {
        let changed = self.set_consent_false(ids);
        let calls = self
            .registered(&changed)
            .map(|(id, sink)| (id.clone(), sink.finish()))
            .collect();
        self.dispatch(Phase::Finish, calls).await
    }

    pub fn spawn_initialize(
        self: &Arc<Self>,
        context: PlatformContext,
    ) -> JoinHandle<Result<LifecycleReport, TrackError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.initialize(&context).await })
    }

    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<Result<LifecycleReport, TrackError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.start().await })
    }

    pub fn spawn_log(self: &Arc<Self>, event: Event) -> JoinHandle<Result<LifecycleReport, TrackError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.log(&event).await })
    }

    pub fn spawn_finish(self: &Arc<Self>) -> JoinHandle<Result<LifecycleReport, TrackError>> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.finish().await })
    }

    /// Whether a sink accepts untargeted events right now
    pub fn has_consent(&self, sink: &dyn Sink) -> bool {
        self.settings
            .consent_override
            .unwrap_or_else(|| sink.consent().get())
    }

    fn eligible_sinks<'a>(&'a self, event: &Event) -> Vec<(&'a SinkId, &'a Arc<dyn Sink>)> {
        if event.is_targeted() {
            let eligible: Vec<_> = event
                .targets()
                .iter()
                .filter_map(|id| self.settings.sinks.get_key_value(id))
                .collect();
            if eligible.len() < event.targets().len() {
                debug!(
                    event = event.id(),
                    "{} targeted sinks are not registered",
                    event.targets().len() - eligible.len()
                );
            }
            eligible
        } else {
            self.settings
                .sinks
                .iter()
                .filter(|&(_, sink)| self.has_consent(sink.as_ref()))
                .collect()
        }
    }

    fn registered<'a>(
        &'a self,
        ids: &'a [SinkId],
    ) -> impl Iterator<Item = (&'a SinkId, &'a Arc<dyn Sink>)> + 'a {
        ids.iter().filter_map(|id| self.settings.sinks.get_key_value(id))
    }

    fn set_consent(&self, ids: &[SinkId], consent: bool) -> Vec<SinkId> {
        let changed: Vec<SinkId> = self
            .registered(ids)
            .filter(|(_, sink)| sink.consent().get() != consent)
            .map(|(id, sink)| {
                sink.consent().set(consent);
                id.clone()
            })
            .collect();

        debug!(consent, "consent changed for {} sinks", changed.len());
        changed
    }

    fn mark(&self, id: &SinkId, phase: Option<SinkPhase>) {
        if let Some(phase) = phase {
            self.phases
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), phase);
        }
    }

    /// Run one operation per sink concurrently and fan the results out to the listener
    async fn dispatch(&self, phase: Phase, calls: Vec<SinkCall<'_>>) -> Result<LifecycleReport, TrackError> {
        info!("Dispatching {} to {} sinks", phase, calls.len());

        let mut pending: FuturesUnordered<_> = calls
            .into_iter()
            .map(|(id, call)| {
                self.mark(&id, phase.pending());
                self.settle(id, phase, call)
            })
            .collect();

        let mut report = LifecycleReport::new(phase);
        let mut faults = Vec::new();
        let mut panic_payload = None;

        while let Some((id, settled)) = pending.next().await {
            match settled {
                Settled::Resolved(outcome) => {
                    debug!(sink = %id, success = outcome.success, "{} settled", phase);
                    self.mark(&id, phase.settled(outcome.success));
                    self.notify_settled(phase, &id);
                    report.outcomes.push(outcome);
                }
                Settled::Faulted(error) => {
                    warn!("{}", error);
                    self.mark(&id, phase.settled(false));
                    report.faulted.push(id);
                    if self.settings.silent_crashing {
                        self.notify_fault(phase, &error);
                    } else {
                        faults.push(error);
                    }
                }
                Settled::Panicked(payload) => {
                    let error = TrackError::SinkPanicked {
                        sink: id.clone(),
                        phase,
                        message: panic_message(payload.as_ref()),
                    };
                    warn!("{}", error);
                    self.mark(&id, phase.settled(false));
                    report.faulted.push(id);
                    if self.settings.silent_crashing {
                        self.notify_fault(phase, &error);
                    } else if panic_payload.is_none() {
                        panic_payload = Some(payload);
                    }
                }
            }
        }

        if phase == Phase::Initialize {
            if let Some(listener) = self.settings.listener.as_deref() {
                listener.on_all_sinks_initialized();
            }
        }

        // siblings have all settled; only now let a sink's panic escape
        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }
        if !faults.is_empty() {
            return Err(TrackError::Propagated { phase, faults });
        }
        Ok(report)
    }

    async fn settle(&self, id: SinkId, phase: Phase, call: BoxFuture<'_, SinkResult>) -> (SinkId, Settled) {
        let call = AssertUnwindSafe(call).catch_unwind();
        let result = match self.settings.operation_timeout {
            Some(after) => match tokio::time::timeout(after, call).await {
                Ok(result) => result,
                Err(_) => {
                    let error = TrackError::TimedOut { sink: id.clone(), phase, after };
                    return (id, Settled::Faulted(error));
                }
            },
            None => call.await,
        };

        let settled = match result {
            Ok(Ok(outcome)) => Settled::Resolved(outcome),
            Ok(Err(source)) => Settled::Faulted(TrackError::SinkFault {
                sink: id.clone(),
                phase,
                source,
            }),
            Err(payload) => Settled::Panicked(payload),
        };
        (id, settled)
    }

    fn notify_settled(&self, phase: Phase, id: &SinkId) {
        let Some(listener) = self.settings.listener.as_deref() else {
            return;
        };
        match phase {
            Phase::Initialize => listener.on_sink_initialized(id),
            Phase::Start => listener.on_sink_started(id),
            Phase::Finish => listener.on_sink_finished(id),
            Phase::Log => {}
        }
    }

    fn notify_fault(&self, phase: Phase, error: &TrackError) {
        let Some(listener) = self.settings.listener.as_deref() else {
            return;
        };
        match phase {
            Phase::Initialize => listener.on_sink_init_error(error),
            _ => listener.on_error(error),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
