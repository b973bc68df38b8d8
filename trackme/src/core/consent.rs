/*!
Consent: the per-sink gate for untargeted events
*/

use std::collections::HashMap;
use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use crate::core::sink::SinkId;

/// External key-value store of sink identity to consent.
///
/// Implementations serialize their own reads and writes; several sinks may share
/// one store and the tracker does not lock around it.
pub trait ConsentStorage: Send + Sync {
    /// Unknown sinks have not consented
    fn get_consent(&self, sink: &SinkId) -> bool;

    fn set_consent(&self, sink: &SinkId, consent: bool);
}

/// Process-local consent store
#[derive(Debug, Default)]
pub struct InMemoryConsentStorage {
    entries: RwLock<HashMap<SinkId, bool>>,
}

impl InMemoryConsentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConsentStorage for InMemoryConsentStorage {
    fn get_consent(&self, sink: &SinkId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sink)
            .copied()
            .unwrap_or(false)
    }

    fn set_consent(&self, sink: &SinkId, consent: bool) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sink.clone(), consent);
    }
}

/// How the tracker reads and writes one sink's consent
pub trait ConsentGate: Send + Sync {
    fn get(&self) -> bool;

    fn set(&self, consent: bool);
}

/// Consent held by the sink itself
#[derive(Debug, Default)]
pub struct LocalConsent(AtomicBool);

impl LocalConsent {
    pub fn new(consent: bool) -> Self {
        Self(AtomicBool::new(consent))
    }
}

impl ConsentGate for LocalConsent {
    fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, consent: bool) {
        self.0.store(consent, Ordering::SeqCst);
    }
}

/// Consent delegated to a shared [`ConsentStorage`], keyed by the owning sink's id
#[derive(Clone)]
pub struct SharedConsent {
    sink: SinkId,
    storage: Arc<dyn ConsentStorage>,
}

impl SharedConsent {
    pub fn new(sink: SinkId, storage: Arc<dyn ConsentStorage>) -> Self {
        Self { sink, storage }
    }

    pub fn storage(&self) -> &Arc<dyn ConsentStorage> {
        &self.storage
    }
}

impl ConsentGate for SharedConsent {
    fn get(&self) -> bool {
        self.storage.get_consent(&self.sink)
    }

    fn set(&self, consent: bool) {
        self.storage.set_consent(&self.sink, consent);
    }
}
