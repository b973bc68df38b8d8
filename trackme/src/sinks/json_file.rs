/*!
JSON lines sink: appends one serialized event per line to a file
*/

use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{
    consent::{ConsentGate, ConsentStorage, SharedConsent},
    event::Event,
    sink::{PlatformContext, Sink, SinkId, SinkOutcome, SinkResult},
};

/// File handle plus where it points, once `initialize` has resolved it
#[derive(Default)]
struct Journal {
    path: Option<PathBuf>,
    file: Option<File>,
}

/// Sink whose consent lives in a shared [`ConsentStorage`](crate::core::consent::ConsentStorage)
pub struct JsonFileSink {
    id: SinkId,
    path: PathBuf,
    consent: SharedConsent,
    initialized: AtomicBool,
    journal: Mutex<Journal>,
}

impl JsonFileSink {
    /// `path` is resolved against the platform data dir unless it is absolute.
    /// Consent is read from and written to `storage` under this sink's id.
    pub fn new(id: SinkId, path: PathBuf, storage: Arc<dyn ConsentStorage>) -> Self {
        Self {
            consent: SharedConsent::new(id.clone(), storage),
            id,
            path,
            initialized: AtomicBool::new(false),
            journal: Mutex::new(Journal::default()),
        }
    }

    async fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path).await
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn id(&self) -> &SinkId {
        &self.id
    }

    fn consent(&self) -> &dyn ConsentGate {
        &self.consent
    }

    async fn initialize(&self, context: &PlatformContext) -> SinkResult {
        let path = context.data_dir.join(&self.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = Self::open(&path).await?;
        debug!(sink = %self.id, path = %path.display(), "journal opened");

        let mut journal = self.journal.lock().await;
        journal.path = Some(path);
        journal.file = Some(file);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(SinkOutcome::succeeded(&self.id))
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn start(&self) -> SinkResult {
        let mut journal = self.journal.lock().await;
        if journal.file.is_none() {
            let Some(path) = journal.path.clone() else {
                return Ok(SinkOutcome::declined(&self.id));
            };
            journal.file = Some(Self::open(&path).await?);
        }
        Ok(SinkOutcome::succeeded(&self.id))
    }

    async fn log(&self, event: &Event) -> SinkResult {
        // one compact object per line
        let line = serde_json::to_string(event)?;

        let mut journal = self.journal.lock().await;
        let Some(file) = journal.file.as_mut() else {
            // not initialized, or finished already
            return Ok(SinkOutcome::declined(&self.id));
        };
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(SinkOutcome::succeeded(&self.id))
    }

    async fn finish(&self) -> SinkResult {
        let mut journal = self.journal.lock().await;
        if let Some(mut file) = journal.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(SinkOutcome::succeeded(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consent::InMemoryConsentStorage;

    fn sink() -> (JsonFileSink, Arc<InMemoryConsentStorage>) {
        let storage = Arc::new(InMemoryConsentStorage::new());
        let sink = JsonFileSink::new(
            SinkId::new("journal"),
            PathBuf::from("logs/events.jsonl"),
            storage.clone(),
        );
        (sink, storage)
    }

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let context = PlatformContext::new("test", dir.path());
        let (sink, _) = sink();

        assert!(sink.initialize(&context).await.unwrap().success);
        assert!(sink.is_initialized());
        assert!(sink.start().await.unwrap().success);
        for name in ["opened", "closed"] {
            let event = Event::builder(name).attribute("k", "v").build().unwrap();
            assert!(sink.log(&event).await.unwrap().success);
        }
        assert!(sink.finish().await.unwrap().success);

        let written = tokio::fs::read_to_string(dir.path().join("logs/events.jsonl"))
            .await
            .unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "opened");
    }

    #[tokio::test]
    async fn every_line_is_a_whole_event() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = sink();
        sink.initialize(&PlatformContext::new("test", dir.path()))
            .await
            .unwrap();

        for name in ["a", "b"] {
            let event = Event::builder(name)
                .attribute("user", "42")
                .attribute("plan", "pro")
                .target("journal")
                .build()
                .unwrap();
            sink.log(&event).await.unwrap();
        }
        sink.finish().await.unwrap();

        let written = tokio::fs::read_to_string(dir.path().join("logs/events.jsonl"))
            .await
            .unwrap();
        let ids: Vec<String> = written
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn declines_events_outside_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = sink();
        let event = Event::builder("early").build().unwrap();

        // before initialize
        assert!(!sink.log(&event).await.unwrap().success);
        assert!(!sink.start().await.unwrap().success);

        sink.initialize(&PlatformContext::new("test", dir.path()))
            .await
            .unwrap();
        sink.finish().await.unwrap();

        // after finish, until the next start
        assert!(!sink.log(&event).await.unwrap().success);
        sink.start().await.unwrap();
        assert!(sink.log(&event).await.unwrap().success);
    }

    #[test]
    fn consent_is_keyed_by_the_sink_id() {
        let (sink, storage) = sink();
        assert!(!sink.consent().get());

        sink.consent().set(true);
        assert!(storage.get_consent(&SinkId::new("journal")));
    }
}
