/*!
Terminal sink: prints every lifecycle step and event to stdout
*/

use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;

use crate::core::{
    config::TerminalFormat,
    consent::{ConsentGate, LocalConsent},
    event::Event,
    sink::{PlatformContext, Sink, SinkId, SinkOutcome, SinkResult},
};

/// Sink with local consent that writes human-readable lines
pub struct TerminalSink {
    id: SinkId,
    format: TerminalFormat,
    consent: LocalConsent,
    initialized: AtomicBool,
}

impl TerminalSink {
    pub fn new(id: SinkId, format: TerminalFormat, consent: bool) -> Self {
        Self {
            id,
            format,
            consent: LocalConsent::new(consent),
            initialized: AtomicBool::new(false),
        }
    }

    fn format_event(&self, event: &Event) -> Result<String, serde_json::Error> {
        let mut attributes: Vec<_> = event.attributes().iter().collect();
        attributes.sort();
        let timestamp = event.occurred_at().format("%Y-%m-%d %H:%M:%S");

        Ok(match self.format {
            TerminalFormat::Plain => {
                format!("[{}] {} {} {:?}", self.id, timestamp, event.id(), attributes)
            }
            TerminalFormat::Colored => {
                format!(
                    "\x1b[36m[{}]\x1b[0m {} \x1b[1m{}\x1b[0m {:?}",
                    self.id,
                    timestamp,
                    event.id(),
                    attributes
                )
            }
            TerminalFormat::Json => serde_json::to_string(event)?,
        })
    }

    fn banner(&self, text: &str) {
        match self.format {
            TerminalFormat::Colored => println!("\x1b[32m[{}] {}\x1b[0m", self.id, text),
            _ => println!("[{}] {}", self.id, text),
        }
    }
}

#[async_trait]
impl Sink for TerminalSink {
    fn id(&self) -> &SinkId {
        &self.id
    }

    fn consent(&self) -> &dyn ConsentGate {
        &self.consent
    }

    async fn initialize(&self, context: &PlatformContext) -> SinkResult {
        self.banner(&format!("tracking for {}", context.app_name));
        self.initialized.store(true, Ordering::SeqCst);
        Ok(SinkOutcome::succeeded(&self.id))
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn start(&self) -> SinkResult {
        self.banner("session started");
        Ok(SinkOutcome::succeeded(&self.id))
    }

    async fn log(&self, event: &Event) -> SinkResult {
        println!("{}", self.format_event(event)?);
        Ok(SinkOutcome::succeeded(&self.id))
    }

    async fn finish(&self) -> SinkResult {
        self.banner("session finished");
        Ok(SinkOutcome::succeeded(&self.id))
    }
}
