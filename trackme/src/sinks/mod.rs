/*!
Ready-made sinks and the factory that builds them from configuration
*/

pub mod json_file;
pub mod terminal;

use std::sync::Arc;
use tracing::info;

use crate::core::{
    config::{SinkConfig, SinkKind},
    consent::ConsentStorage,
    sink::Sink,
};

pub use json_file::JsonFileSink;
pub use terminal::TerminalSink;

/// Build every enabled sink. Shared-consent sinks are seeded into `storage`.
pub fn build_sinks(configs: &[SinkConfig], storage: Arc<dyn ConsentStorage>) -> Vec<Arc<dyn Sink>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

    for config in configs {
        if !config.enabled {
            continue;
        }

        let sink: Arc<dyn Sink> = match config.kind {
            SinkKind::Terminal => Arc::new(TerminalSink::new(
                config.id.clone(),
                config.format,
                config.consent,
            )),
            SinkKind::JsonFile => {
                storage.set_consent(&config.id, config.consent);
                let path = config
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("{}.jsonl", config.id).into());
                Arc::new(JsonFileSink::new(config.id.clone(), path, storage.clone()))
            }
        };

        sinks.push(sink);
    }

    info!("Built {} sinks from configuration", sinks.len());
    sinks
}
