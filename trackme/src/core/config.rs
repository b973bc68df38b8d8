/*!
Configuration management for the tracker
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::core::{
    consent::ConsentStorage,
    error::TrackError,
    sink::{PlatformContext, SinkId},
    tracker::TrackerBuilder,
};
use crate::sinks;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Name handed to sinks through the platform context
    pub app_name: String,
    /// Directory sinks resolve relative file paths against
    pub data_dir: PathBuf,
    /// Report sink faults to the listener instead of returning them
    pub silent_crashing: bool,
    /// Await each lifecycle phase before issuing the next one
    pub blocking: bool,
    /// Upper bound for a single sink operation
    pub operation_timeout_ms: Option<u64>,
    pub consent_override: ConsentOverrideConfig,
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConsentOverrideConfig {
    pub enabled: bool,
    pub value: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub id: SinkId,
    pub kind: SinkKind,
    /// Initial consent
    #[serde(default)]
    pub consent: bool,
    /// Whether this sink is registered at all
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Terminal output style
    #[serde(default)]
    pub format: TerminalFormat,
    /// JSON lines file, relative to `data_dir` unless absolute
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Prints to stdout, keeps consent on the sink
    Terminal,
    /// Appends JSON lines to a file, keeps consent in the shared store
    JsonFile,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalFormat {
    #[default]
    Plain,
    Colored,
    Json,
}

impl TrackerConfig {
    /// Read a TOML config file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrackError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TrackError> {
        Ok(toml::from_str(content)?)
    }

    /// `<config dir>/trackme/trackme.toml`, when the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trackme").join("trackme.toml"))
    }

    pub fn platform_context(&self) -> PlatformContext {
        PlatformContext::new(self.app_name.clone(), self.data_dir.clone())
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// A builder carrying every setting and enabled sink of this config.
    ///
    /// Shared-consent sinks read and write `storage`; their configured consent
    /// seeds it. The listener is left to the caller.
    pub fn builder(&self, storage: Arc<dyn ConsentStorage>) -> TrackerBuilder {
        let mut builder = TrackerBuilder::new()
            .with_sinks(sinks::build_sinks(&self.sinks, storage))
            .with_consent_override(self.consent_override.enabled, self.consent_override.value)
            .with_silent_crashing(self.silent_crashing)
            .with_blocking(self.blocking);

        if let Some(timeout) = self.operation_timeout() {
            builder = builder.with_operation_timeout(timeout);
        }
        builder
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            app_name: "trackme".to_string(),
            data_dir: PathBuf::from("./trackme-data"),
            silent_crashing: true,
            blocking: false,
            operation_timeout_ms: None,
            consent_override: ConsentOverrideConfig::default(),
            sinks: vec![
                SinkConfig {
                    id: SinkId::new("console"),
                    kind: SinkKind::Terminal,
                    consent: true,
                    enabled: true,
                    format: TerminalFormat::Colored,
                    path: None,
                },
                SinkConfig {
                    id: SinkId::new("journal"),
                    kind: SinkKind::JsonFile,
                    consent: false,
                    enabled: true,
                    format: TerminalFormat::default(),
                    path: Some(PathBuf::from("events.jsonl")),
                },
            ],
        }
    }
}
