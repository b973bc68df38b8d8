/*!
Command line driver for the trackme orchestrator
*/

use std::sync::Arc;
use std::time::Duration;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trackme::{
    ChannelListener, Event, InMemoryConsentStorage, LifecycleReport, SinkId, SinkNotification,
    TrackError, Tracker, TrackerConfig,
};

fn cli() -> Command {
    Command::new("trackme")
        .version(clap::crate_version!())
        .about("Dispatches events to consented tracking sinks")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a TOML config file")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("event")
                .short('e')
                .long("event")
                .help("Event to log, may be repeated")
                .value_name("NAME")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("attr")
                .short('a')
                .long("attr")
                .help("Attribute added to every event")
                .value_name("KEY=VALUE")
                .value_parser(parse_attribute)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .help("Only deliver to this sink, regardless of consent")
                .value_name("SINK_ID")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("grant")
                .short('g')
                .long("grant")
                .help("Grant consent to this sink before logging")
                .value_name("SINK_ID")
                .action(ArgAction::Append),
        )
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn sink_ids(matches: &ArgMatches, name: &str) -> Vec<SinkId> {
    matches
        .get_many::<String>(name)
        .map(|values| values.map(SinkId::new).collect())
        .unwrap_or_default()
}

async fn load_config(explicit: Option<&String>) -> Result<TrackerConfig, TrackError> {
    if let Some(path) = explicit {
        return TrackerConfig::load(path).await;
    }
    match TrackerConfig::default_path() {
        Some(path) if path.exists() => TrackerConfig::load(path).await,
        _ => Ok(TrackerConfig::default()),
    }
}

fn build_events(matches: &ArgMatches) -> Result<Vec<Event>, TrackError> {
    let attributes: Vec<&(String, String)> = matches
        .get_many::<(String, String)>("attr")
        .map(Iterator::collect)
        .unwrap_or_default();
    let targets = sink_ids(matches, "target");

    matches
        .get_many::<String>("event")
        .into_iter()
        .flatten()
        .map(|name| {
            attributes
                .iter()
                .fold(Event::builder(name.as_str()), |builder, (key, value)| {
                    builder.attribute(key.as_str(), value.as_str())
                })
                .targets(targets.iter().cloned())
                .build()
        })
        .collect()
}

fn summarize(report: &LifecycleReport) {
    info!(
        phase = %report.phase,
        dispatched = report.dispatched(),
        declined = report.declined().count(),
        faulted = report.faulted.len(),
        "phase settled"
    );
}

async fn session(
    tracker: &Arc<Tracker>,
    config: &TrackerConfig,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = config.platform_context();
    if tracker.settings().blocking() {
        summarize(&tracker.initialize(&context).await?);
        summarize(&tracker.start().await?);
    } else {
        summarize(&tracker.spawn_initialize(context).await??);
        summarize(&tracker.spawn_start().await??);
    }

    // every sink is already started, so granting only flips consent
    let granted = tracker.set_consent_true(&sink_ids(matches, "grant"));
    if !granted.is_empty() {
        info!(?granted, "consent granted");
    }

    for event in build_events(matches)? {
        summarize(&tracker.log(&event).await?);
    }
    Ok(())
}

/// How long to wait for pending notifications once the tracker is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Wait for the notification drain. A sink task still running after an
/// interrupt keeps the listener alive, so give up after `grace`.
async fn close_drain(mut drain: JoinHandle<()>, grace: Duration) -> Result<(), JoinError> {
    match tokio::time::timeout(grace, &mut drain).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!("listener still in use after {:?}, dropping remaining notifications", grace);
            drain.abort();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = load_config(matches.get_one::<String>("config")).await?;
    info!(
        app = %config.app_name,
        data_dir = %config.data_dir.display(),
        sinks = config.sinks.len(),
        "configuration loaded"
    );

    let (listener, mut notifications) = ChannelListener::new();
    let drain = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            match notification {
                SinkNotification::InitError { message, .. } => warn!("{}", message),
                SinkNotification::Error { message, .. } => error!("{}", message),
                other => info!(?other, "sink notification"),
            }
        }
    });

    let storage = Arc::new(InMemoryConsentStorage::new());
    let tracker = Arc::new(
        config
            .builder(storage)
            .with_sink_listener(Arc::new(listener))
            .build(),
    );

    tokio::select! {
        result = session(&tracker, &config, &matches) => {
            if let Err(e) = result {
                error!("session failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, finishing sinks");
        }
    }

    let finished = tracker.finish().await;
    // the listener lives in the tracker; dropping it closes the channel
    drop(tracker);
    close_drain(drain, DRAIN_GRACE).await?;
    summarize(&finished?);

    Ok(())
}
