/*!
Event tracking across independently pluggable sinks.

A [`Tracker`] owns a frozen registry of [`Sink`]s, gates untargeted events on each
sink's consent, and drives every sink through `initialize → start → log* → finish`
concurrently. Results are fanned out to a [`SinkStateListener`].

```ignore
let tracker = Tracker::builder()
    .with_sink(Arc::new(TerminalSink::new("console".into(), TerminalFormat::Plain, true)))
    .with_sink_listener(Arc::new(TracingListener))
    .build();

tracker.initialize(&PlatformContext::new("shop", "./data")).await?;
tracker.start().await?;
tracker.log(&Event::builder("checkout").attribute("total", "42").build()?).await?;
tracker.finish().await?;
```
*/

pub mod core;
pub mod sinks;

pub use crate::core::{
    config::{SinkConfig, SinkKind, TerminalFormat, TrackerConfig},
    consent::{ConsentGate, ConsentStorage, InMemoryConsentStorage, LocalConsent, SharedConsent},
    error::TrackError,
    event::{Event, EventBuilder},
    listener::{ChannelListener, SinkNotification, SinkStateListener, TracingListener},
    sink::{PlatformContext, Sink, SinkFault, SinkId, SinkOutcome, SinkResult},
    tracker::{LifecycleReport, Phase, SinkPhase, Tracker, TrackerBuilder, TrackerSettings},
};
pub use crate::sinks::{JsonFileSink, TerminalSink};
