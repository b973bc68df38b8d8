/*!
Lifecycle notifications fanned out by the tracker
*/

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

use crate::core::{error::TrackError, sink::SinkId};

/// Receives lifecycle notifications as sink operations settle.
///
/// Calls arrive from whatever task settled the operation, possibly several at
/// once, so implementations must be thread safe. Nothing orders notifications
/// for different sinks.
pub trait SinkStateListener: Send + Sync {
    fn on_sink_initialized(&self, _sink: &SinkId) {}

    /// Any fault raised while initializing, whichever sink it came from
    fn on_sink_init_error(&self, _error: &TrackError) {}

    fn on_sink_started(&self, _sink: &SinkId) {}

    fn on_sink_finished(&self, _sink: &SinkId) {}

    /// Fired once per `initialize`, after every sink has settled
    fn on_all_sinks_initialized(&self) {}

    /// Faults from start, log and finish
    fn on_error(&self, _error: &TrackError) {}
}

/// Owned snapshot of a single listener callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkNotification {
    Initialized(SinkId),
    InitError { sink: Option<SinkId>, message: String },
    Started(SinkId),
    Finished(SinkId),
    AllInitialized,
    Error { sink: Option<SinkId>, message: String },
}

impl SinkNotification {
    pub fn init_error(error: &TrackError) -> Self {
        Self::InitError {
            sink: error.sink().cloned(),
            message: error.to_string(),
        }
    }

    pub fn error(error: &TrackError) -> Self {
        Self::Error {
            sink: error.sink().cloned(),
            message: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::InitError { .. } | Self::Error { .. })
    }
}

/// Forwards every callback into an unbounded channel, consumed as a stream
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SinkNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, UnboundedReceiverStream<SinkNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    fn send(&self, notification: SinkNotification) {
        // receiver gone means nobody is listening anymore
        let _ = self.tx.send(notification);
    }
}

impl SinkStateListener for ChannelListener {
    fn on_sink_initialized(&self, sink: &SinkId) {
        self.send(SinkNotification::Initialized(sink.clone()));
    }

    fn on_sink_init_error(&self, error: &TrackError) {
        self.send(SinkNotification::init_error(error));
    }

    fn on_sink_started(&self, sink: &SinkId) {
        self.send(SinkNotification::Started(sink.clone()));
    }

    fn on_sink_finished(&self, sink: &SinkId) {
        self.send(SinkNotification::Finished(sink.clone()));
    }

    fn on_all_sinks_initialized(&self) {
        self.send(SinkNotification::AllInitialized);
    }

    fn on_error(&self, error: &TrackError) {
        self.send(SinkNotification::error(error));
    }
}

/// Reports each callback as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl SinkStateListener for TracingListener {
    fn on_sink_initialized(&self, sink: &SinkId) {
        info!(%sink, "sink initialized");
    }

    fn on_sink_init_error(&self, error: &TrackError) {
        warn!("sink init error: {}", error);
    }

    fn on_sink_started(&self, sink: &SinkId) {
        info!(%sink, "sink started");
    }

    fn on_sink_finished(&self, sink: &SinkId) {
        info!(%sink, "sink finished");
    }

    fn on_all_sinks_initialized(&self) {
        info!("all sinks initialized");
    }

    fn on_error(&self, error: &TrackError) {
        error!("sink error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::Phase;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn channel_listener_streams_callbacks_in_call_order() {
        let (listener, stream) = ChannelListener::new();
        let console = SinkId::new("console");

        listener.on_sink_initialized(&console);
        listener.on_all_sinks_initialized();
        listener.on_error(&TrackError::SinkFault {
            sink: console.clone(),
            phase: Phase::Log,
            source: "disk full".into(),
        });
        drop(listener);

        let received: Vec<_> = stream.collect().await;
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], SinkNotification::Initialized(console.clone()));
        assert_eq!(received[1], SinkNotification::AllInitialized);
        assert!(received[2].is_error());
        assert!(matches!(
            &received[2],
            SinkNotification::Error { sink: Some(sink), message } if *sink == console && message.contains("disk full")
        ));
    }

    #[test]
    fn sends_after_receiver_dropped_are_ignored() {
        let (listener, stream) = ChannelListener::new();
        drop(stream);
        listener.on_sink_started(&SinkId::new("console"));
    }
}
