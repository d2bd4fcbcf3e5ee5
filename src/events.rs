use crate::geometry::ViewPoint;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::debug;

/// Events surfaced to the host over the scan session.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A symbol was decoded. Corner points are in view coordinates, in the
    /// order the decoder reported them. Emitted at most once per admitted
    /// frame.
    Decoded {
        text: String,
        points: Vec<ViewPoint>,
        timestamp: SystemTime,
    },
    /// Preview frames started flowing.
    PreviewStarted,
    /// Preview frames stopped.
    PreviewStopped,
    /// The torch was switched.
    TorchChanged { enabled: bool },
}

impl ScanEvent {
    /// Event type string for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::Decoded { .. } => "decoded",
            ScanEvent::PreviewStarted => "preview_started",
            ScanEvent::PreviewStopped => "preview_stopped",
            ScanEvent::TorchChanged { .. } => "torch_changed",
        }
    }
}

/// Broadcast fan-out of [`ScanEvent`]s to host subscribers.
///
/// Publishing never blocks the capture path. With no live subscribers an
/// event is silently dropped; the sink being gone is not an error.
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ScanEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!("Event delivered to {} subscriber(s)", receivers),
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for {} event; dropped", event.event_type());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
