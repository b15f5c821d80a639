use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Lifecycle notification raised by a [`crate::dtu::DtuServer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DtuEvent {
    /// A trusted device registered and its link is bound.
    ClientConnected { id: String, peer: SocketAddr },
    /// A bound link was lost, superseded by shutdown or de-trusted.
    ClientOffline { id: String },
    /// A device presented an identifier that is not trusted.
    Rejected { id: String, peer: SocketAddr },
    /// A transaction on a device's link failed at the transport level.
    NetworkError { id: String, message: String },
}

impl DtuEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::ClientConnected { id, .. }
            | Self::ClientOffline { id }
            | Self::Rejected { id, .. }
            | Self::NetworkError { id, .. } => id,
        }
    }
}

/// Publish without waiting; having no subscriber is not an error.
pub(crate) fn emit(events: &broadcast::Sender<DtuEvent>, event: DtuEvent) {
    trace!(?event, "dtu event");
    let _ = events.send(event);
}

/// Feed every event to `handler` until the server and its devices are gone.
pub(crate) async fn drain<F>(mut rx: broadcast::Receiver<DtuEvent>, mut handler: F)
where
    F: FnMut(DtuEvent),
{
    loop {
        match rx.recv().await {
            Ok(event) => handler(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event handler lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_skips_lag_and_stops_on_close() {
        let (tx, rx) = broadcast::channel(2);
        for i in 0..4 {
            emit(&tx, DtuEvent::ClientOffline { id: format!("D{i}") });
        }
        drop(tx);

        let mut seen = Vec::new();
        drain(rx, |event| seen.push(event.id().to_string())).await;
        assert_eq!(seen, ["D2", "D3"]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = DtuEvent::Rejected {
            id: "DTU03".to_string(),
            peer: "10.0.0.7:50000".parse().unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "rejected");
        assert_eq!(json["id"], "DTU03");
        assert_eq!(json["peer"], "10.0.0.7:50000");
    }
}
