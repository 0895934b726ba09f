//! Per-run event fan-out
//!
//! ```text
//!            ┌──> AuditLog (append, under lock)
//! emit(e) ───┼──> EventBus (broadcast)
//!            └──> run stream (mpsc, consumed by the caller)
//! ```

use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;

use super::bus::SharedEventBus;
use super::types::{DiagnosisEvent, RunId};
use crate::audit::SharedAuditLog;

/// Where the events of one run go
#[derive(Clone)]
pub struct EventSink {
    run_id: RunId,
    audit: Option<SharedAuditLog>,
    bus: Option<SharedEventBus>,
    stream: Option<mpsc::UnboundedSender<DiagnosisEvent>>,
}

impl EventSink {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            audit: None,
            bus: None,
            stream: None,
        }
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_stream(mut self, tx: mpsc::UnboundedSender<DiagnosisEvent>) -> Self {
        self.stream = Some(tx);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Deliver an event everywhere. Returns the audit sequence number when
    /// an audit log is attached.
    pub fn emit(&self, event: DiagnosisEvent) -> Option<u64> {
        let forward = |event: DiagnosisEvent| {
            if let Some(bus) = &self.bus {
                bus.publish(event.clone());
            }
            if let Some(tx) = &self.stream {
                // Receiver gone means the caller stopped listening
                let _ = tx.send(event);
            }
        };

        match &self.audit {
            Some(audit) => Some(audit.append_then(event, forward)),
            None => {
                forward(event);
                None
            }
        }
    }
}

/// Turn a driver future plus the receiving end of its sink into a lazy
/// stream. Nothing runs until the stream is first polled; the stream ends
/// once the driver has finished and every buffered event was yielded.
pub(crate) fn driven_stream<F, T>(
    driver: F,
    mut rx: mpsc::UnboundedReceiver<T>,
) -> BoxStream<'static, T>
where
    F: Future<Output = ()> + Send + 'static,
    T: Send + 'static,
{
    let driver = stream::once(driver).filter_map(|()| futures::future::ready(None::<T>));
    let events = stream::poll_fn(move |cx| rx.poll_recv(cx));
    stream::select(driver, events).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::events::EventBus;
    use chrono::Utc;

    fn validated(run_id: RunId) -> DiagnosisEvent {
        DiagnosisEvent::SnapshotValidated {
            run_id,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_audit_bus_and_stream() {
        let run_id = RunId::new_v4();
        let audit = AuditLog::new().shared();
        let bus = EventBus::new().shared();
        let mut bus_rx = bus.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sink = EventSink::new(run_id)
            .with_audit(audit.clone())
            .with_bus(bus)
            .with_stream(tx);

        assert_eq!(sink.emit(validated(run_id)), Some(0));
        assert_eq!(audit.len(), 1);
        assert_eq!(bus_rx.recv().await.unwrap().run_id(), run_id);
        assert_eq!(rx.recv().await.unwrap().run_id(), run_id);
    }

    #[test]
    fn test_emit_without_targets() {
        let run_id = RunId::new_v4();
        assert_eq!(EventSink::new(run_id).emit(validated(run_id)), None);
    }

    #[tokio::test]
    async fn test_driven_stream_is_lazy_and_ordered() {
        let (tx, rx) = mpsc::unbounded_channel();
        let started = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = started.clone();
        let stream = driven_stream(
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                for i in 0..5 {
                    tx.send(i).unwrap();
                    tokio::task::yield_now().await;
                }
            },
            rx,
        );

        tokio::task::yield_now().await;
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));

        let items: Vec<i32> = stream.collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }
}
