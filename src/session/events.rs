//! Per-session event log with replay.
//!
//! The log is append-only and owned by one producer. Every subscriber reads
//! it through its own cursor, so an observer attaching late first replays
//! everything from the start and then follows live, never missing or
//! duplicating an event. The log closes on the first terminal event.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::{ActionRecord, ErrorKind, Outcome, SessionMode};
use crate::backend::{BackendKind, Screenshot};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Started {
        task: String,
        mode: SessionMode,
        backend: BackendKind,
        max_steps: u32,
    },
    StepStarted,
    Progress {
        record: ActionRecord,
        screenshot: Screenshot,
    },
    Warning {
        message: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    AwaitingConfirmation,
    Resumed,
    Finished(Outcome),
}

impl EventKind {
    /// Wire name, as carried in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepStarted => "step_started",
            Self::Progress { .. } => "progress",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Resumed => "resumed",
            Self::Finished(_) => "finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub seq: u64,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<SessionEvent>,
    closed: bool,
}

#[derive(Debug)]
pub struct EventLog {
    session_id: Uuid,
    inner: Mutex<Inner>,
    notify: watch::Sender<usize>,
}

impl EventLog {
    pub fn new(session_id: Uuid) -> Arc<Self> {
        let (notify, _) = watch::channel(0);
        Arc::new(Self {
            session_id,
            inner: Mutex::new(Inner::default()),
            notify,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while holding the lock; recover the data if it ever does.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event. Returns its sequence number, or `None` once closed.
    pub fn emit(&self, step_index: Option<u32>, kind: EventKind) -> Option<u64> {
        let len = {
            let mut inner = self.lock();
            if inner.closed {
                tracing::debug!(session_id = %self.session_id, "Dropping event after close");
                return None;
            }
            if kind.is_terminal() {
                inner.closed = true;
            }
            let seq = inner.events.len() as u64;
            inner.events.push(SessionEvent {
                seq,
                session_id: self.session_id,
                step_index,
                timestamp: Utc::now(),
                kind,
            });
            inner.events.len()
        };
        self.notify.send_replace(len);
        Some(len as u64 - 1)
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Copy of every event emitted so far.
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.lock().events.clone()
    }

    /// Follow the log from its first event.
    pub fn subscribe(self: &Arc<Self>) -> EventSubscription {
        EventSubscription {
            rx: self.notify.subscribe(),
            log: self.clone(),
            cursor: 0,
        }
    }
}

/// One observer's position in an [`EventLog`].
pub struct EventSubscription {
    log: Arc<EventLog>,
    cursor: usize,
    rx: watch::Receiver<usize>,
}

impl EventSubscription {
    /// Next event in order; `None` after the terminal event has been read.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            {
                let inner = self.log.lock();
                if let Some(event) = inner.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if inner.closed {
                    return None;
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = SessionEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.next().await {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::session::AbortReason;

    fn warning(n: u32) -> EventKind {
        EventKind::Warning {
            message: format!("w{}", n),
        }
    }

    #[tokio::test]
    async fn test_late_observer_replays_then_follows() {
        let log = EventLog::new(Uuid::new_v4());
        for i in 0..3 {
            log.emit(Some(i), warning(i));
        }

        let mut early = log.subscribe();
        assert_eq!(early.next().await.unwrap().seq, 0);

        let late = log.subscribe();
        let collector = tokio::spawn(async move { late.into_stream().collect::<Vec<_>>().await });

        log.emit(Some(3), warning(3));
        log.emit(None, EventKind::Finished(Outcome::aborted(AbortReason::Cancelled)));

        let seen = tokio::time::timeout(Duration::from_secs(1), collector)
            .await
            .unwrap()
            .unwrap();
        let seqs: Vec<u64> = seen.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(seen.last().unwrap().kind.is_terminal());

        // The early observer continues where it stopped.
        let mut rest = Vec::new();
        while let Some(event) = early.next().await {
            rest.push(event.seq);
        }
        assert_eq!(rest, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closes_exactly_once() {
        let log = EventLog::new(Uuid::new_v4());
        assert_eq!(
            log.emit(None, EventKind::Finished(Outcome::aborted(AbortReason::StepLimit))),
            Some(0)
        );
        assert!(log.is_closed());
        assert_eq!(
            log.emit(None, EventKind::Finished(Outcome::aborted(AbortReason::Cancelled))),
            None
        );
        assert_eq!(log.emit(None, warning(1)), None);
        assert_eq!(log.len(), 1);

        let mut sub = log.subscribe();
        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_event_wire_format() {
        let log = EventLog::new(Uuid::nil());
        log.emit(Some(2), EventKind::AwaitingConfirmation);
        let json = serde_json::to_value(&log.snapshot()[0]).unwrap();
        assert_eq!(json["type"], "awaiting_confirmation");
        assert_eq!(log.snapshot()[0].kind.name(), "awaiting_confirmation");
        assert_eq!(json["step_index"], 2);
        assert_eq!(json["seq"], 0);
    }
}
