//! Typed publish/subscribe for scanner events
//!
//! Subscribers receive every published event on their own unbounded channel.
//! Dropping a `Subscription` (or calling `unsubscribe`) removes it from the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::scanner::syntax::PatternMatchEvent;
use crate::scanner::temporal::TemporalMention;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// A syntax match was observed in a document. Drives the orchestrator.
    PatternMatched { event: PatternMatchEvent },
    /// Temporal expressions found during a scan cycle.
    TemporalDetected {
        document_id: String,
        mentions: Vec<TemporalMention>,
        full_text: String,
    },
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::PatternMatched { .. } => "pattern-matched",
            ScanEvent::TemporalDetected { .. } => "temporal:detected",
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            ScanEvent::PatternMatched { event } => &event.document_id,
            ScanEvent::TemporalDetected { document_id, .. } => document_id,
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<ScanEvent>>,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(id, tx);
        trace!(subscription = id, "subscribed");
        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.state),
        }
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: ScanEvent) -> usize {
        let mut state = lock(&self.state);
        let mut delivered = 0;
        state.subscribers.retain(|_, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        trace!(event = event.name(), delivered, "published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

/// Receiving end of a bus subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ScanEvent>,
    bus: Weak<Mutex<BusState>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ScanEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.bus.upgrade() {
            lock(&state).subscribers.remove(&self.id);
        }
    }
}
