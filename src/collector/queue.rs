/**
 * ============================================================================
 * EVENT QUEUE MODULE
 * ============================================================================
 *
 * PURPOSE: In-process buffer between the watchers and the batch sender
 *
 * QUEUE BEHAVIOR:
 * - Many producers (EventSink is cheap to clone), one consumer (EventDrain)
 * - enqueue never blocks and never drops while the drain is alive
 * - Unbounded: an outage grows memory, not loss
 * - Per-producer order is preserved; no order across producers
 *
 * ============================================================================
 */

use crate::events::{Event, EventKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/**
 * Create a connected sink/drain pair
 * hostname is stamped on every event produced through the sink
 */
pub fn event_queue(hostname: impl Into<String>) -> (EventSink, EventDrain) {
    let hostname: String = hostname.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));

    let sink = EventSink {
        tx,
        hostname: Arc::from(hostname),
        depth: Arc::clone(&depth),
    };
    let drain = EventDrain { rx, depth };
    (sink, drain)
}

/**
 * Producer handle
 * Clone one per watcher
 */
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
    hostname: Arc<str>,
    depth: Arc<AtomicUsize>,
}

impl EventSink {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Stamp `kind` with the current time and enqueue it.
    pub fn emit(&self, kind: EventKind) {
        self.emit_at(Utc::now(), kind);
    }

    pub fn emit_at(&self, timestamp: DateTime<Utc>, kind: EventKind) {
        self.enqueue(Event::new(timestamp, &*self.hostname, kind));
    }

    pub fn enqueue(&self, event: Event) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.tx.send(event) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            log::warn!("Event queue closed, dropping {} event", rejected.0.type_name());
        }
    }

    /// Events enqueued but not yet drained.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/**
 * Consumer handle, owned by the batch sender
 */
pub struct EventDrain {
    rx: mpsc::UnboundedReceiver<Event>,
    depth: Arc<AtomicUsize>,
}

impl EventDrain {
    /**
     * Take everything currently queued, oldest first
     * Returns an empty vector when nothing is waiting
     */
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        if !events.is_empty() {
            self.depth.fetch_sub(events.len(), Ordering::SeqCst);
        }
        events
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}
