/**
 * ============================================================================
 * POINTER IDLE MODULE
 * ============================================================================
 *
 * PURPOSE: Report when the mouse stops moving and when it starts again
 *
 * STATE MACHINE (initial Active, last move = start time):
 *   Active --no move for idle_threshold--> Idle    emits mouse_idle
 *   Idle   --move-->                       Active  emits mouse_active
 *
 * Every move also counts as activity for the AFK detector.
 *
 * ============================================================================
 */

use crate::collector::EventSink;
use crate::events::EventKind;
use crate::events::types::whole_seconds_between;
use crate::watchers::afk::AfkDetector;
use crate::watchers::lock;
use crate::watchers::source::PointerSignal;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PointerIdleState {
    last_move: DateTime<Utc>,
    idle_since: Option<DateTime<Utc>>,
}

impl PointerIdleState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_move: now,
            idle_since: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    pub fn on_move(&mut self, signal: &PointerSignal) -> Option<EventKind> {
        if signal.at > self.last_move {
            self.last_move = signal.at;
        }

        let idle_start = self.idle_since.take()?;
        Some(EventKind::MouseActive {
            x: signal.x,
            y: signal.y,
            idle_duration_seconds: whole_seconds_between(idle_start, signal.at),
        })
    }

    pub fn poll(&mut self, now: DateTime<Utc>, threshold: TimeDelta) -> Option<EventKind> {
        if self.is_idle() || now - self.last_move < threshold {
            return None;
        }

        self.idle_since = Some(now);
        Some(EventKind::MouseIdle {
            idle_seconds: whole_seconds_between(self.last_move, now),
        })
    }
}

/**
 * Pointer watcher: consumes move signals and polls for idleness
 */
pub struct PointerIdleTracker {
    state: Mutex<PointerIdleState>,
    threshold: TimeDelta,
    sink: EventSink,
    afk: Arc<AfkDetector>,
}

impl PointerIdleTracker {
    pub fn new(idle_threshold_seconds: u64, sink: EventSink, afk: Arc<AfkDetector>) -> Self {
        Self {
            state: Mutex::new(PointerIdleState::new(Utc::now())),
            threshold: TimeDelta::seconds(idle_threshold_seconds as i64),
            sink,
            afk,
        }
    }

    pub fn on_move(&self, signal: &PointerSignal) {
        self.afk.record_activity(signal.at);

        let mut state = lock(&self.state);
        if let Some(event) = state.on_move(signal) {
            self.sink.emit_at(signal.at, event);
        }
    }

    pub fn poll(&self, now: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(event) = state.poll(now, self.threshold) {
            log::debug!("Mouse idle since {}", state.last_move);
            self.sink.emit_at(now, event);
        }
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.state).is_idle()
    }

    pub async fn run(
        self: Arc<Self>,
        mut moves: mpsc::Receiver<PointerSignal>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        log::info!("Pointer watcher started (idle after {}s)", self.threshold.num_seconds());
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut input_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll(Utc::now()),
                signal = moves.recv(), if input_open => match signal {
                    Some(signal) => self.on_move(&signal),
                    None => {
                        log::debug!("Pointer input closed, idle polling continues");
                        input_open = false;
                    }
                },
            }
        }
        log::info!("Pointer watcher stopped");
    }
}
