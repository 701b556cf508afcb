/**
 * ============================================================================
 * KEY SEGMENTER MODULE
 * ============================================================================
 *
 * PURPOSE: Group key presses into bursts separated by idle gaps
 *
 * A segment opens on the first key and closes once no key has arrived for
 * key_idle_timeout. It is then emitted as one key_count_segment event.
 * Only the most recent keystrokes are kept for the payload; the count
 * always reflects every key in the segment.
 *
 * ============================================================================
 */

use crate::collector::EventSink;
use crate::events::types::whole_seconds_between;
use crate::events::{EventKind, Keystroke};
use crate::watchers::afk::AfkDetector;
use crate::watchers::lock;
use crate::watchers::source::KeySignal;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Keystrokes carried in a single segment payload.
pub const MAX_KEYSTROKES_PER_SEGMENT: usize = 100;

#[derive(Debug, Clone)]
struct OpenSegment {
    start: DateTime<Utc>,
    last_key: DateTime<Utc>,
    count: u64,
    keystrokes: VecDeque<Keystroke>,
}

#[derive(Debug, Clone, Default)]
pub struct KeySegmentState {
    open: Option<OpenSegment>,
}

impl KeySegmentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn on_key(&mut self, signal: &KeySignal) {
        let segment = self.open.get_or_insert_with(|| OpenSegment {
            start: signal.at,
            last_key: signal.at,
            count: 0,
            keystrokes: VecDeque::with_capacity(MAX_KEYSTROKES_PER_SEGMENT),
        });

        segment.count += 1;
        if signal.at > segment.last_key {
            segment.last_key = signal.at;
        }
        if segment.keystrokes.len() == MAX_KEYSTROKES_PER_SEGMENT {
            segment.keystrokes.pop_front();
        }
        segment.keystrokes.push_back(Keystroke {
            key: signal.label.clone(),
            timestamp: signal.at,
        });
    }

    /**
     * Close the segment if the keyboard has been quiet for `idle_timeout`
     */
    pub fn poll(&mut self, now: DateTime<Utc>, idle_timeout: TimeDelta) -> Option<EventKind> {
        let quiet = self
            .open
            .as_ref()
            .is_some_and(|segment| segment.count > 0 && now - segment.last_key >= idle_timeout);
        if !quiet {
            return None;
        }
        self.close()
    }

    /// Close whatever is open, regardless of timing.
    pub fn close(&mut self) -> Option<EventKind> {
        let segment = self.open.take()?;
        Some(EventKind::KeyCountSegment {
            count: segment.count,
            keystrokes: segment.keystrokes.into_iter().collect(),
            start_time: segment.start,
            end_time: segment.last_key,
            duration_seconds: whole_seconds_between(segment.start, segment.last_key),
        })
    }
}

/**
 * Key watcher: consumes key signals and closes idle segments
 */
pub struct KeySegmenter {
    state: Mutex<KeySegmentState>,
    idle_timeout: TimeDelta,
    sink: EventSink,
    afk: Arc<AfkDetector>,
}

impl KeySegmenter {
    pub fn new(idle_timeout_seconds: u64, sink: EventSink, afk: Arc<AfkDetector>) -> Self {
        Self {
            state: Mutex::new(KeySegmentState::new()),
            idle_timeout: TimeDelta::seconds(idle_timeout_seconds as i64),
            sink,
            afk,
        }
    }

    pub fn on_key(&self, signal: &KeySignal) {
        self.afk.record_activity(signal.at);
        lock(&self.state).on_key(signal);
    }

    pub fn poll(&self, now: DateTime<Utc>) {
        let segment = lock(&self.state).poll(now, self.idle_timeout);
        if let Some(event) = segment {
            self.sink.emit_at(now, event);
        }
    }

    pub async fn run(
        self: Arc<Self>,
        mut keys: mpsc::Receiver<KeySignal>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        log::info!("Key segmenter started (idle gap {}s)", self.idle_timeout.num_seconds());
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut input_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll(Utc::now()),
                signal = keys.recv(), if input_open => match signal {
                    Some(signal) => self.on_key(&signal),
                    None => {
                        log::debug!("Key input closed, segment polling continues");
                        input_open = false;
                    }
                },
            }
        }

        // A burst still open at shutdown would otherwise be lost
        let pending = lock(&self.state).close();
        if let Some(event) = pending {
            self.sink.emit(event);
        }
        log::info!("Key segmenter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::event_queue;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key(label: &str, secs: i64) -> KeySignal {
        KeySignal::new(label, ts(secs))
    }

    const IDLE: TimeDelta = TimeDelta::seconds(10);

    #[test]
    fn test_segment_closes_after_idle_gap() {
        let mut state = KeySegmentState::new();
        state.on_key(&key("a", 0));
        state.on_key(&key("Key.space", 2));
        state.on_key(&key("b", 4));

        assert!(state.poll(ts(13), IDLE).is_none());
        match state.poll(ts(14), IDLE) {
            Some(EventKind::KeyCountSegment {
                count,
                keystrokes,
                start_time,
                end_time,
                duration_seconds,
            }) => {
                assert_eq!(count, 3);
                let labels: Vec<&str> = keystrokes.iter().map(|k| k.key.as_str()).collect();
                assert_eq!(labels, vec!["a", "space", "b"]);
                assert_eq!(start_time, ts(0));
                assert_eq!(end_time, ts(4));
                assert_eq!(duration_seconds, 4);
            }
            other => panic!("expected a key segment, got {:?}", other),
        }
        assert!(!state.is_open());
        assert!(state.poll(ts(30), IDLE).is_none());
    }

    #[test]
    fn test_keystroke_list_capped_but_count_exact() {
        let mut state = KeySegmentState::new();
        for i in 0..150 {
            state.on_key(&KeySignal {
                label: format!("k{}", i),
                at: ts(0),
            });
        }

        match state.poll(ts(10), IDLE) {
            Some(EventKind::KeyCountSegment {
                count, keystrokes, ..
            }) => {
                assert_eq!(count, 150);
                assert_eq!(keystrokes.len(), MAX_KEYSTROKES_PER_SEGMENT);
                assert_eq!(keystrokes[0].key, "k50");
                assert_eq!(keystrokes[99].key, "k149");
            }
            other => panic!("expected a key segment, got {:?}", other),
        }
    }

    #[test]
    fn test_steady_typing_keeps_one_segment() {
        let mut state = KeySegmentState::new();
        for second in 0..60 {
            state.on_key(&key("x", second));
            assert!(state.poll(ts(second), IDLE).is_none());
        }
        assert!(state.is_open());
    }

    #[test]
    fn test_keys_notify_afk_detector() {
        let (sink, mut drain) = event_queue("desk-01");
        let afk = Arc::new(AfkDetector::starting_at(ts(0), 20, sink.clone()));
        let segmenter = KeySegmenter::new(10, sink, afk.clone());

        afk.poll(ts(25));
        segmenter.on_key(&key("a", 30));
        segmenter.poll(ts(45));

        let kinds: Vec<&str> = drain.drain().iter().map(|e| e.type_name()).collect();
        assert_eq!(kinds, vec!["afk_start", "afk_end", "key_count_segment"]);
    }

    #[tokio::test]
    async fn test_open_segment_flushed_on_stop() {
        let (sink, mut drain) = event_queue("desk-01");
        let afk = Arc::new(AfkDetector::new(3600, sink.clone()));
        let segmenter = Arc::new(KeySegmenter::new(3600, sink, afk));

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(segmenter.run(rx, Duration::from_millis(20), cancel.clone()));

        tx.send(KeySignal::new("q", Utc::now())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        let events = drain.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].type_name(), "key_count_segment");
    }
}
