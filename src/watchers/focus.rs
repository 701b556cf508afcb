/**
 * ============================================================================
 * FOCUS TRACKER MODULE
 * ============================================================================
 *
 * PURPOSE: Turn foreground-window samples into focus events
 *
 * SESSION RULES:
 * - A session is keyed by (pid, title)
 * - On a key change the old session closes with a screen_time event
 *   (only if it lasted at least one whole second), followed by a
 *   foreground_change for the new window
 * - Sessions are replaced on change, never edited
 * - A sample of None (probe had nothing) leaves the session untouched
 *
 * ============================================================================
 */

use crate::collector::EventSink;
use crate::events::EventKind;
use crate::events::types::whole_seconds_between;
use crate::watchers::source::{AddressResolver, FocusSample, ForegroundProbe};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Upper bound on one platform sample before the tick is skipped.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct FocusSession {
    pid: Option<u32>,
    title: Option<String>,
    process_name: Option<String>,
    started_at: DateTime<Utc>,
}

impl FocusSession {
    fn matches(&self, sample: &FocusSample) -> bool {
        self.pid == sample.pid && self.title == sample.title
    }

    fn close(self, now: DateTime<Utc>) -> Option<EventKind> {
        let duration_seconds = whole_seconds_between(self.started_at, now);
        if duration_seconds == 0 {
            return None;
        }
        Some(EventKind::ScreenTime {
            process_name: self.process_name,
            pid: self.pid,
            title: self.title,
            duration_seconds,
        })
    }
}

#[derive(Debug, Default)]
pub struct FocusTracker {
    session: Option<FocusSession>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /**
     * Feed one sample taken at `now`
     * Returns the events to enqueue, in order
     */
    pub fn observe(&mut self, sample: FocusSample, now: DateTime<Utc>) -> Vec<EventKind> {
        if self.session.as_ref().is_some_and(|s| s.matches(&sample)) {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(previous) = self.session.take() {
            events.extend(previous.close(now));
        }

        self.session = Some(FocusSession {
            pid: sample.pid,
            title: sample.title.clone(),
            process_name: sample.process_name.clone(),
            started_at: now,
        });
        events.push(EventKind::ForegroundChange {
            title: sample.title,
            process_name: sample.process_name,
            process_path: sample.process_path,
            pid: sample.pid,
            url: sample.address,
        });
        events
    }

    /// Close the open session at shutdown.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<EventKind> {
        self.session.take()?.close(now)
    }
}

/**
 * Take one sample: probe the foreground window, then resolve its address
 */
pub fn sample_focus(
    probe: &dyn ForegroundProbe,
    resolver: &dyn AddressResolver,
) -> Option<FocusSample> {
    let window = probe.poll_once()?;
    let address = resolver.resolve(&window);
    Some(FocusSample::from_window(window, address))
}

/**
 * Focus watcher loop
 *
 * Platform probes may block (window enumeration, UI automation), so each
 * sample runs on the blocking pool under SAMPLE_TIMEOUT. Shutdown does not
 * wait for a sample in flight.
 */
pub async fn run_focus_watcher(
    probe: Arc<dyn ForegroundProbe>,
    resolver: Arc<dyn AddressResolver>,
    sink: EventSink,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    log::info!("Focus tracker started (every {}ms)", poll_interval.as_millis());
    let mut tracker = FocusTracker::new();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let probe = probe.clone();
        let resolver = resolver.clone();
        let sampling = tokio::time::timeout(
            SAMPLE_TIMEOUT,
            tokio::task::spawn_blocking(move || sample_focus(probe.as_ref(), resolver.as_ref())),
        );
        // A slow probe must not hold up the final flush
        let sampled = tokio::select! {
            sampled = sampling => sampled,
            _ = cancel.cancelled() => break,
        };

        let sample = match sampled {
            Ok(Ok(Some(sample))) => sample,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                log::warn!("Foreground sample panicked: {}", e);
                continue;
            }
            Err(_) => {
                log::warn!("Foreground sample took longer than {:?}, skipped", SAMPLE_TIMEOUT);
                continue;
            }
        };

        let now = Utc::now();
        for event in tracker.observe(sample, now) {
            if let EventKind::ForegroundChange { process_name, .. } = &event {
                log::debug!("Focus moved to {}", process_name.as_deref().unwrap_or("?"));
            }
            sink.emit_at(now, event);
        }
    }

    if let Some(event) = tracker.finish(Utc::now()) {
        sink.emit(event);
    }
    log::info!("Focus tracker stopped");
}
