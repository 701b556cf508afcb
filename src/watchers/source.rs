/**
 * ============================================================================
 * INPUT SOURCE MODULE
 * ============================================================================
 *
 * PURPOSE: Boundary between platform input capture and the watchers
 *
 * The platform side (hooks, foreground-window inspection, UI automation)
 * lives outside this crate. It plugs in through:
 * - ForegroundProbe: polled for the current foreground window
 * - AddressResolver: best-effort address-bar text for a window
 * - InputHandle: pushes pointer moves and key presses into bounded channels
 *
 * Capture callbacks must never block, so InputHandle uses try_send and
 * counts what it had to drop when a watcher falls behind.
 *
 * ============================================================================
 */

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Raw foreground window as the platform reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundWindow {
    pub pid: Option<u32>,
    pub title: Option<String>,
    pub process_name: Option<String>,
    pub process_path: Option<String>,
}

/// Foreground window plus whatever address could be resolved for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusSample {
    pub pid: Option<u32>,
    pub title: Option<String>,
    pub process_name: Option<String>,
    pub process_path: Option<String>,
    pub address: Option<String>,
}

impl FocusSample {
    pub fn from_window(window: ForegroundWindow, address: Option<String>) -> Self {
        Self {
            pid: window.pid,
            title: window.title,
            process_name: window.process_name,
            process_path: window.process_path,
            address,
        }
    }
}

pub trait ForegroundProbe: Send + Sync {
    /// None when no window information is available right now.
    fn poll_once(&self) -> Option<ForegroundWindow>;
}

pub trait AddressResolver: Send + Sync {
    fn resolve(&self, window: &ForegroundWindow) -> Option<String>;
}

/// Probe for platforms without foreground-window support.
pub struct NoForeground;

impl ForegroundProbe for NoForeground {
    fn poll_once(&self) -> Option<ForegroundWindow> {
        None
    }
}

/// Resolver for platforms without address-bar inspection.
pub struct NoAddress;

impl AddressResolver for NoAddress {
    fn resolve(&self, _window: &ForegroundWindow) -> Option<String> {
        None
    }
}

const ADDRESS_BAR_BROWSERS: &[&str] = &["chrome", "msedge", "brave"];

/**
 * Only consult the inner resolver for browsers whose address bar can be read
 * Everything else (Firefox included) resolves to None without a lookup
 */
pub struct BrowserAddressGate<R> {
    inner: R,
}

impl<R: AddressResolver> BrowserAddressGate<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: AddressResolver> AddressResolver for BrowserAddressGate<R> {
    fn resolve(&self, window: &ForegroundWindow) -> Option<String> {
        let name = window.process_name.as_deref()?.to_lowercase();
        if !ADDRESS_BAR_BROWSERS.iter().any(|b| name.contains(b)) {
            return None;
        }
        self.inner
            .resolve(window)
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerSignal {
    pub x: f64,
    pub y: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySignal {
    pub label: String,
    pub at: DateTime<Utc>,
}

impl KeySignal {
    /**
     * Build a signal from a raw key name
     * Hook libraries report special keys as "Key.space"; keep just "space"
     */
    pub fn new(raw_label: &str, at: DateTime<Utc>) -> Self {
        let label = raw_label.strip_prefix("Key.").unwrap_or(raw_label);
        Self {
            label: label.to_string(),
            at,
        }
    }
}

/**
 * Producer side handed to platform capture code
 */
#[derive(Clone)]
pub struct InputHandle {
    pointer_tx: mpsc::Sender<PointerSignal>,
    key_tx: mpsc::Sender<KeySignal>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side, split between the pointer and key watchers.
pub struct InputStreams {
    pub pointer: mpsc::Receiver<PointerSignal>,
    pub keys: mpsc::Receiver<KeySignal>,
}

pub fn input_channels(capacity: usize) -> (InputHandle, InputStreams) {
    let (pointer_tx, pointer) = mpsc::channel(capacity.max(1));
    let (key_tx, keys) = mpsc::channel(capacity.max(1));
    let handle = InputHandle {
        pointer_tx,
        key_tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (handle, InputStreams { pointer, keys })
}

impl InputHandle {
    pub fn pointer_moved(&self, x: f64, y: f64) {
        self.push_pointer(PointerSignal {
            x,
            y,
            at: Utc::now(),
        });
    }

    pub fn key_pressed(&self, raw_label: &str) {
        self.push_key(KeySignal::new(raw_label, Utc::now()));
    }

    pub fn push_pointer(&self, signal: PointerSignal) {
        if let Err(e) = self.pointer_tx.try_send(signal) {
            self.note_drop("pointer", e);
        }
    }

    pub fn push_key(&self, signal: KeySignal) {
        if let Err(e) = self.key_tx.try_send(signal) {
            self.note_drop("key", e);
        }
    }

    /// Signals discarded because a watcher was behind or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn note_drop<T>(&self, kind: &str, error: TrySendError<T>) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        match error {
            TrySendError::Full(_) => {
                log::debug!("{} channel full, signal dropped ({} total)", kind, total)
            }
            TrySendError::Closed(_) => log::debug!("{} watcher gone, signal dropped", kind),
        }
    }
}
