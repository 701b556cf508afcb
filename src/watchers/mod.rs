/**
 * ============================================================================
 * WATCHERS MODULE
 * ============================================================================
 *
 * PURPOSE: Independent long-running observers of the user session
 *
 * COMPONENTS:
 * - source: boundary traits and channels for platform input capture
 * - focus: foreground_change and screen_time
 * - pointer: mouse_idle and mouse_active
 * - keys: key_count_segment
 * - afk: afk_start and afk_end, fed by pointer and key activity
 *
 * Each watcher keeps its state behind its own lock and only talks to the
 * others through the AFK detector and the shared event queue.
 *
 * ============================================================================
 */

pub mod afk;
pub mod focus;
pub mod keys;
pub mod pointer;
pub mod source;

pub use afk::AfkDetector;
pub use focus::{FocusTracker, run_focus_watcher};
pub use keys::KeySegmenter;
pub use pointer::PointerIdleTracker;
pub use source::{
    AddressResolver, BrowserAddressGate, FocusSample, ForegroundProbe, ForegroundWindow,
    InputHandle, InputStreams, NoAddress, NoForeground, input_channels,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a watcher's state, carrying on past a panicked holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
