/**
 * ============================================================================
 * EVENTS MODULE
 * ============================================================================
 *
 * PURPOSE: The event vocabulary shared by watchers, the queue and the sender
 *
 * ARCHITECTURE:
 * - types: Event envelope and the closed set of event kinds
 * - metadata: Host fingerprint emitted once at startup
 *
 * ============================================================================
 */

pub mod metadata;
pub mod types;

pub use metadata::{gather_host_metadata, local_hostname};
pub use types::{Event, EventKind, HostMetadata, Keystroke};
