/**
 * ============================================================================
 * BLOCK-LIST MODULE
 * ============================================================================
 *
 * PURPOSE: Mirror the collector's per-host block-list into the hosts file
 *
 * COMPONENTS:
 * - normalize: server entries to bare domain names
 * - hosts: marker region editing, backup, atomic replace
 * - reconciler: poll loop with write retries
 *
 * ============================================================================
 */

pub mod hosts;
pub mod normalize;
pub mod reconciler;

pub use hosts::{ApplyOutcome, HostsError, apply_block_list};
pub use normalize::{normalize_domain, normalize_list};
pub use reconciler::{BlockListReconciler, CycleResult, ReconcilerSettings};
