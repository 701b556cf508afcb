/**
 * ============================================================================
 * COLLECTOR MODULE
 * ============================================================================
 *
 * PURPOSE: Data transmission system for sending agent events to the Spiego
 * collector over HTTP(S), with a local file as the escape valve.
 *
 * ARCHITECTURE:
 * - types: Data structures, statistics and delivery errors
 * - queue: Multi-producer event queue fed by the watchers
 * - client: HTTP client for the events and block-list endpoints
 * - fallback: Append-only NDJSON store for undeliverable events
 * - sender: Batch window, bounded retry, fallback and replay
 *
 * ============================================================================
 */

pub mod client;
pub mod fallback;
pub mod queue;
pub mod sender;
pub mod types;

pub use client::{BlockListSource, CollectorClient, EventTransport};
pub use fallback::FallbackStore;
pub use queue::{EventDrain, EventSink, event_queue};
pub use sender::{BatchSender, SenderSettings};
pub use types::{BatchOutcome, DeliveryError, EventBatch, SyncStatistics};
