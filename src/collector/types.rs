/**
 * ============================================================================
 * COLLECTOR TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Define the data structures used across the delivery pipeline
 *
 * TYPES DEFINED:
 * - EventBatch: Events drained in one batch window, ready for transmission
 * - EventsPayload: Request body of POST /api/events
 * - DeliveryError: Failure classes of a collector request
 * - BatchOutcome: What happened to a batch
 * - SyncStatistics: Metrics for monitoring transmission health
 *
 * ============================================================================
 */

use crate::events::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/**
 * Events drained from the queue in one batch window
 * Order is the order in which they were drained
 */
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Request body for `POST /api/events`.
#[derive(Debug, Serialize)]
pub struct EventsPayload<'a> {
    pub events: &'a [Event],
}

/**
 * Failure classes of a request to the collector
 * Only transport failures and unexpected statuses are worth retrying
 */
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector rejected the auth key (HTTP {code})")]
    Unauthorized { code: u16 },

    #[error("collector returned HTTP {code}")]
    Status { code: u16 },

    #[error("malformed collector response: {0}")]
    Malformed(String),

    #[error("no transport configured")]
    NoTransport,
}

impl DeliveryError {
    /**
     * Whether another attempt could plausibly succeed
     * A rejected key will be rejected again, so 401/403 go straight to fallback
     */
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) | DeliveryError::Status { .. } => true,
            DeliveryError::Unauthorized { .. }
            | DeliveryError::Malformed(_)
            | DeliveryError::NoTransport => false,
        }
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            401 | 403 => DeliveryError::Unauthorized { code },
            _ => DeliveryError::Status { code },
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered { attempts: u32 },
    WrittenToFallback { attempts: u32 },
    Lost { attempts: u32 },
}

/**
 * Synchronization statistics for monitoring
 * Tracks transmission health and fallback usage
 */
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatistics {
    pub total_events_sent: u64,
    pub total_batches_sent: u64,
    pub events_written_to_fallback: u64,
    pub events_lost: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatistics {
    /**
     * Update statistics after successful send
     */
    pub fn record_success(&mut self, events_sent: usize) {
        self.total_events_sent += events_sent as u64;
        self.total_batches_sent += 1;
        self.last_sync_time = Some(Utc::now());
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: String) {
        self.last_error = Some(error);
    }

    pub fn record_fallback(&mut self, events: usize) {
        self.events_written_to_fallback += events as u64;
    }

    pub fn record_lost(&mut self, events: usize) {
        self.events_lost += events as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            DeliveryError::from_status(401),
            DeliveryError::Unauthorized { code: 401 }
        ));
        assert!(matches!(
            DeliveryError::from_status(403),
            DeliveryError::Unauthorized { code: 403 }
        ));
        assert!(matches!(DeliveryError::from_status(500), DeliveryError::Status { code: 500 }));

        assert!(!DeliveryError::from_status(403).is_retryable());
        assert!(DeliveryError::from_status(502).is_retryable());
        assert!(!DeliveryError::NoTransport.is_retryable());
    }

    #[test]
    fn test_statistics_success_clears_error() {
        let mut stats = SyncStatistics::default();
        stats.record_error("Send failed".to_string());
        assert!(stats.last_error.is_some());

        stats.record_success(12);
        assert_eq!(stats.total_events_sent, 12);
        assert_eq!(stats.total_batches_sent, 1);
        assert!(stats.last_error.is_none());
        assert!(stats.last_sync_time.is_some());
    }

    #[test]
    fn test_batch_ids_unique() {
        let a = EventBatch::new(Vec::new());
        let b = EventBatch::new(Vec::new());
        assert_ne!(a.batch_id, b.batch_id);
        assert!(a.is_empty());
    }
}
