/**
 * ============================================================================
 * BLOCK-LIST RECONCILER MODULE
 * ============================================================================
 *
 * PURPOSE: Keep the hosts file's Spiego region in line with the collector
 *
 * CYCLE:
 * 1. Fetch this host's block-list
 *    - transport error: skip the cycle, file untouched
 *    - bad status or unparseable body: treat as an empty list
 * 2. Normalize and compare (as a set) with the last applied list
 * 3. On change, apply to the hosts file, retrying transient write failures
 * 4. Remember the list only once a write succeeded, so a failed cycle is
 *    retried on the next poll
 *
 * ============================================================================
 */

use crate::blocklist::hosts::{self, ApplyOutcome, HostsError};
use crate::blocklist::normalize::normalize_list;
use crate::collector::{BlockListSource, DeliveryError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub poll_interval: Duration,
    pub write_retries: u32,
    pub write_retry_delay: Duration,
    pub block_address: String,
    pub hosts_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    /// Collector unreachable; nothing compared or written.
    Skipped,
    /// Normalized list matches what was last applied.
    Unchanged,
    /// Hosts file now lists these domains.
    Applied { domains: usize },
    /// Every write attempt failed, or the file was unsafe to edit.
    Failed,
    /// Shutdown requested mid-cycle.
    Cancelled,
}

pub struct BlockListReconciler {
    source: Arc<dyn BlockListSource>,
    hostname: String,
    settings: ReconcilerSettings,
    last_applied: Option<BTreeSet<String>>,
}

impl BlockListReconciler {
    pub fn new(
        source: Arc<dyn BlockListSource>,
        hostname: impl Into<String>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            source,
            hostname: hostname.into(),
            settings,
            last_applied: None,
        }
    }

    pub fn last_applied(&self) -> Option<&BTreeSet<String>> {
        self.last_applied.as_ref()
    }

    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleResult {
        let raw = match self.source.fetch_block_list(&self.hostname).await {
            Ok(raw) => raw,
            Err(DeliveryError::Transport(e)) => {
                log::debug!("Block-list fetch failed, skipping cycle: {}", e);
                return CycleResult::Skipped;
            }
            Err(e) => {
                log::warn!("Block-list response unusable ({}), treating as empty", e);
                Vec::new()
            }
        };

        let domains = normalize_list(&raw);
        let wanted: BTreeSet<String> = domains.iter().cloned().collect();
        if self.last_applied.as_ref() == Some(&wanted) {
            log::debug!("Block-list unchanged ({} domains)", wanted.len());
            return CycleResult::Unchanged;
        }

        let attempts = self.settings.write_retries.max(1);
        for attempt in 1..=attempts {
            match self.apply(domains.clone()).await {
                Ok(outcome) => {
                    match outcome {
                        ApplyOutcome::Written { backup } => log::info!(
                            "Hosts file updated for {} ({} domains, backup: {})",
                            self.hostname,
                            domains.len(),
                            backup
                                .map(|b| b.display().to_string())
                                .unwrap_or_else(|| "none".to_string())
                        ),
                        ApplyOutcome::Unchanged => {
                            log::debug!("Hosts file already lists {} domains", domains.len())
                        }
                    }
                    self.last_applied = Some(wanted);
                    return CycleResult::Applied {
                        domains: domains.len(),
                    };
                }
                Err(e) if !e.is_transient() => {
                    log::error!("Not editing {}: {}", self.settings.hosts_path.display(), e);
                    return CycleResult::Failed;
                }
                Err(e) => {
                    log::warn!(
                        "Hosts update attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.write_retry_delay) => {}
                    _ = cancel.cancelled() => return CycleResult::Cancelled,
                }
            }
        }

        log::error!(
            "Giving up on hosts update this cycle after {} attempts",
            attempts
        );
        CycleResult::Failed
    }

    async fn apply(&self, domains: Vec<String>) -> Result<ApplyOutcome, HostsError> {
        let path = self.settings.hosts_path.clone();
        let address = self.settings.block_address.clone();
        tokio::task::spawn_blocking(move || hosts::apply_block_list(&path, &domains, &address))
            .await
            .map_err(|e| HostsError::Io(std::io::Error::other(e)))?
    }

    /**
     * Poll loop; the first cycle runs immediately
     */
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!(
            "Block-list reconciler started for {} (every {:?}, file {})",
            self.hostname,
            self.settings.poll_interval,
            self.settings.hosts_path.display()
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.run_cycle(&cancel).await == CycleResult::Cancelled {
                        break;
                    }
                }
            }
        }
        log::info!("Block-list reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OPERATOR_HOSTS: &str = "127.0.0.1 localhost\n# keep me\n10.1.1.1 nas.lan\n";

    /// Serves queued responses, repeating the last one.
    struct QueuedSource {
        responses: Mutex<Vec<fn() -> Result<Vec<String>, DeliveryError>>>,
        calls: AtomicUsize,
    }

    impl QueuedSource {
        fn new(responses: Vec<fn() -> Result<Vec<String>, DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BlockListSource for QueuedSource {
        async fn fetch_block_list(&self, hostname: &str) -> Result<Vec<String>, DeliveryError> {
            assert_eq!(hostname, "desk-01");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0]
            };
            next()
        }
    }

    fn two_sites() -> Result<Vec<String>, DeliveryError> {
        Ok(vec!["a.com".to_string(), "HTTP://B.com/x".to_string()])
    }

    fn same_sites_reordered() -> Result<Vec<String>, DeliveryError> {
        Ok(vec!["b.com".to_string(), "a.com".to_string(), "a.com".to_string()])
    }

    fn forbidden() -> Result<Vec<String>, DeliveryError> {
        Err(DeliveryError::from_status(403))
    }

    fn settings(hosts_path: PathBuf) -> ReconcilerSettings {
        ReconcilerSettings {
            poll_interval: Duration::from_millis(20),
            write_retries: 3,
            write_retry_delay: Duration::from_millis(10),
            block_address: "127.0.0.1".to_string(),
            hosts_path,
        }
    }

    fn between_markers(content: &str) -> Vec<String> {
        let start = content.find(hosts::START_MARKER).unwrap() + hosts::START_MARKER.len();
        let end = content.find(hosts::END_MARKER).unwrap();
        content[start..end]
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_writes_normalized_region_and_preserves_rest() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        fs::write(&hosts_path, OPERATOR_HOSTS).unwrap();

        let source = QueuedSource::new(vec![two_sites]);
        let mut reconciler =
            BlockListReconciler::new(source, "desk-01", settings(hosts_path.clone()));
        let cancel = CancellationToken::new();

        assert_eq!(
            reconciler.run_cycle(&cancel).await,
            CycleResult::Applied { domains: 2 }
        );

        let content = fs::read_to_string(&hosts_path).unwrap();
        assert!(content.starts_with(OPERATOR_HOSTS));
        assert_eq!(
            between_markers(&content),
            vec!["127.0.0.1 a.com".to_string(), "127.0.0.1 b.com".to_string()]
        );
        assert_eq!(content.matches("a.com").count(), 1);
        assert_eq!(content.matches("b.com").count(), 1);
    }

    #[tokio::test]
    async fn test_reordered_list_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        fs::write(&hosts_path, OPERATOR_HOSTS).unwrap();

        let source = QueuedSource::new(vec![two_sites, same_sites_reordered]);
        let mut reconciler =
            BlockListReconciler::new(source, "desk-01", settings(hosts_path.clone()));
        let cancel = CancellationToken::new();

        reconciler.run_cycle(&cancel).await;
        let after_first = fs::read_to_string(&hosts_path).unwrap();
        assert_eq!(reconciler.run_cycle(&cancel).await, CycleResult::Unchanged);
        assert_eq!(fs::read_to_string(&hosts_path).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_bad_response_clears_region() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        fs::write(&hosts_path, OPERATOR_HOSTS).unwrap();

        let source = QueuedSource::new(vec![two_sites, forbidden]);
        let mut reconciler =
            BlockListReconciler::new(source, "desk-01", settings(hosts_path.clone()));
        let cancel = CancellationToken::new();

        reconciler.run_cycle(&cancel).await;
        assert_eq!(
            reconciler.run_cycle(&cancel).await,
            CycleResult::Applied { domains: 0 }
        );
        let content = fs::read_to_string(&hosts_path).unwrap();
        assert!(between_markers(&content).is_empty());
        assert!(content.starts_with(OPERATOR_HOSTS));
    }

    #[tokio::test]
    async fn test_unreachable_collector_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        fs::write(&hosts_path, OPERATOR_HOSTS).unwrap();

        let client = crate::collector::CollectorClient::new(
            "http://127.0.0.1:9",
            "k",
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        let mut reconciler =
            BlockListReconciler::new(Arc::new(client), "desk-01", settings(hosts_path.clone()));

        assert_eq!(
            reconciler.run_cycle(&CancellationToken::new()).await,
            CycleResult::Skipped
        );
        assert!(reconciler.last_applied().is_none());
        assert_eq!(fs::read_to_string(&hosts_path).unwrap(), OPERATOR_HOSTS);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist, so every write fails
        let hosts_path = dir.path().join("missing").join("hosts");

        let source = QueuedSource::new(vec![two_sites]);
        let mut reconciler =
            BlockListReconciler::new(source.clone(), "desk-01", settings(hosts_path.clone()));
        let cancel = CancellationToken::new();

        assert_eq!(reconciler.run_cycle(&cancel).await, CycleResult::Failed);
        assert!(reconciler.last_applied().is_none());

        fs::create_dir(dir.path().join("missing")).unwrap();
        assert_eq!(
            reconciler.run_cycle(&cancel).await,
            CycleResult::Applied { domains: 2 }
        );
        assert_eq!(reconciler.last_applied().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unterminated_region_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        let broken = format!("{}{}\n127.0.0.1 old.com\n", OPERATOR_HOSTS, hosts::START_MARKER);
        fs::write(&hosts_path, &broken).unwrap();

        let source = QueuedSource::new(vec![two_sites]);
        let mut reconciler =
            BlockListReconciler::new(source, "desk-01", settings(hosts_path.clone()));

        assert_eq!(
            reconciler.run_cycle(&CancellationToken::new()).await,
            CycleResult::Failed
        );
        assert_eq!(fs::read_to_string(&hosts_path).unwrap(), broken);
    }

    #[tokio::test]
    async fn test_run_polls_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let hosts_path = dir.path().join("hosts");
        fs::write(&hosts_path, OPERATOR_HOSTS).unwrap();

        let source = QueuedSource::new(vec![two_sites]);
        let reconciler =
            BlockListReconciler::new(source.clone(), "desk-01", settings(hosts_path.clone()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reconciler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        let content = fs::read_to_string(&hosts_path).unwrap();
        assert_eq!(between_markers(&content).len(), 2);
    }
}
