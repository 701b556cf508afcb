/**
 * ============================================================================
 * AGENT MODULE
 * ============================================================================
 *
 * PURPOSE: Start, observe and stop every long-running task
 *
 * TASKS:
 * - Focus tracker, pointer watcher, key segmenter, AFK detector
 * - Block-list reconciler (when enabled and a collector client exists)
 * - Batch sender (replays the fallback file first when configured)
 *
 * SHUTDOWN ORDER:
 * 1. Cancel the watchers and the reconciler, wait for them, so the final
 *    screen_time and key segment reach the queue
 * 2. Cancel the sender, which drains the queue one last time
 * Each wait is bounded; a task that overruns is aborted.
 *
 * ============================================================================
 */

use crate::blocklist::{BlockListReconciler, ReconcilerSettings};
use crate::collector::{
    BatchSender, BlockListSource, CollectorClient, EventSink, EventTransport, FallbackStore,
    SenderSettings, SyncStatistics, event_queue,
};
use crate::config::AgentConfig;
use crate::events::{EventKind, gather_host_metadata, local_hostname};
use crate::watchers::{
    AddressResolver, AfkDetector, ForegroundProbe, InputHandle, KeySegmenter, NoAddress,
    NoForeground, PointerIdleTracker, input_channels, run_focus_watcher,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of each raw input channel.
const INPUT_CHANNEL_CAPACITY: usize = 4096;

/**
 * Platform collaborators for the focus tracker
 * Defaults report nothing, for hosts without window inspection
 */
pub struct AgentSources {
    pub probe: Arc<dyn ForegroundProbe>,
    pub resolver: Arc<dyn AddressResolver>,
}

impl Default for AgentSources {
    fn default() -> Self {
        Self {
            probe: Arc::new(NoForeground),
            resolver: Arc::new(NoAddress),
        }
    }
}

/**
 * Point-in-time view of the agent
 */
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub running: bool,
    pub hostname: String,
    pub collector_url: String,
    pub events_sent: u64,
    pub batches_sent: u64,
    pub events_in_fallback: u64,
    pub events_lost: u64,
    pub queue_depth: usize,
    pub input_signals_dropped: u64,
    pub last_error: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

struct NamedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

pub struct Agent {
    hostname: String,
    collector_url: String,
    sink: EventSink,
    input: InputHandle,
    statistics: Arc<Mutex<SyncStatistics>>,
    running: AtomicBool,
    watcher_cancel: CancellationToken,
    sender_cancel: CancellationToken,
    watcher_tasks: Vec<NamedTask>,
    sender_task: Option<NamedTask>,
    shutdown_timeout: Duration,
    sender_shutdown_timeout: Duration,
}

impl Agent {
    /**
     * Start every task on the current tokio runtime
     * The configuration must already be validated
     */
    pub fn start(config: &AgentConfig, sources: AgentSources) -> Self {
        let hostname = local_hostname();
        let collector_url = config.server_base_url();
        log::info!("Starting agent on {} (collector {})", hostname, collector_url);

        let (sink, drain) = event_queue(hostname.clone());
        sink.emit(EventKind::Metadata(gather_host_metadata()));

        let client = match CollectorClient::new(
            collector_url.clone(),
            config.auth_key.clone(),
            Duration::from_secs(config.request_timeout_seconds),
            Duration::from_secs(config.blocked_http_timeout_seconds),
        ) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                log::error!("HTTP client unavailable, events go to the fallback file: {}", e);
                None
            }
        };

        let watcher_cancel = CancellationToken::new();
        let sender_cancel = CancellationToken::new();
        let mut watcher_tasks = Vec::new();

        let (input, streams) = input_channels(INPUT_CHANNEL_CAPACITY);
        let afk = Arc::new(AfkDetector::new(config.afk_threshold_seconds, sink.clone()));
        let pointer = Arc::new(PointerIdleTracker::new(
            config.idle_threshold_seconds,
            sink.clone(),
            afk.clone(),
        ));
        let keys = Arc::new(KeySegmenter::new(
            config.key_idle_timeout_seconds,
            sink.clone(),
            afk.clone(),
        ));

        watcher_tasks.push(NamedTask {
            name: "focus tracker",
            handle: tokio::spawn(run_focus_watcher(
                sources.probe,
                sources.resolver,
                sink.clone(),
                config.poll_interval(),
                watcher_cancel.clone(),
            )),
        });
        watcher_tasks.push(NamedTask {
            name: "pointer watcher",
            handle: tokio::spawn(pointer.run(
                streams.pointer,
                config.poll_interval(),
                watcher_cancel.clone(),
            )),
        });
        watcher_tasks.push(NamedTask {
            name: "key segmenter",
            handle: tokio::spawn(keys.run(
                streams.keys,
                config.key_poll_interval(),
                watcher_cancel.clone(),
            )),
        });
        watcher_tasks.push(NamedTask {
            name: "AFK detector",
            handle: tokio::spawn(afk.run(config.poll_interval(), watcher_cancel.clone())),
        });

        match (&client, config.blocklist_enabled) {
            (Some(client), true) => {
                let source: Arc<dyn BlockListSource> = client.clone();
                let reconciler = BlockListReconciler::new(
                    source,
                    hostname.clone(),
                    ReconcilerSettings {
                        poll_interval: Duration::from_secs(config.blocked_poll_interval_seconds),
                        write_retries: config.blocked_write_retries,
                        write_retry_delay: Duration::from_millis(
                            config.blocked_write_retry_delay_ms,
                        ),
                        block_address: config.block_address.clone(),
                        hosts_path: config.resolved_hosts_path(),
                    },
                );
                watcher_tasks.push(NamedTask {
                    name: "block-list reconciler",
                    handle: tokio::spawn(reconciler.run(watcher_cancel.clone())),
                });
            }
            (None, true) => log::warn!("Block-list reconciler disabled: no collector client"),
            (_, false) => log::info!("Block-list reconciler disabled by configuration"),
        }

        let transport = client.map(|c| c as Arc<dyn EventTransport>);
        let sender = BatchSender::new(
            transport,
            FallbackStore::new(config.fallback_file.clone()),
            SenderSettings {
                send_interval: config.send_interval(),
                retry_attempts: config.retry_attempts,
                retry_delay: config.retry_delay(),
            },
        );
        let statistics = sender.statistics();
        let replay = config.replay_fallback_on_start;
        let cancel = sender_cancel.clone();
        let sender_task = NamedTask {
            name: "batch sender",
            handle: tokio::spawn(async move {
                if replay {
                    let replayed = sender.replay_fallback(&cancel).await;
                    if replayed > 0 {
                        log::info!("Replayed {} events from the fallback file", replayed);
                    }
                }
                sender.run(drain, cancel).await;
            }),
        };

        log::info!("Agent started with {} background tasks", watcher_tasks.len() + 1);
        Self {
            hostname,
            collector_url,
            sink,
            input,
            statistics,
            running: AtomicBool::new(true),
            watcher_cancel,
            sender_cancel,
            watcher_tasks,
            sender_task: Some(sender_task),
            shutdown_timeout: config.shutdown_timeout(),
            // The final flush gets one full request before it is cut off
            sender_shutdown_timeout: config.shutdown_timeout()
                + Duration::from_secs(config.request_timeout_seconds),
        }
    }

    /// Handle for platform capture code to push pointer and key input.
    pub fn input(&self) -> InputHandle {
        self.input.clone()
    }

    /// Producer for events that do not come from a built-in watcher.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn status(&self) -> AgentStatus {
        let stats = self
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        AgentStatus {
            running: self.running.load(Ordering::Relaxed),
            hostname: self.hostname.clone(),
            collector_url: self.collector_url.clone(),
            events_sent: stats.total_events_sent,
            batches_sent: stats.total_batches_sent,
            events_in_fallback: stats.events_written_to_fallback,
            events_lost: stats.events_lost,
            queue_depth: self.sink.depth(),
            input_signals_dropped: self.input.dropped(),
            last_error: stats.last_error,
            last_sync_time: stats.last_sync_time,
        }
    }

    /**
     * Stop every task, watchers first, then the sender
     * Safe to call more than once
     */
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("Stopping agent");

        self.watcher_cancel.cancel();
        for task in self.watcher_tasks.drain(..) {
            join_bounded(task, self.shutdown_timeout).await;
        }

        self.sender_cancel.cancel();
        if let Some(task) = self.sender_task.take() {
            join_bounded(task, self.sender_shutdown_timeout).await;
        }

        log::info!("Agent stopped");
    }
}

async fn join_bounded(task: NamedTask, limit: Duration) {
    let NamedTask { name, mut handle } = task;
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(())) => log::debug!("{} stopped cleanly", name),
        Ok(Err(e)) => log::error!("{} panicked: {:?}", name, e),
        Err(_) => {
            log::warn!("{} did not stop within {:?}, aborting", name, limit);
            handle.abort();
        }
    }
}
