use agent_lib::collector::{
    BatchSender, CollectorClient, EventTransport, FallbackStore, SenderSettings, event_queue,
};
use agent_lib::events::{Event, EventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sender_for(url: &str, fallback: FallbackStore, attempts: u32) -> BatchSender {
    let client = CollectorClient::new(
        url,
        "pipeline-key",
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap();
    BatchSender::new(
        Some(Arc::new(client) as Arc<dyn EventTransport>),
        fallback,
        SenderSettings {
            send_interval: Duration::from_millis(100),
            retry_attempts: attempts,
            retry_delay: Duration::from_millis(10),
        },
    )
}

fn fallback_events(store: &FallbackStore) -> Vec<Event> {
    std::fs::read_to_string(store.path())
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_events_reach_collector_with_hostname() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/events")
        .match_header("authorization", "Bearer pipeline-key")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::Regex(r#""hostname":"desk-07""#.to_string()),
            mockito::Matcher::Regex(r#""type":"afk_start""#.to_string()),
            mockito::Matcher::Regex(r#""type":"mouse_idle""#.to_string()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FallbackStore::new(dir.path().join("fallback.jsonl"));
    let sender = sender_for(&server.url(), store.clone(), 3);
    let stats = sender.statistics();

    let (sink, drain) = event_queue("desk-07");
    sink.emit(EventKind::AfkStart { idle_seconds: 20 });
    sink.emit(EventKind::MouseIdle { idle_seconds: 60 });

    let cancel = CancellationToken::new();
    let task = tokio::spawn(sender.run(drain, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(400)).await;
    cancel.cancel();
    task.await.unwrap();

    mock.assert_async().await;
    assert!(!store.path().exists());
    let stats = stats.lock().unwrap().clone();
    assert_eq!(stats.total_events_sent, 2);
    assert_eq!(stats.total_batches_sent, 1);
}

#[tokio::test]
async fn test_outage_spills_to_fallback_then_replays() {
    let dir = tempfile::tempdir().unwrap();
    let store = FallbackStore::new(dir.path().join("fallback.jsonl"));

    // Collector is up but failing: every try is used, then the batch spills
    let mut failing = mockito::Server::new_async().await;
    let failures = failing
        .mock("POST", "/api/events")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let sender = sender_for(&failing.url(), store.clone(), 3);
    let (sink, drain) = event_queue("desk-07");
    for seconds in 1..=5 {
        sink.emit(EventKind::MouseIdle {
            idle_seconds: seconds,
        });
    }
    let cancel = CancellationToken::new();
    let task = tokio::spawn(sender.run(drain, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(400)).await;
    cancel.cancel();
    task.await.unwrap();
    failures.assert_async().await;

    let spilled = fallback_events(&store);
    let order: Vec<u64> = spilled
        .iter()
        .map(|e| match e.kind {
            EventKind::MouseIdle { idle_seconds } => idle_seconds,
            _ => panic!("unexpected event {:?}", e),
        })
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5]);

    // Collector recovers; the next start replays the file
    let mut healthy = mockito::Server::new_async().await;
    let replayed = healthy
        .mock("POST", "/api/events")
        .match_body(mockito::Matcher::Regex(r#""idle_seconds":5"#.to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let sender = sender_for(&healthy.url(), store.clone(), 3);
    let delivered = sender.replay_fallback(&CancellationToken::new()).await;
    assert_eq!(delivered, 5);
    replayed.assert_async().await;
    assert!(!store.path().exists());
    assert!(!store.replay_path().exists());
}

#[tokio::test]
async fn test_rejected_key_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("POST", "/api/events")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FallbackStore::new(dir.path().join("fallback.jsonl"));
    let sender = sender_for(&server.url(), store.clone(), 5);
    let stats = sender.statistics();

    let (sink, drain) = event_queue("desk-07");
    sink.emit(EventKind::AfkStart { idle_seconds: 30 });
    let cancel = CancellationToken::new();
    let task = tokio::spawn(sender.run(drain, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    task.await.unwrap();

    rejected.assert_async().await;
    assert_eq!(fallback_events(&store).len(), 1);
    let stats = stats.lock().unwrap().clone();
    assert_eq!(stats.events_written_to_fallback, 1);
    assert!(stats.last_error.is_some());
}
