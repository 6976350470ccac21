//! End-to-end scenarios for the send coordinator.
//!
//! All timing-sensitive tests run under a paused tokio clock, so backoff,
//! rate-limit windows, and breaker cooldowns are verified deterministically
//! on virtual time.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use herald::{
    BreakerState, CircuitBreakerConfig, Coordinator, DeliveryState, EngineConfig, EngineEvent,
    EventKind, Message, MockTransport, RateLimitConfig, RetryPolicy, Signal, SubmitOutcome,
    Transport,
};
use pretty_assertions::assert_eq;
use tokio::{sync::broadcast, time::Duration};

fn mock(name: &str, failure_rate: f64, latency_ms: u64) -> Arc<MockTransport> {
    Arc::new(MockTransport::new(
        name,
        failure_rate,
        Duration::from_millis(latency_ms),
    ))
}

fn message(subject: &str) -> Message {
    Message::new("a@x", "b@y", subject, "b")
}

fn counter(coordinator: &Coordinator, kind: EventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let clone = count.clone();
    coordinator.events().subscribe(kind, move |_| {
        clone.fetch_add(1, Ordering::SeqCst);
    });
    count
}

fn sent_receipt(outcome: SubmitOutcome) -> herald::DeliveryReceipt {
    match outcome {
        SubmitOutcome::Sent(receipt) => receipt,
        other => panic!("expected sent outcome, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_delivers_on_first_attempt() {
    let p1 = mock("P1", 0.0, 10);
    let coordinator =
        Coordinator::new(EngineConfig::default(), vec![p1.clone() as Arc<dyn Transport>]).unwrap();

    let m = message("s");
    let fingerprint = m.fingerprint();
    let receipt = sent_receipt(coordinator.submit(m).await.unwrap());

    assert_eq!(&*receipt.transport, "P1");
    assert_eq!(p1.invocations(), 1);

    let status = coordinator.lookup_status(&fingerprint).unwrap();
    assert_eq!(status.state, DeliveryState::Sent);
    assert_eq!(status.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_reaches_second_provider_after_retry_budget() {
    let bad = mock("Bad", 1.0, 10);
    let good = mock("Good", 0.0, 10);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 1,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            bad.clone() as Arc<dyn Transport>,
            good.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    let receipt = sent_receipt(coordinator.submit(message("s")).await.unwrap());

    assert_eq!(&*receipt.transport, "Good");
    assert_eq!(bad.invocations(), 2);
    assert_eq!(good.invocations(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_fails_with_single_failed_event() {
    let bad = mock("Bad", 1.0, 10);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(config, vec![bad.clone() as Arc<dyn Transport>]).unwrap();
    let failed_events = counter(&coordinator, EventKind::Failed);

    let m = message("s");
    let fingerprint = m.fingerprint();
    let outcome = coordinator.submit(m).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    assert_eq!(failed_events.load(Ordering::SeqCst), 1);
    assert_eq!(bad.invocations(), 1);

    let status = coordinator.lookup_status(&fingerprint).unwrap();
    assert_eq!(status.state, DeliveryState::Failed);
    assert_eq!(status.attempts, 1);
    assert!(status.last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn idempotent_replay_returns_cached_receipt_without_redelivery() {
    let p1 = mock("P1", 0.0, 10);
    let coordinator =
        Coordinator::new(EngineConfig::default(), vec![p1.clone() as Arc<dyn Transport>]).unwrap();
    let sent_events = counter(&coordinator, EventKind::Sent);

    let m = message("s");
    let first = sent_receipt(coordinator.submit(m.clone()).await.unwrap());
    let second = sent_receipt(coordinator.submit(m).await.unwrap());

    assert_eq!(first.delivery_id, second.delivery_id);
    assert_eq!(first, second);
    assert_eq!(p1.invocations(), 1);
    // The cache hit emits nothing
    assert_eq!(sent_events.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_denied_submission_queues_then_drains_to_sent() {
    let p1 = mock("P1", 0.0, 10);
    let config = EngineConfig {
        rate_limit: RateLimitConfig {
            max_requests: 1,
            window_ms: 1_000,
        },
        drain_interval_ms: 1_000,
        ..EngineConfig::default()
    };
    let coordinator =
        Arc::new(Coordinator::new(config, vec![p1.clone() as Arc<dyn Transport>]).unwrap());

    // Record the event sequence for the deferred message
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for kind in [EventKind::Queued, EventKind::Sent] {
        let order = order.clone();
        coordinator.events().subscribe(kind, move |event| {
            if let EngineEvent::Queued { message, .. } | EngineEvent::Sent { message, .. } = event
                && message.subject == "second"
            {
                order.lock().push(event.kind());
            }
        });
    }

    let (shutdown_tx, _) = broadcast::channel(4);
    let worker = tokio::spawn({
        let coordinator = coordinator.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { coordinator.serve(shutdown).await }
    });

    let m1 = message("first");
    let m2 = message("second");
    let fingerprint2 = m2.fingerprint();

    assert!(matches!(
        coordinator.submit(m1).await.unwrap(),
        SubmitOutcome::Sent(_)
    ));
    assert!(matches!(
        coordinator.submit(m2).await.unwrap(),
        SubmitOutcome::Queued(_)
    ));
    assert_eq!(
        coordinator.lookup_status(&fingerprint2).unwrap().state,
        DeliveryState::Queued
    );

    let mut resolved = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if coordinator.lookup_status(&fingerprint2).unwrap().state == DeliveryState::Sent {
            resolved = true;
            break;
        }
    }
    assert!(resolved, "queued submission should drain to sent");
    assert_eq!(p1.invocations(), 2);
    assert_eq!(*order.lock(), vec![EventKind::Queued, EventKind::Sent]);

    shutdown_tx.send(Signal::Shutdown).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn tripped_breaker_skips_provider_until_cooldown() {
    let p1 = mock("P1", 1.0, 10);
    let p2 = mock("P2", 0.0, 10);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 5,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_ms: 200,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            p1.clone() as Arc<dyn Transport>,
            p2.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    for n in 0..3 {
        let receipt = sent_receipt(coordinator.submit(message(&format!("m{n}"))).await.unwrap());
        assert_eq!(&*receipt.transport, "P2");
    }

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.providers[0].breaker_state, BreakerState::Open);

    // The first dispatch trips the breaker after three consecutive failures;
    // later submissions are refused without invoking the transport
    let before = p1.invocations();
    assert_eq!(before, 3);

    let receipt = sent_receipt(coordinator.submit(message("m4")).await.unwrap());
    assert_eq!(&*receipt.transport, "P2");
    assert_eq!(p1.invocations(), before);
    assert_eq!(p2.invocations(), 4);
}

#[tokio::test(start_paused = true)]
async fn total_invocations_bounded_by_providers_times_budget() {
    let a = mock("A", 1.0, 5);
    let b = mock("B", 1.0, 5);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            a.clone() as Arc<dyn Transport>,
            b.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    let outcome = coordinator.submit(message("s")).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    assert_eq!(a.invocations(), 3);
    assert_eq!(b.invocations(), 3);
}

#[tokio::test(start_paused = true)]
async fn breaker_refusal_consumes_no_retry_budget() {
    let a = mock("A", 1.0, 5);
    let b = mock("B", 0.0, 5);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 60_000,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            a.clone() as Arc<dyn Transport>,
            b.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    let m = message("s");
    let fingerprint = m.fingerprint();
    let receipt = sent_receipt(coordinator.submit(m).await.unwrap());

    // One real failure opened the breaker; the refusal that followed did not
    // invoke the transport again
    assert_eq!(&*receipt.transport, "B");
    assert_eq!(a.invocations(), 1);

    let status = coordinator.lookup_status(&fingerprint).unwrap();
    assert!(
        status
            .attempt_log
            .iter()
            .any(|record| record.outcome == herald::AttemptOutcome::BreakerOpen)
    );
}

#[tokio::test(start_paused = true)]
async fn backoff_delay_observed_on_virtual_clock() {
    let flaky = mock("Flaky", 1.0, 0);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 1,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(config, vec![flaky.clone() as Arc<dyn Transport>]).unwrap();

    let start = tokio::time::Instant::now();
    let outcome = coordinator.submit(message("s")).await.unwrap();
    let elapsed = start.elapsed().as_millis();

    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    // Exactly one backoff sleep separates the two attempts
    assert!(
        (1_000..1_100).contains(&elapsed),
        "elapsed {elapsed}ms outside jitter bounds [1000, 1100)"
    );
}

#[tokio::test(start_paused = true)]
async fn slow_transport_times_out_as_transient_failure() {
    let slow = mock("Slow", 0.0, 50_000);
    let fast = mock("Fast", 0.0, 10);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        attempt_timeout_ms: 1_000,
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            slow.clone() as Arc<dyn Transport>,
            fast.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    let m = message("s");
    let fingerprint = m.fingerprint();
    let receipt = sent_receipt(coordinator.submit(m).await.unwrap());

    assert_eq!(&*receipt.transport, "Fast");
    assert_eq!(slow.invocations(), 1);

    let status = coordinator.lookup_status(&fingerprint).unwrap();
    assert!(status.attempt_log.iter().any(|record| {
        matches!(
            &record.outcome,
            herald::AttemptOutcome::TransientFailure(error) if error.contains("timed out")
        )
    }));
}

#[tokio::test(start_paused = true)]
async fn event_cardinality_per_submission() {
    let p1 = mock("P1", 0.0, 5);
    let bad = mock("Bad", 1.0, 5);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..EngineConfig::default()
    };

    let delivering =
        Coordinator::new(config.clone(), vec![p1.clone() as Arc<dyn Transport>]).unwrap();
    let sent = counter(&delivering, EventKind::Sent);
    let queued = counter(&delivering, EventKind::Queued);

    delivering.submit(message("ok")).await.unwrap();
    delivering.submit(message("ok")).await.unwrap();
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(queued.load(Ordering::SeqCst), 0);

    let failing = Coordinator::new(config, vec![bad.clone() as Arc<dyn Transport>]).unwrap();
    let failed = counter(&failing, EventKind::Failed);

    failing.submit(message("doomed")).await.unwrap();
    assert_eq!(failed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_submissions_deliver_at_most_once() {
    let p1 = mock("P1", 0.0, 50);
    let config = EngineConfig {
        drain_interval_ms: 100,
        ..EngineConfig::default()
    };
    let coordinator =
        Arc::new(Coordinator::new(config, vec![p1.clone() as Arc<dyn Transport>]).unwrap());

    let (shutdown_tx, _) = broadcast::channel(4);
    let worker = tokio::spawn({
        let coordinator = coordinator.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { coordinator.serve(shutdown).await }
    });

    let m = message("once");
    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        let m = m.clone();
        handles.push(tokio::spawn(
            async move { coordinator.submit(m).await.unwrap() },
        ));
    }

    let mut sent = 0_usize;
    for handle in handles {
        if matches!(handle.await.unwrap(), SubmitOutcome::Sent(_)) {
            sent += 1;
        }
    }
    assert!(sent >= 1, "at least the winning submission resolves sent");

    // Let the drain worker absorb the parked duplicates
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if coordinator.queued_len() == 0 {
            break;
        }
    }
    assert_eq!(coordinator.queued_len(), 0);
    assert_eq!(p1.invocations(), 1);

    shutdown_tx.send(Signal::Shutdown).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn snapshot_reports_counts_and_success_rate() {
    let p1 = mock("P1", 0.0, 5);
    let bad = mock("Bad", 1.0, 5);
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..EngineConfig::default()
    };
    let coordinator = Coordinator::new(
        config,
        vec![
            bad.clone() as Arc<dyn Transport>,
            p1.clone() as Arc<dyn Transport>,
        ],
    )
    .unwrap();

    assert_eq!(coordinator.snapshot().success_rate, "0.00%");

    // Both deliver via fallback
    coordinator.submit(message("one")).await.unwrap();
    coordinator.submit(message("two")).await.unwrap();

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.total_observed, 2);
    assert_eq!(snapshot.sent, 2);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.queued, 0);
    assert_eq!(snapshot.success_rate, "100.00%");
    assert_eq!(snapshot.providers.len(), 2);
    assert_eq!(&*snapshot.providers[0].name, "Bad");
    assert_eq!(snapshot.providers[0].failure_count, 2);
    assert_eq!(snapshot.providers[1].breaker_state, BreakerState::Closed);
}
