//! Example driver: wires mock transports into the coordinator, submits a
//! handful of messages (including a duplicate), and prints the resulting
//! engine snapshot.

use std::sync::Arc;

use herald::{
    Coordinator, EngineConfig, EngineEvent, EventKind, Message, MockTransport, RateLimitConfig,
    RetryPolicy, Signal, SubmitOutcome, Transport,
};
use tokio::{sync::broadcast, time::Duration};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let providers: Vec<Arc<dyn Transport>> = vec![
        Arc::new(MockTransport::new("primary", 0.4, Duration::from_millis(20))),
        Arc::new(MockTransport::new("backup", 0.0, Duration::from_millis(35))),
    ];

    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 500,
        },
        rate_limit: RateLimitConfig {
            max_requests: 3,
            window_ms: 2_000,
        },
        drain_interval_ms: 250,
        ..EngineConfig::default()
    };

    let coordinator = Arc::new(Coordinator::new(config, providers)?);

    coordinator.events().subscribe(EventKind::Sent, |event| {
        if let EngineEvent::Sent { receipt, .. } = event {
            tracing::info!(
                delivery_id = %receipt.delivery_id,
                transport = %receipt.transport,
                "event: sent"
            );
        }
    });
    coordinator.events().subscribe(EventKind::Queued, |event| {
        if let EngineEvent::Queued { fingerprint, .. } = event {
            tracing::info!(fingerprint = %fingerprint, "event: queued");
        }
    });
    coordinator.events().subscribe(EventKind::Failed, |event| {
        if let EngineEvent::Failed { last_error, .. } = event {
            tracing::warn!(error = %last_error, "event: failed");
        }
    });

    let (shutdown_tx, _) = broadcast::channel(16);
    let drain = tokio::spawn({
        let coordinator = coordinator.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { coordinator.serve(shutdown).await }
    });

    let first = Message::new(
        "ops@example.com",
        "alerts@example.net",
        "disk usage warning",
        "volume /srv is at 91%",
    );
    let mut submissions = vec![first.clone()];
    for n in 1..=4 {
        submissions.push(Message::new(
            "ops@example.com",
            "alerts@example.net",
            format!("report #{n}"),
            format!("nightly report number {n}"),
        ));
    }

    for message in submissions {
        match coordinator.submit(message).await? {
            SubmitOutcome::Sent(receipt) => {
                tracing::info!(delivery_id = %receipt.delivery_id, attempts = receipt.attempts, "resolved: sent");
            }
            SubmitOutcome::Queued(fingerprint) => {
                tracing::info!(fingerprint = %fingerprint, "resolved: queued for drain");
            }
            SubmitOutcome::Failed { last_error, .. } => {
                tracing::warn!(error = %last_error, "resolved: failed");
            }
        }
    }

    // Replaying the first message returns the cached receipt without
    // touching a transport
    if let SubmitOutcome::Sent(receipt) = coordinator.submit(first).await? {
        tracing::info!(delivery_id = %receipt.delivery_id, "duplicate replayed from cache");
    }

    while coordinator.queued_len() > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let snapshot = coordinator.snapshot();
    tracing::info!(
        total = snapshot.total_observed,
        sent = snapshot.sent,
        failed = snapshot.failed,
        queued = snapshot.queued,
        success_rate = %snapshot.success_rate,
        "final snapshot"
    );
    for provider in &snapshot.providers {
        tracing::info!(
            transport = %provider.name,
            breaker = %provider.breaker_state,
            failures = provider.failure_count,
            "provider state"
        );
    }

    shutdown_tx.send(Signal::Shutdown).ok();
    drain.await?;

    Ok(())
}
