//! Session supervision through the runtime: bounded reconnection, credential
//! resets, restarts and graceful shutdown.

use crate::helpers::{FlakyDriver, build_runtime, eventually, fast_config};
use electra::admission::{Rule, SubmitOutcome};
use electra::channels::traits::{DisconnectReason, InboundMessage, SessionEvent};
use electra::supervisor::{ConnectionState, RestartOutcome};
use std::time::Duration;

#[tokio::test]
async fn flaky_start_recovers_and_ready_resets_attempts() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::failing(2));
    let handles = runtime.start();

    assert!(eventually(|| fakes.driver.init_calls() == 3).await);
    assert_eq!(runtime.health().reconnect_attempts(), 2);

    fakes.events.send(SessionEvent::Ready).await.unwrap();
    assert!(eventually(|| runtime.health().connection_state() == ConnectionState::Connected).await);
    assert_eq!(runtime.health().reconnect_attempts(), 0);
    assert!(runtime.health().is_healthy());
    assert!(fakes.process.codes().is_empty());

    runtime.stop(handles).await;
}

#[tokio::test]
async fn messages_wait_for_a_ready_session() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::failing(1));
    let handles = runtime.start();
    assert!(eventually(|| fakes.driver.init_calls() == 2).await);
    assert_eq!(runtime.health().reconnect_attempts(), 1);

    let (_, mut settled) = runtime
        .queue()
        .enqueue(InboundMessage::text("I", "hacen envíos"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(settled.try_recv().is_err(), "processed before the session was ready");
    assert_eq!(runtime.queue().stats().pending, 1);
    assert_eq!(fakes.messenger.total(), 0);

    fakes.events.send(SessionEvent::Ready).await.unwrap();
    assert_eq!(settled.await.unwrap(), SubmitOutcome::Processed(Rule::Generated));
    assert_eq!(fakes.messenger.sent_to("I").len(), 1);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn exhausted_reconnects_terminate_with_failure_code() {
    let mut config = fast_config();
    config.supervisor.max_reconnect_attempts = 5;
    config.supervisor.clear_credentials_after_attempts = 3;
    let (mut runtime, fakes) = build_runtime(config, FlakyDriver::failing(100));
    let handles = runtime.start();

    assert!(eventually(|| !fakes.process.codes().is_empty()).await);
    assert_eq!(fakes.process.codes(), vec![1]);
    // Initial start plus five attempts.
    assert_eq!(fakes.driver.init_calls(), 6);
    // Attempts four and five treat the stored session as corrupt.
    assert_eq!(fakes.credentials.clears(), 2);
    assert_eq!(runtime.health().connection_state(), ConnectionState::Failed);
    assert!(!runtime.health().is_healthy());

    let snapshot = runtime.health().snapshot();
    assert_eq!(snapshot.status, "unhealthy");
    assert_eq!(snapshot.total_reconnects, 5);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn logout_clears_credentials_before_reconnecting() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = runtime.start();
    assert!(eventually(|| fakes.driver.init_calls() == 1).await);
    fakes.events.send(SessionEvent::Ready).await.unwrap();

    fakes
        .events
        .send(SessionEvent::Disconnected(DisconnectReason::Logout))
        .await
        .unwrap();
    assert!(eventually(|| fakes.driver.init_calls() == 2).await);
    assert_eq!(fakes.credentials.clears(), 1);

    fakes
        .events
        .send(SessionEvent::Disconnected(DisconnectReason::Other(
            "CONFLICT".to_owned(),
        )))
        .await
        .unwrap();
    assert!(eventually(|| fakes.driver.init_calls() == 3).await);
    assert_eq!(fakes.credentials.clears(), 1, "network drops keep the session");

    runtime.stop(handles).await;
}

#[tokio::test]
async fn restart_tears_down_and_reinitializes() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = runtime.start();
    assert!(eventually(|| fakes.driver.init_calls() == 1).await);

    assert_eq!(
        runtime.supervisor().restart_services().await,
        RestartOutcome::Restarted
    );
    assert_eq!(fakes.driver.destroy_calls(), 1);
    assert_eq!(fakes.driver.init_calls(), 2);
    assert_eq!(fakes.credentials.clears(), 1);
    assert!(runtime.health().snapshot().last_restart_at.is_some());

    runtime.stop(handles).await;
}

#[tokio::test]
async fn shutdown_preserves_credentials() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = runtime.start();
    assert!(eventually(|| fakes.driver.init_calls() == 1).await);

    runtime.stop(handles).await;
    assert_eq!(fakes.driver.destroy_calls(), 1);
    assert_eq!(fakes.credentials.clears(), 0);
    assert_eq!(
        runtime.health().connection_state(),
        ConnectionState::Disconnected
    );
    assert!(fakes.process.codes().is_empty());
}
