// tests/integration/connection_manager_test.rs

//! Integration tests for `ConnectionManager`
//! Tests: retries, terminal failure, single-flight init, handshake paths, reconnects.

use super::test_helpers::*;
use spinelgate::core::manager::ConnectionState;
use spinelgate::core::{GateError, KvCommands};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ===== Basic Lifecycle =====

#[tokio::test]
async fn test_init_connects_and_client_works() {
    init_tracing();
    let companion = Arc::new(MockCompanion::new());
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    assert_eq!(manager.state(), ConnectionState::Idle);
    manager.init().await.unwrap();

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.attempts_made(), 1);
    assert_eq!(companion.connect_count(), 1);

    let client = manager.client().unwrap();
    assert_eq!(client.ping().await.unwrap(), "PONG");
    client.set("greeting", "hello").await.unwrap();
    assert_eq!(client.get("greeting").await.unwrap(), Some("hello".to_string()));
}

#[tokio::test]
async fn test_client_before_init_is_not_initialized() {
    let companion = Arc::new(MockCompanion::new());
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));
    assert_eq!(companion.connect_count(), 0);
}

#[tokio::test]
async fn test_init_when_connected_is_a_no_op() {
    let companion = Arc::new(MockCompanion::new());
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    manager.init().await.unwrap();
    manager.init().await.unwrap();
    manager.init().await.unwrap();

    assert_eq!(companion.connect_count(), 1);
}

// ===== Retries =====

#[tokio::test]
async fn test_init_succeeds_after_failed_attempts_with_fixed_delay() {
    init_tracing();
    let delay = Duration::from_millis(50);
    let companion = Arc::new(MockCompanion::new().failing_first(2));
    let manager = manager_for(companion.clone(), 5, delay);

    let started = Instant::now();
    manager.init().await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= delay * 2,
        "two failed attempts must wait two delays, waited {elapsed:?}"
    );
    assert_eq!(manager.attempts_made(), 3);
    assert_eq!(companion.connect_count(), 3);
    assert!(manager.client().is_ok());
}

#[tokio::test]
async fn test_exhausted_retries_are_terminal() {
    init_tracing();
    let companion = Arc::new(MockCompanion::new().failing_first(100));
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    let err = manager.init().await.unwrap_err();
    match err {
        GateError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, GateError::Connectivity(_)));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));
    assert_eq!(companion.connect_count(), 3);

    // No further attempts, however often it is asked.
    assert!(manager.init().await.is_err());
    assert!(manager.init().await.is_err());
    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));
    assert_eq!(companion.connect_count(), 3);
    assert_eq!(manager.attempts_made(), 3);
}

#[tokio::test]
async fn test_single_attempt_policy_does_not_sleep() {
    let companion = Arc::new(MockCompanion::new().failing_first(1));
    let manager = manager_for(companion.clone(), 1, Duration::from_secs(30));

    let started = Instant::now();
    assert!(manager.init().await.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(companion.connect_count(), 1);
}

// ===== Single-flight =====

#[tokio::test]
async fn test_concurrent_init_shares_one_attempt() {
    init_tracing();
    let companion =
        Arc::new(MockCompanion::new().with_connect_delay(Duration::from_millis(100)));
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    let callers = (0..10).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.init().await })
    });
    let results = futures::future::join_all(callers).await;

    for result in results {
        assert!(result.unwrap().is_ok());
    }
    assert_eq!(companion.connect_count(), 1);
    assert_eq!(manager.attempts_made(), 1);
}

#[tokio::test]
async fn test_concurrent_init_shares_one_failure() {
    let companion = Arc::new(
        MockCompanion::new()
            .failing_first(100)
            .with_connect_delay(Duration::from_millis(50)),
    );
    let manager = manager_for(companion.clone(), 1, Duration::from_millis(10));

    let callers = (0..8).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.init().await })
    });
    let results = futures::future::join_all(callers).await;

    let messages: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap_err().to_string())
        .collect();
    assert!(messages.iter().all(|m| m == &messages[0]));
    assert_eq!(companion.connect_count(), 1);
}

#[tokio::test]
async fn test_cancelled_leader_does_not_abort_attempt() {
    let companion =
        Arc::new(MockCompanion::new().with_connect_delay(Duration::from_millis(100)));
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    let leader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.init().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    leader.abort();

    manager.init().await.unwrap();
    assert_eq!(companion.connect_count(), 1);
}

#[tokio::test]
async fn test_abandoned_attempt_does_not_answer_later_inits() {
    let companion =
        Arc::new(MockCompanion::new().with_connect_delay(Duration::from_millis(100)));
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    let leader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.init().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    leader.abort();

    // Nobody is left awaiting the attempt; it still completes and installs a client.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let client = manager.client().unwrap();

    companion.kill_connections().await;
    assert!(client.set("k", "v").await.is_err());
    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));

    manager.init().await.unwrap();
    assert!(manager.client().is_ok());
    assert_eq!(companion.connect_count(), 2);
}

// ===== Attempt Stages =====

#[tokio::test]
async fn test_open_timeout_is_reported() {
    let companion = Arc::new(MockCompanion::new().never_ready());
    let manager = manager_for(companion.clone(), 1, Duration::from_millis(10));

    match manager.init().await.unwrap_err() {
        GateError::RetriesExhausted { last, .. } => {
            assert!(matches!(*last, GateError::Timeout { stage: "open", .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_falls_back_to_ping() {
    for ping in [PingReply::Simple, PingReply::Bulk] {
        let companion = Arc::new(MockCompanion::new().with_behavior(ServerBehavior {
            hello: HelloReply::UnknownCommand,
            ping,
        }));
        let manager = manager_for(companion, 1, Duration::from_millis(10));

        manager.init().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}

#[tokio::test]
async fn test_handshake_fallback_rejects_wrong_pong() {
    let companion = Arc::new(MockCompanion::new().with_behavior(ServerBehavior {
        hello: HelloReply::UnknownCommand,
        ping: PingReply::Wrong,
    }));
    let manager = manager_for(companion, 1, Duration::from_millis(10));

    match manager.init().await.unwrap_err() {
        GateError::RetriesExhausted { last, .. } => match *last {
            GateError::Protocol { response, .. } => assert_eq!(response, "+PANG\r\n"),
            other => panic!("expected Protocol, got {other:?}"),
        },
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_handshake_rejects_other_error_reply() {
    let companion = Arc::new(MockCompanion::new().with_behavior(ServerBehavior {
        hello: HelloReply::Rejected,
        ping: PingReply::Simple,
    }));
    let manager = manager_for(companion, 1, Duration::from_millis(10));

    match manager.init().await.unwrap_err() {
        GateError::RetriesExhausted { last, .. } => match *last {
            GateError::Protocol { response, .. } => assert!(response.contains("NOPROTO")),
            other => panic!("expected Protocol, got {other:?}"),
        },
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stopped_companion_is_asked_to_start() {
    let companion = Arc::new(MockCompanion::new().stopped());
    let manager = manager_for(companion.clone(), 1, Duration::from_millis(10));

    manager.init().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while companion.start_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(companion.start_count(), 1);
}

// ===== Reconnects and Teardown =====

#[tokio::test]
async fn test_reconnects_after_latched_write_error() {
    init_tracing();
    let companion = Arc::new(MockCompanion::new());
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    manager.init().await.unwrap();
    let client = manager.client().unwrap();
    client.set("k", "v").await.unwrap();

    companion.kill_connections().await;
    let err = client.set("k", "w").await.unwrap_err();
    assert!(matches!(err, GateError::Write(_)), "got {err:?}");
    assert!(client.adapter().write_error_latched());
    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));

    manager.init().await.unwrap();
    assert_eq!(companion.connect_count(), 2);
    let fresh = manager.client().unwrap();
    assert_eq!(fresh.get("k").await.unwrap(), Some("v".to_string()));
}

#[tokio::test]
async fn test_destroy_is_final_and_idempotent() {
    let companion = Arc::new(MockCompanion::new());
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    manager.init().await.unwrap();
    let client = manager.client().unwrap();

    manager.destroy().await;
    manager.destroy().await;

    assert_eq!(manager.state(), ConnectionState::Destroyed);
    assert!(client.adapter().is_destroyed());
    assert!(matches!(manager.client(), Err(GateError::NotInitialized)));
    assert!(matches!(manager.init().await, Err(GateError::Destroyed)));
    assert_eq!(companion.connect_count(), 1);
}

#[tokio::test]
async fn test_destroy_during_attempt_discards_the_connection() {
    let companion =
        Arc::new(MockCompanion::new().with_connect_delay(Duration::from_millis(100)));
    let manager = manager_for(companion.clone(), 3, Duration::from_millis(10));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.init().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.destroy().await;

    assert!(matches!(pending.await.unwrap(), Err(GateError::Destroyed)));
    assert_eq!(manager.state(), ConnectionState::Destroyed);
    assert!(manager.client().is_err());
}
