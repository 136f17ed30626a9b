//! Connection Manager lifecycle tests
//!
//! The mock transport stands in for the network: each test opens a session,
//! then plays the callbacks a broker connection would produce. Timer tests
//! run on paused time.


use mdm_agent::connection::{ConnectOutcome, SessionState};
use mdm_agent::error::AgentError;
use mdm_agent::routing::Command;
use mdm_agent::status::{CATEGORY_DELIVERY, CATEGORY_ERROR, CATEGORY_LOGIN};
use mdm_agent::testing::{test_broker_config, StaticConfigSource};
use mdm_agent::transport::{Generation, TransportError, TransportErrorKind};
use serde_json::json;
use std::time::Duration;
use test_helpers::{network_error, settle, TestAgent, ROOT};

const MANIFEST: &str = "/FlyvemdmManifest/Status/Version";

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_success_announces_session() {
    let (agent, generation) = TestAgent::connected().await;

    assert_eq!(agent.manager.state().await, SessionState::Connected);
    assert_eq!(agent.manager.generation().await, generation);

    let session = agent.transport.last_session().unwrap();
    assert_eq!(
        session.subscriptions(),
        vec![format!("{ROOT}/#"), MANIFEST.to_string()]
    );

    let published = session.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, format!("{ROOT}/Status/Online"));
    assert_eq!(published[0].json(), json!({"online": true}));
    assert!(!published[0].retain);

    assert_eq!(agent.reporter.statuses(), vec![true]);
    assert_eq!(agent.capabilities.invocations().await, vec![Command::Inventory]);
    assert!(!agent.manager.has_pending_reconnect().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_request_carries_last_will_and_fresh_client_id() {
    let agent = TestAgent::new();

    agent.manager.connect().await.unwrap();
    let first = agent.transport.requests().remove(0);
    assert_eq!(first.last_will.topic, format!("{ROOT}/Status/Online"));
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&first.last_will.payload).unwrap(),
        json!({"online": false})
    );
    assert_eq!(first.broker.host, "broker.test");

    // A second attempt while still connecting supersedes the first
    agent.manager.connect().await.unwrap();
    let requests = agent.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].client_id, requests[1].client_id);
    assert!(requests[1].generation > requests[0].generation);
    assert!(agent.transport.sessions()[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_login_parameters_are_reported_without_secret() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();

    let login = agent.reporter.logs(CATEGORY_LOGIN);
    assert_eq!(
        login,
        vec![
            ("Broker".to_string(), "broker.test".to_string()),
            ("Port".to_string(), "1883".to_string()),
            ("User".to_string(), "device-42".to_string()),
            ("Topic".to_string(), ROOT.to_string()),
        ]
    );
    assert!(agent
        .reporter
        .events()
        .iter()
        .all(|event| !format!("{event:?}").contains("s3cret")));
}

#[tokio::test(start_paused = true)]
async fn test_start_when_connected_is_a_no_op() {
    let (agent, _) = TestAgent::connected().await;

    let outcome = agent.manager.connect().await.unwrap();

    assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
    assert_eq!(agent.transport.open_count(), 1);
    assert_eq!(agent.transport.last_session().unwrap().subscriptions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_secret_aborts_before_io() {
    let mut broker = test_broker_config();
    broker.secret.clear();
    let agent = TestAgent::with_config(StaticConfigSource::new(broker));

    let result = agent.manager.connect().await;

    assert!(matches!(result, Err(AgentError::MissingSecret)));
    assert_eq!(agent.transport.open_count(), 0);
    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert!(!agent.manager.has_pending_reconnect().await);
    assert_eq!(agent.reporter.logs(CATEGORY_ERROR).len(), 1);

    advance(Duration::from_secs(120)).await;
    assert_eq!(agent.transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_config_error_schedules_nothing() {
    let agent = TestAgent::with_config(StaticConfigSource::empty());

    let result = agent.manager.connect().await;

    assert!(matches!(result, Err(AgentError::Config(_))));
    assert!(!agent.manager.has_pending_reconnect().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_reports_code_and_retries_on_schedule() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let generation = agent.transport.last_generation().unwrap();

    agent
        .transport
        .fail_connect(generation, network_error(5))
        .await;

    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.reporter.statuses(), vec![false]);
    let errors = agent.reporter.logs(CATEGORY_ERROR);
    assert!(errors.iter().any(|(field, _)| field == "Error on connect"));
    assert!(errors.iter().any(|(field, _)| field == "5"));
    assert!(agent.manager.has_pending_reconnect().await);

    // First retry after the short delay
    advance(Duration::from_millis(999)).await;
    assert_eq!(agent.transport.open_count(), 1);
    advance(Duration::from_millis(1)).await;
    assert_eq!(agent.transport.open_count(), 2);

    // Retry attempt fails too; the same timer keeps the fixed period
    let retry = agent.transport.last_generation().unwrap();
    agent.transport.fail_connect(retry, network_error(5)).await;
    advance(Duration::from_secs(29)).await;
    assert_eq!(agent.transport.open_count(), 2);
    advance(Duration::from_secs(1)).await;
    assert_eq!(agent.transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fire_observing_connected_stops_timer_without_connecting() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let first = agent.transport.last_generation().unwrap();
    agent.transport.fail_connect(first, network_error(3)).await;

    advance(Duration::from_secs(1)).await;
    let retry = agent.transport.last_generation().unwrap();
    assert_ne!(retry, first);
    agent.transport.complete_connect(retry).await;

    assert_eq!(agent.manager.state().await, SessionState::Connected);
    // Still pending until the next fire sees the session up
    assert!(agent.manager.has_pending_reconnect().await);

    advance(Duration::from_secs(30)).await;
    assert_eq!(agent.transport.open_count(), 2);
    assert_eq!(agent.manager.state().await, SessionState::Connected);
    assert!(!agent.manager.has_pending_reconnect().await);

    advance(Duration::from_secs(120)).await;
    assert_eq!(agent.transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_loss_before_timer_stops_reuses_the_pending_timer() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let first = agent.transport.last_generation().unwrap();
    agent.transport.fail_connect(first, network_error(3)).await;

    advance(Duration::from_secs(1)).await;
    let retry = agent.transport.last_generation().unwrap();
    agent.transport.complete_connect(retry).await;
    agent
        .transport
        .lose_connection(retry, network_error(0))
        .await;

    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert!(agent.manager.has_pending_reconnect().await);

    // No second timer with its own 1s delay; the running one fires at 31s
    advance(Duration::from_secs(1)).await;
    assert_eq!(agent.transport.open_count(), 2);
    advance(Duration::from_secs(29)).await;
    assert_eq!(agent.transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_keep_a_single_timer() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let generation = agent.transport.last_generation().unwrap();

    agent
        .transport
        .fail_connect(generation, network_error(1))
        .await;
    // Late duplicate failure for the same attempt is ignored
    agent
        .transport
        .fail_connect(generation, network_error(1))
        .await;

    advance(Duration::from_secs(1)).await;
    assert_eq!(agent.transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_open_failure_is_handled_like_connect_failure() {
    let agent = TestAgent::new();
    agent.transport.fail_open_with(TransportError::new(
        TransportErrorKind::Tls,
        "no TLS 1.2 context available",
    ));

    let result = agent.manager.connect().await;

    assert!(matches!(result, Err(AgentError::Transport(_))));
    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.reporter.statuses(), vec![false]);
    assert!(agent
        .reporter
        .logs(CATEGORY_ERROR)
        .iter()
        .any(|(field, _)| field == "0"));
    assert!(agent.manager.has_pending_reconnect().await);

    agent.transport.clear_open_failure();
    advance(Duration::from_secs(1)).await;
    let generation = agent.transport.last_generation().unwrap();
    agent.transport.complete_connect(generation).await;
    assert_eq!(agent.manager.state().await, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_stale_success_does_not_resurrect_session() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let stale = agent.transport.last_generation().unwrap();
    agent.transport.fail_connect(stale, network_error(3)).await;

    advance(Duration::from_secs(1)).await;
    let current = agent.transport.last_generation().unwrap();

    agent.transport.complete_connect(stale).await;
    assert_eq!(agent.manager.state().await, SessionState::Connecting);
    assert!(agent.reporter.statuses().iter().all(|online| !online));

    agent.transport.complete_connect(current).await;
    assert_eq!(agent.manager.state().await, SessionState::Connected);
    assert_eq!(agent.reporter.statuses(), vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_honor_only_latest_generation() {
    let agent = TestAgent::new();

    let (a, b) = tokio::join!(agent.manager.connect(), agent.manager.connect());
    let (ConnectOutcome::Started(a), ConnectOutcome::Started(b)) = (a.unwrap(), b.unwrap()) else {
        panic!("both calls start an attempt while not connected");
    };
    let latest = a.max(b);
    let superseded = a.min(b);

    agent.transport.complete_connect(superseded).await;
    assert_eq!(agent.manager.state().await, SessionState::Connecting);

    agent.transport.complete_connect(latest).await;
    assert_eq!(agent.manager.state().await, SessionState::Connected);
    assert_eq!(agent.manager.generation().await, latest);
    assert_eq!(agent.capabilities.count(&Command::Inventory).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_reports_and_reconnects() {
    let (agent, generation) = TestAgent::connected().await;

    agent
        .transport
        .lose_connection(
            generation,
            TransportError::new(TransportErrorKind::Network, "keep alive timeout"),
        )
        .await;

    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.reporter.statuses(), vec![true, false]);
    assert!(agent
        .reporter
        .logs(CATEGORY_ERROR)
        .contains(&("Connection lost".to_string(), "keep alive timeout".to_string())));
    assert!(agent.transport.sessions()[0].is_closed());

    advance(Duration::from_secs(1)).await;
    let next = agent.transport.last_generation().unwrap();
    agent.transport.complete_connect(next).await;
    assert_eq!(agent.manager.state().await, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_stale_loss_is_ignored() {
    let (agent, generation) = TestAgent::connected().await;

    agent
        .transport
        .lose_connection(Generation(generation.0 + 10), network_error(0))
        .await;

    assert_eq!(agent.manager.state().await, SessionState::Connected);
    assert!(!agent.manager.has_pending_reconnect().await);
}

#[tokio::test(start_paused = true)]
async fn test_messages_are_routed_to_capabilities() {
    let (agent, generation) = TestAgent::connected().await;
    agent.capabilities.clear().await;

    agent
        .transport
        .deliver(
            generation,
            &format!("{ROOT}/Command/Lock"),
            br#"{"lock":"now"}"#,
        )
        .await;

    assert_eq!(
        agent.capabilities.invocations().await,
        vec![Command::Lock { immediate: true }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_handled_while_a_capability_blocks() {
    let (agent, generation) = TestAgent::connected().await;
    agent.capabilities.clear().await;
    agent.capabilities.hold("download_file");

    agent
        .transport
        .deliver(
            generation,
            &format!("{ROOT}/Policy/deployFile"),
            br#"{"deployFile":"%SDCARD%/doc.pdf","id":"4","version":"1","taskId":"5"}"#,
        )
        .await;
    assert!(matches!(
        agent.capabilities.invocations().await.as_slice(),
        [Command::DeployFile { .. }]
    ));

    agent
        .transport
        .lose_connection(generation, network_error(0))
        .await;

    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.reporter.statuses(), vec![true, false]);
    assert!(agent.manager.has_pending_reconnect().await);

    agent.capabilities.release();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_messages_from_stale_session_are_dropped() {
    let (agent, generation) = TestAgent::connected().await;
    agent.capabilities.clear().await;

    agent
        .transport
        .deliver(
            Generation(generation.0 - 1),
            &format!("{ROOT}/Command/Wipe"),
            br#"{"wipe":"now"}"#,
        )
        .await;

    assert!(agent.capabilities.invocations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_runtime_subscriptions_survive_reconnect() {
    let (agent, generation) = TestAgent::connected().await;

    agent
        .transport
        .deliver(
            generation,
            &format!("{ROOT}/Command/Subscribe"),
            br#"{"subscribe":[{"topic":"/fleet/7"}]}"#,
        )
        .await;

    let expected = vec![
        format!("{ROOT}/#"),
        MANIFEST.to_string(),
        "/fleet/7/#".to_string(),
    ];
    assert_eq!(agent.manager.subscriptions().await, expected);
    assert_eq!(agent.transport.sessions()[0].subscriptions(), expected);

    agent
        .transport
        .lose_connection(generation, network_error(0))
        .await;
    advance(Duration::from_secs(1)).await;
    let next = agent.transport.last_generation().unwrap();
    agent.transport.complete_connect(next).await;

    let session = agent.transport.last_session().unwrap();
    assert_eq!(session.subscriptions(), expected);
    assert_eq!(agent.manager.subscriptions().await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_ack_is_logged() {
    let (agent, generation) = TestAgent::connected().await;

    agent.transport.acknowledge(generation, 42).await;

    assert_eq!(
        agent.reporter.logs(CATEGORY_DELIVERY),
        vec![("Response id".to_string(), "42".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_delivery_ack_from_stale_session_is_ignored() {
    let (agent, generation) = TestAgent::connected().await;

    agent
        .transport
        .acknowledge(Generation(generation.0 - 1), 7)
        .await;
    agent.transport.acknowledge(generation, 8).await;

    assert_eq!(
        agent.reporter.logs(CATEGORY_DELIVERY),
        vec![("Response id".to_string(), "8".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_inventory_trigger_only_when_connected() {
    let agent = TestAgent::new();

    assert!(matches!(
        agent.manager.request_inventory().await,
        Err(AgentError::NotConnected {
            state: SessionState::Disconnected
        })
    ));

    agent.connect_and_complete().await;
    agent.manager.request_inventory().await.unwrap();
    assert_eq!(agent.capabilities.count(&Command::Inventory).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_publishes_offline_and_stops_retrying() {
    let (agent, generation) = TestAgent::connected().await;

    agent.manager.shutdown().await;

    let session = agent.transport.last_session().unwrap();
    let published = session.published();
    assert_eq!(published.last().unwrap().json(), json!({"online": false}));
    assert!(session.is_closed());
    assert_eq!(agent.manager.state().await, SessionState::Disconnected);
    assert_eq!(agent.reporter.statuses(), vec![true, false]);

    // Callbacks after shutdown change nothing
    agent
        .transport
        .lose_connection(generation, network_error(0))
        .await;
    assert!(!agent.manager.has_pending_reconnect().await);
    assert!(matches!(
        agent.manager.connect().await,
        Err(AgentError::ShutDown)
    ));

    advance(Duration::from_secs(120)).await;
    assert_eq!(agent.transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let agent = TestAgent::new();
    agent.manager.connect().await.unwrap();
    let generation = agent.transport.last_generation().unwrap();
    agent
        .transport
        .fail_connect(generation, network_error(2))
        .await;
    assert!(agent.manager.has_pending_reconnect().await);

    agent.manager.shutdown().await;
    agent.manager.shutdown().await;

    assert!(!agent.manager.has_pending_reconnect().await);
    advance(Duration::from_secs(60)).await;
    assert_eq!(agent.transport.open_count(), 1);
}
