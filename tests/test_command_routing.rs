//! Command routing tests
//!
//! Drive `CommandRouter::handle` against recording mocks and check which
//! capabilities are invoked for realistic broker messages.

use mdm_agent::routing::{Command, CommandRouter, DispatchReport, DispatchTarget, ExtractError};
use mdm_agent::status::{StatusEvent, CATEGORY_MESSAGE};
use mdm_agent::testing::{MockCapabilities, MockReporter, MockSubscriptionSink};
use proptest::prelude::*;
use serde_json::json;

const ROOT: &str = "/agents/device-42";

struct Fixture {
    router: CommandRouter,
    capabilities: MockCapabilities,
    subscriptions: MockSubscriptionSink,
    reporter: MockReporter,
}

impl Fixture {
    fn new() -> Self {
        Self::with_sink(MockSubscriptionSink::new())
    }

    fn with_sink(subscriptions: MockSubscriptionSink) -> Self {
        Self {
            router: CommandRouter::new(),
            capabilities: MockCapabilities::new(),
            subscriptions,
            reporter: MockReporter::new(),
        }
    }

    async fn send(&self, topic: &str, payload: serde_json::Value) -> DispatchReport {
        self.send_raw(topic, payload.to_string().as_bytes()).await
    }

    async fn send_raw(&self, topic: &str, payload: &[u8]) -> DispatchReport {
        let target = DispatchTarget {
            capabilities: &self.capabilities,
            subscriptions: &self.subscriptions,
            reporter: &self.reporter,
        };
        self.router.handle(topic, payload, &target).await
    }
}

fn topic(suffix: &str) -> String {
    format!("{ROOT}/{suffix}")
}

#[tokio::test]
async fn test_query_commands_invoke_their_capability() {
    let f = Fixture::new();

    f.send(&topic("Command/Ping"), json!({"query": "Ping"})).await;
    f.send(&topic("Command/Geolocate"), json!({"query": "geolocate"})).await;
    f.send(&topic("Command/Inventory"), json!({"query": "INVENTORY"})).await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![Command::Ping, Command::Geolocate, Command::Inventory]
    );
}

#[tokio::test]
async fn test_query_with_other_value_invokes_nothing() {
    let f = Fixture::new();

    let report = f.send(&topic("Command/Ping"), json!({"query": "Geolocate"})).await;

    assert!(report.is_empty());
    assert!(f.capabilities.invocations().await.is_empty());
}

#[tokio::test]
async fn test_lock_now_and_later() {
    let f = Fixture::new();

    f.send(&topic("Command/Lock"), json!({"lock": "now"})).await;
    f.send(&topic("Command/Lock"), json!({"lock": "later"})).await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![
            Command::Lock { immediate: true },
            Command::Lock { immediate: false }
        ]
    );
}

#[tokio::test]
async fn test_wipe_only_on_now() {
    let f = Fixture::new();

    f.send(&topic("Command/Wipe"), json!({"wipe": "later"})).await;
    assert!(f.capabilities.invocations().await.is_empty());

    f.send(&topic("Command/Wipe"), json!({"wipe": "NOW"})).await;
    assert_eq!(f.capabilities.invocations().await, vec![Command::Wipe]);
}

#[tokio::test]
async fn test_unenroll_only_on_now() {
    let f = Fixture::new();

    f.send(&topic("Command/Unenroll"), json!({"unenroll": "tomorrow"})).await;
    f.send(&topic("Command/Unenroll"), json!({"unenroll": "now"})).await;

    assert_eq!(f.capabilities.invocations().await, vec![Command::Unenroll]);
}

#[tokio::test]
async fn test_password_min_length_invoked_once_with_value() {
    let f = Fixture::new();

    let report = f
        .send(&topic("Policy/passwordMinLength"), json!({"passwordMinLength": 6}))
        .await;

    assert_eq!(report.dispatched, vec![Command::PasswordMinLength(6)]);
    assert_eq!(
        f.capabilities.count(&Command::PasswordMinLength(6)).await,
        1
    );
    assert_eq!(f.capabilities.invocations().await.len(), 1);
}

#[tokio::test]
async fn test_policy_values_are_forwarded_verbatim() {
    let f = Fixture::new();

    f.send(
        &topic("Policy/passwordQuality"),
        json!({"passwordQuality": "PASSWORD_QUALITY_NUMERIC"}),
    )
    .await;
    f.send(&topic("Policy/MaximumTimeToLock"), json!({"MaximumTimeToLock": -5})).await;
    f.send(&topic("Policy/disableCamera"), json!({"disableCamera": "TRUE"})).await;
    f.send(&topic("Policy/storageEncryption"), json!({"storageEncryption": false})).await;
    f.send(&topic("Policy/passwordEnabled"), json!({"passwordEnabled": "anything"})).await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![
            Command::PasswordQuality("PASSWORD_QUALITY_NUMERIC".to_string()),
            Command::MaximumTimeToLock(-5),
            Command::DisableCamera(true),
            Command::StorageEncryption(false),
            Command::PasswordEnabled,
        ]
    );
}

#[tokio::test]
async fn test_privileged_setters_need_task_id() {
    let f = Fixture::new();

    let report = f
        .send(&topic("Policy/disableScreenCapture"), json!({"disableScreenCapture": true}))
        .await;
    assert!(matches!(
        report.rejected.as_slice(),
        [("disableScreenCapture", ExtractError::MissingField(field))] if field == "taskId"
    ));

    f.send(
        &topic("Policy/disableGPS"),
        json!({"disableGPS": true, "taskId": "17"}),
    )
    .await;
    assert_eq!(f.capabilities.invocations().await, vec![Command::DisableGps(true)]);
}

#[tokio::test]
async fn test_deploy_and_remove_app() {
    let f = Fixture::new();

    f.send(
        &topic("Policy/deployApp"),
        json!({"deployApp": "org.example.app", "id": 12, "versionCode": "3", "taskId": "99"}),
    )
    .await;
    f.send(
        &topic("Policy/removeApp"),
        json!({"removeApp": "org.example.app", "taskId": "100"}),
    )
    .await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![
            Command::DeployApp {
                package: "org.example.app".to_string(),
                id: "12".to_string(),
                version_code: "3".to_string(),
                task_id: "99".to_string(),
            },
            Command::RemoveApp {
                package: "org.example.app".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_deploy_and_remove_file() {
    let f = Fixture::new();

    f.send(
        &topic("Policy/deployFile"),
        json!({"deployFile": "%SDCARD%/doc.pdf", "id": "4", "version": "1", "taskId": "5"}),
    )
    .await;
    f.send(
        &topic("Policy/removeFile"),
        json!({"removeFile": "%SDCARD%/doc.pdf", "taskId": "6"}),
    )
    .await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![
            Command::DeployFile {
                file: "%SDCARD%/doc.pdf".to_string(),
                id: "4".to_string(),
                version: "1".to_string(),
                task_id: "5".to_string(),
            },
            Command::RemoveFile {
                file: "%SDCARD%/doc.pdf".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_deploy_missing_auxiliary_field_is_rejected() {
    let f = Fixture::new();

    let report = f
        .send(&topic("Policy/deployApp"), json!({"deployApp": "org.example.app", "id": "1"}))
        .await;

    assert_eq!(report.rejected.len(), 1);
    assert!(f.capabilities.invocations().await.is_empty());
}

#[tokio::test]
async fn test_subscribe_adds_child_wildcards() {
    let f = Fixture::new();

    let report = f
        .send(
            &topic("Command/Subscribe"),
            json!({"subscribe": [{"topic": "/fleet/7"}, {"topic": "/groups/sales"}]}),
        )
        .await;

    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(
        f.subscriptions.filters().await,
        vec!["/fleet/7/#".to_string(), "/groups/sales/#".to_string()]
    );
}

#[tokio::test]
async fn test_subscribe_while_disconnected_fails_in_isolation() {
    let f = Fixture::with_sink(MockSubscriptionSink::rejecting());

    let report = f
        .send(
            &topic("Command/Subscribe/Ping"),
            json!({"subscribe": [{"topic": "/fleet/7"}], "query": "Ping"}),
        )
        .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.dispatched, vec![Command::Ping]);
}

#[tokio::test]
async fn test_two_keywords_fire_both_capabilities() {
    let f = Fixture::new();

    let report = f
        .send(
            "/agents/device-42/Command/Lock/Wipe",
            json!({"lock": "now", "wipe": "now"}),
        )
        .await;

    assert_eq!(
        report.dispatched,
        vec![Command::Lock { immediate: true }, Command::Wipe]
    );
}

#[tokio::test]
async fn test_malformed_field_does_not_block_other_keyword() {
    let f = Fixture::new();

    let report = f
        .send(
            "/agents/device-42/Policy/passwordMinLength/Ping",
            json!({"passwordMinLength": "abc", "query": "Ping"}),
        )
        .await;

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "passwordMinLength");
    assert_eq!(f.capabilities.invocations().await, vec![Command::Ping]);
}

#[tokio::test]
async fn test_lock_with_non_string_value_locks_later() {
    let f = Fixture::new();

    f.send(&topic("Command/Lock"), json!({"lock": true})).await;
    f.send(&topic("Command/Lock"), json!({"lock": {"when": "now"}})).await;

    assert_eq!(
        f.capabilities.invocations().await,
        vec![
            Command::Lock { immediate: false },
            Command::Lock { immediate: false }
        ]
    );
}

#[tokio::test]
async fn test_capability_failure_is_isolated() {
    let f = Fixture::new();
    f.capabilities.fail("lock_device");

    let report = f
        .send(
            "/agents/device-42/Command/Lock/Ping",
            json!({"lock": "now", "query": "ping"}),
        )
        .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Command::Lock { immediate: true });
    assert_eq!(report.dispatched, vec![Command::Ping]);

    // Later messages are unaffected
    f.send(&topic("Command/Ping"), json!({"query": "Ping"})).await;
    assert_eq!(f.capabilities.count(&Command::Ping).await, 2);
}

#[tokio::test]
async fn test_invalid_json_rejects_without_panicking() {
    let f = Fixture::new();

    let report = f.send_raw(&topic("Command/Wipe"), b"{\"wipe\": ").await;

    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(report.rejected[0].1, ExtractError::InvalidPayload(_)));
    assert!(f.capabilities.invocations().await.is_empty());
}

#[tokio::test]
async fn test_empty_topic_or_payload_is_silent() {
    let f = Fixture::new();

    assert!(f.send_raw("", br#"{"query":"Ping"}"#).await.is_empty());
    assert!(f.send_raw(&topic("Command/Ping"), b"").await.is_empty());

    assert!(f.reporter.events().is_empty());
    assert!(f.capabilities.invocations().await.is_empty());
}

#[tokio::test]
async fn test_every_message_body_is_logged() {
    let f = Fixture::new();

    f.send(&topic("Status/Version"), json!({"version": "2.0"})).await;

    let events = f.reporter.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        StatusEvent::Log { category, field, value, .. }
            if category == CATEGORY_MESSAGE && field == "Body" && value.contains("2.0")
    ));
}

proptest! {
    #[test]
    fn keyword_anywhere_in_topic_dispatches(
        prefix in "[a-z/]{0,12}",
        suffix in "[a-z/]{0,12}",
        upper in any::<bool>(),
    ) {
        let keyword = if upper { "WIPE" } else { "wipe" };
        let topic = format!("{prefix}{keyword}{suffix}");

        let routed = CommandRouter::new().route(&topic, br#"{"wipe":"now"}"#);
        let dispatched: Vec<_> = routed
            .into_iter()
            .filter_map(|r| match r.outcome {
                mdm_agent::routing::RouteOutcome::Dispatch(command) => Some(command),
                _ => None,
            })
            .collect();
        prop_assert_eq!(dispatched, vec![Command::Wipe]);
    }
}
