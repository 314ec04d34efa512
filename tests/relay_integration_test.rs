//! Integration tests for the bundle relay client against mock HTTP relays

use launchpad_pipeline::bundle::{BundleError, BundleRelayClient};
use launchpad_pipeline::config::{BundleConfig, RelayConfig};
use launchpad_pipeline::retry::RetryPolicy;
use launchpad_pipeline::types::Deadline;
use serde_json::json;
use std::time::Duration;

const PATH: &str = "/api/v1/bundles";

#[tokio::test]
async fn test_persistent_429_exhausts_instead_of_hanging() {
    let mut first = mockito::Server::new_async().await;
    let mut second = mockito::Server::new_async().await;

    // 5 attempts alternate between the two relays: 3 on the first, 2 on the second
    let first_mock = first
        .mock("POST", PATH)
        .with_status(429)
        .with_body("rate limited")
        .expect(3)
        .create_async()
        .await;
    let second_mock = second
        .mock("POST", PATH)
        .with_status(429)
        .with_body("rate limited")
        .expect(2)
        .create_async()
        .await;

    let client = BundleRelayClient::new(
        vec![first.url(), second.url()],
        RetryPolicy::relay(5, Duration::from_millis(10), Duration::from_millis(80)),
        Duration::from_secs(2),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let err = client
        .get_tip_accounts(Deadline::after(Duration::from_secs(30)))
        .await
        .unwrap_err();

    match err {
        BundleError::SubmissionExhausted {
            method,
            attempts,
            last_endpoint,
            last_status,
            delivery_unknown,
        } => {
            assert_eq!(method, "getTipAccounts");
            assert_eq!(attempts, 5);
            assert_eq!(last_endpoint, first.url());
            assert_eq!(last_status, Some(429));
            // every attempt was refused outright
            assert!(!delivery_unknown);
        }
        other => panic!("expected exhausted relay call, got {other:?}"),
    }
    // four backoff sleeps, bounded by the policy
    assert!(started.elapsed() < Duration::from_secs(5));

    first_mock.assert_async().await;
    second_mock.assert_async().await;
}

#[tokio::test]
async fn test_deadline_cuts_retries_short() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(429)
        .create_async()
        .await;

    let client = BundleRelayClient::new(
        vec![server.url()],
        RetryPolicy::relay(5, Duration::from_secs(2), Duration::from_secs(8)),
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client
        .call("getTipAccounts", json!([]), Deadline::after(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BundleError::DeadlineExceeded { attempts: 1, delivery_unknown: false, .. }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_from_config_rejects_empty_endpoint_list() {
    let relay = RelayConfig {
        endpoints: vec![],
        ..RelayConfig::default()
    };
    assert!(BundleRelayClient::from_config(&relay, &BundleConfig::default()).is_err());
}
