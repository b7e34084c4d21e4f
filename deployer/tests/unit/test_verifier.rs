//! Registration verifier tests against a mock monitoring server

use std::time::Duration;

use chrono::Utc;
use mockito::{Matcher, Server};
use secrecy::SecretString;
use serde_json::json;

use fleet_deployer::errors::DeployError;
use fleet_deployer::utils::CooldownOptions;
use fleet_deployer::verify::verifier::{Verifier, VerifierOptions};
use fleet_deployer::zabbix::client::ZabbixClient;

fn verifier(url: &str, attempts: u32) -> Verifier {
    let client = ZabbixClient::new(url, SecretString::from("test-token".to_string())).unwrap();
    Verifier::new(
        client,
        VerifierOptions {
            attempts,
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
            freshness: Duration::from_secs(600),
        },
    )
}

fn rpc_result(result: serde_json::Value) -> String {
    json!({ "jsonrpc": "2.0", "result": result, "id": 1 }).to_string()
}

#[tokio::test]
async fn test_registered_and_fresh() {
    let mut server = Server::new_async().await;
    let host = server
        .mock("POST", "/api_jsonrpc.php")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "method": "host.get",
            "params": { "filter": { "host": ["rpi-001"] } }
        })))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!([{ "hostid": "10501", "host": "rpi-001", "name": "rpi-001" }])))
        .expect(1)
        .create_async()
        .await;
    let clock = (Utc::now().timestamp() - 30).to_string();
    let items = server
        .mock("POST", "/api_jsonrpc.php")
        .match_body(Matcher::PartialJson(json!({
            "method": "item.get",
            "params": { "hostids": ["10501"] }
        })))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!([
            { "itemid": "1", "key_": "agent.ping", "lastclock": clock },
            { "itemid": "2", "key_": "system.uptime", "lastclock": "0" }
        ])))
        .create_async()
        .await;

    let status = verifier(&server.url(), 3).check("rpi-001").await.unwrap();

    assert!(status.registered);
    assert!(status.fresh);
    assert!(status.is_healthy());
    assert_eq!(status.host_id.as_deref(), Some("10501"));
    assert_eq!(status.lookups, 1);
    assert!(status.last_data_age.unwrap() < Duration::from_secs(120));
    host.assert_async().await;
    items.assert_async().await;
}

#[tokio::test]
async fn test_registered_without_data() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api_jsonrpc.php")
        .match_body(Matcher::PartialJson(json!({ "method": "host.get" })))
        .with_body(rpc_result(json!([{ "hostid": "7", "host": "radxa-01" }])))
        .create_async()
        .await;
    server
        .mock("POST", "/api_jsonrpc.php")
        .match_body(Matcher::PartialJson(json!({ "method": "item.get" })))
        .with_body(rpc_result(json!([{ "itemid": "1", "lastclock": "0" }])))
        .create_async()
        .await;

    let status = verifier(&server.url(), 1).check("radxa-01").await.unwrap();

    assert!(status.registered);
    assert!(!status.fresh);
    assert!(status.last_data_age.is_none());
}

#[tokio::test]
async fn test_unregistered_after_bounded_lookups() {
    let mut server = Server::new_async().await;
    let lookups = server
        .mock("POST", "/api_jsonrpc.php")
        .match_body(Matcher::PartialJson(json!({ "method": "host.get" })))
        .with_body(rpc_result(json!([])))
        .expect(4)
        .create_async()
        .await;

    let status = verifier(&server.url(), 4).check("mac-001").await.unwrap();

    assert!(!status.registered);
    assert_eq!(status.lookups, 4);
    assert!(status.host_id.is_none());
    lookups.assert_async().await;
}

#[tokio::test]
async fn test_api_error_is_reported() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api_jsonrpc.php")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "error": { "code": -32602, "message": "Invalid params.", "data": "Not authorized." },
                "id": 1
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let err = verifier(&server.url(), 2).check("rpi-001").await.unwrap_err();

    match err {
        DeployError::ApiError(message) => assert!(message.contains("Not authorized")),
        other => panic!("unexpected error: {:?}", other),
    }
}
