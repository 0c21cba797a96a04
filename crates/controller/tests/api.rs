//! REST surface tests over the in-memory store and a fake agent.

#[path = "support/common.rs"]
mod support;

use axum::http::StatusCode;
use uuid::Uuid;

use common::entities::{self as entities, Kind, NetworkInterface, Record};
use controller::persistence::interface_key;
use support::{
    ack_agent, create_node, expect_status, get_request, json_request, send, test_app,
};

#[tokio::test]
async fn post_nodes_assigns_a_uuid() {
    let app = test_app();
    let id = create_node(&app.router, "abc123").await;
    assert!(Uuid::try_parse(&id).is_ok());

    let response = send(&app.router, get_request(&format!("/nodes/{id}"))).await;
    let text = expect_status(response, StatusCode::OK).await;
    let node: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(node["serial"], "abc123");
    assert_eq!(node["location"], "smart edge lab");
}

#[tokio::test]
async fn post_nodes_validation_bodies_are_plain_text() {
    let app = test_app();

    let response = send(&app.router, json_request("POST", "/nodes", r#"{"id":"123"}"#)).await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(
        text,
        "Validation failed: id cannot be specified in POST request"
    );

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/nodes",
            r#"{"location":"smart edge lab","serial":"abc123"}"#,
        ),
    )
    .await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(text, "Validation failed: name cannot be empty");

    let response = send(
        &app.router,
        json_request("POST", "/nodes", r#"{"name":"node123","serial":"abc123"}"#),
    )
    .await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(text, "Validation failed: location cannot be empty");

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/nodes",
            r#"{"name":"node123","location":"smart edge lab"}"#,
        ),
    )
    .await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(text, "Validation failed: serial cannot be empty");
}

#[tokio::test]
async fn duplicate_serial_conflicts() {
    let app = test_app();
    create_node(&app.router, "abc123").await;

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/nodes",
            r#"{"name":"other","location":"lab","serial":"abc123"}"#,
        ),
    )
    .await;
    let text = expect_status(response, StatusCode::CONFLICT).await;
    assert_eq!(text, "serial abc123 already in use");
}

#[tokio::test]
async fn unknown_node_is_404() {
    let app = test_app();
    let response = send(
        &app.router,
        get_request("/nodes/99459845-422d-4b32-8395-e8f50fd34792"),
    )
    .await;
    let text = expect_status(response, StatusCode::NOT_FOUND).await;
    assert_eq!(text, "node not found");
}

#[tokio::test]
async fn patch_node_updates_fields() {
    let app = test_app();
    let id = create_node(&app.router, "abc123").await;

    let response = send(
        &app.router,
        json_request(
            "PATCH",
            &format!("/nodes/{id}"),
            r#"{"name":"node123","location":"rooftop cabinet","serial":"abc123"}"#,
        ),
    )
    .await;
    expect_status(response, StatusCode::OK).await;

    let response = send(&app.router, get_request(&format!("/nodes/{id}"))).await;
    let node: serde_json::Value =
        serde_json::from_str(&expect_status(response, StatusCode::OK).await).unwrap();
    assert_eq!(node["location"], "rooftop cabinet");

    let response = send(
        &app.router,
        json_request(
            "PATCH",
            &format!("/nodes/{id}"),
            r#"{"name":"node123","location":"rooftop cabinet"}"#,
        ),
    )
    .await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(text, "Validation failed: serial cannot be empty");
}

#[tokio::test]
async fn node_delete_with_dns_binding_is_422_naming_the_join_table() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;

    app.state
        .store
        .create(Record::NodeDnsConfig(entities::NodeDnsConfig {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.clone(),
            dns_config_id: Uuid::new_v4().to_string(),
        }))
        .await
        .expect("join row");

    let response = send(
        &app.router,
        json_request("DELETE", &format!("/nodes/{node_id}"), ""),
    )
    .await;
    let text = expect_status(response, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(
        text,
        format!("cannot delete node_id {node_id}: record in use in nodes_dns_configs")
    );
}

#[tokio::test]
async fn traffic_policy_validation_error_carries_the_field_path() {
    let app = test_app();
    let body = r#"{
        "name": "bad-policy",
        "traffic_rules": [{
            "description": "x",
            "priority": 5,
            "source": {
                "ip_filter": {
                    "address": "223.1.1.0",
                    "mask": 24,
                    "begin_port": -1,
                    "end_port": 80,
                    "protocol": "tcp"
                }
            },
            "target": {"action": "drop"}
        }]
    }"#;
    let response = send(&app.router, json_request("POST", "/traffic_policies", body)).await;
    let text = expect_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(
        text,
        "Validation failed: rules[0].source.ip_filter.begin_port must be in [0..65535]"
    );
}

#[tokio::test]
async fn traffic_policy_delete_blocked_by_interface_binding() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;

    let policy_body = r#"{
        "name": "ok-policy",
        "traffic_rules": [{
            "priority": 5,
            "source": {"ip_filter": {
                "address": "223.1.1.0", "mask": 24,
                "begin_port": 80, "end_port": 80, "protocol": "tcp"
            }},
            "target": {"action": "drop"}
        }]
    }"#;
    let response = send(
        &app.router,
        json_request("POST", "/traffic_policies", policy_body),
    )
    .await;
    let created: serde_json::Value =
        serde_json::from_str(&expect_status(response, StatusCode::CREATED).await).unwrap();
    let policy_id = created["id"].as_str().unwrap().to_string();

    app.state
        .store
        .create(Record::NodeInterfaceTrafficPolicy(
            entities::NodeInterfaceTrafficPolicy {
                id: Uuid::new_v4().to_string(),
                node_id,
                interface_id: "if0".into(),
                traffic_policy_id: policy_id.clone(),
            },
        ))
        .await
        .expect("binding");

    let response = send(
        &app.router,
        json_request("DELETE", &format!("/traffic_policies/{policy_id}"), ""),
    )
    .await;
    let text = expect_status(response, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(
        text,
        format!(
            "cannot delete traffic_policy_id {policy_id}: \
             record in use in nodes_interfaces_traffic_policies"
        )
    );
}

fn interface(node_id: &str, if_id: &str) -> NetworkInterface {
    NetworkInterface {
        id: if_id.into(),
        node_id: node_id.into(),
        description: String::new(),
        driver: "kernel".into(),
        kind: "none".into(),
        mac_address: String::new(),
        vlan: 0,
        zones: vec![],
        fallback_interface: String::new(),
    }
}

async fn seed_interfaces(app: &support::TestApp, node_id: &str, ids: &[&str]) {
    let records = ids
        .iter()
        .map(|if_id| Record::NetworkInterface(interface(node_id, if_id)))
        .collect();
    app.state.store.bulk_update(records).await.expect("seed");
}

#[tokio::test]
async fn partial_interface_update_is_rejected_and_mutates_nothing() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;
    seed_interfaces(&app, &node_id, &["if0", "if1", "if2", "if3"]).await;
    ack_agent(&app.state, Uuid::try_parse(&node_id).unwrap()).await;

    let body = serde_json::to_string(&vec![interface(&node_id, "if0")]).unwrap();
    let response = send(
        &app.router,
        json_request("PATCH", &format!("/nodes/{node_id}/interfaces"), &body),
    )
    .await;
    let text = expect_status(response, StatusCode::INTERNAL_SERVER_ERROR).await;
    assert!(
        text.ends_with("Network Interface if1 missing from request"),
        "unexpected body: {text}"
    );

    // Interfaces unchanged.
    let response = send(
        &app.router,
        get_request(&format!("/nodes/{node_id}/interfaces")),
    )
    .await;
    let listed: Vec<NetworkInterface> =
        serde_json::from_str(&expect_status(response, StatusCode::OK).await).unwrap();
    assert_eq!(listed.len(), 4);
}

#[tokio::test]
async fn full_interface_update_reaches_the_agent_and_persists() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;
    seed_interfaces(&app, &node_id, &["if0", "if1"]).await;
    let mut commands = ack_agent(&app.state, Uuid::try_parse(&node_id).unwrap()).await;

    let mut updated = vec![interface(&node_id, "if0"), interface(&node_id, "if1")];
    updated[0].kind = "upstream".into();
    updated[1].kind = "downstream".into();
    let body = serde_json::to_string(&updated).unwrap();

    let response = send(
        &app.router,
        json_request("PATCH", &format!("/nodes/{node_id}/interfaces"), &body),
    )
    .await;
    expect_status(response, StatusCode::OK).await;

    let cmd = commands.recv().await.expect("agent saw the update");
    assert!(matches!(
        cmd.command,
        Some(proto::agent_command::Command::UpdateInterfaces(_))
    ));

    let stored = app
        .state
        .store
        .read(Kind::NetworkInterface, &interface_key(&node_id, "if0"))
        .await
        .expect("read")
        .expect("present");
    assert_eq!(stored.field("node_id").as_deref(), Some(node_id.as_str()));
    let Record::NetworkInterface(stored) = stored else {
        panic!("wrong kind")
    };
    assert_eq!(stored.kind, "upstream");
}

#[tokio::test]
async fn idempotent_interface_patch_is_a_no_op() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;
    seed_interfaces(&app, &node_id, &["if0", "if1"]).await;
    ack_agent(&app.state, Uuid::try_parse(&node_id).unwrap()).await;

    let response = send(
        &app.router,
        get_request(&format!("/nodes/{node_id}/interfaces")),
    )
    .await;
    let before = expect_status(response, StatusCode::OK).await;

    let response = send(
        &app.router,
        json_request("PATCH", &format!("/nodes/{node_id}/interfaces"), &before),
    )
    .await;
    expect_status(response, StatusCode::OK).await;

    let response = send(
        &app.router,
        get_request(&format!("/nodes/{node_id}/interfaces")),
    )
    .await;
    let after = expect_status(response, StatusCode::OK).await;
    let before: Vec<NetworkInterface> = serde_json::from_str(&before).unwrap();
    let after: Vec<NetworkInterface> = serde_json::from_str(&after).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn app_binding_lifecycle_round_trip() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;
    let mut commands = ack_agent(&app.state, Uuid::try_parse(&node_id).unwrap()).await;

    let app_body = r#"{
        "type": "container",
        "name": "sensor-ingest",
        "vendor": "smart edge",
        "description": "",
        "version": "1.2.0",
        "cores": 2,
        "memory": 1024,
        "ports": [{"port": 8080, "protocol": "tcp"}],
        "source": "https://registry.local/sensor-ingest:1.2.0"
    }"#;
    let response = send(&app.router, json_request("POST", "/apps", app_body)).await;
    let created: serde_json::Value =
        serde_json::from_str(&expect_status(response, StatusCode::CREATED).await).unwrap();
    let app_id = created["id"].as_str().unwrap().to_string();

    // Bind (deploys through the dispatcher).
    let response = send(
        &app.router,
        json_request(
            "POST",
            &format!("/nodes/{node_id}/apps"),
            &format!(r#"{{"app_id":"{app_id}"}}"#),
        ),
    )
    .await;
    expect_status(response, StatusCode::CREATED).await;
    let cmd = commands.recv().await.expect("deploy dispatched");
    assert!(matches!(
        cmd.command,
        Some(proto::agent_command::Command::Deploy(_))
    ));

    // Start.
    let response = send(
        &app.router,
        json_request(
            "PATCH",
            &format!("/nodes/{node_id}/apps/{app_id}"),
            r#"{"cmd":"start"}"#,
        ),
    )
    .await;
    expect_status(response, StatusCode::OK).await;
    let cmd = commands.recv().await.expect("start dispatched");
    assert!(matches!(
        cmd.command,
        Some(proto::agent_command::Command::Lifecycle(_))
    ));

    // Unknown command is a 400.
    let response = send(
        &app.router,
        json_request(
            "PATCH",
            &format!("/nodes/{node_id}/apps/{app_id}"),
            r#"{"cmd":"pause"}"#,
        ),
    )
    .await;
    expect_status(response, StatusCode::BAD_REQUEST).await;

    // Unbind (undeploys).
    let response = send(
        &app.router,
        json_request("DELETE", &format!("/nodes/{node_id}/apps/{app_id}"), ""),
    )
    .await;
    expect_status(response, StatusCode::OK).await;
}

#[tokio::test]
async fn dispatch_to_a_known_but_disconnected_node_is_unavailable() {
    let app = test_app();
    let node_id = create_node(&app.router, "abc123").await;
    seed_interfaces(&app, &node_id, &["if0"]).await;
    // No agent registered; the dial must time out.

    let body = serde_json::to_string(&vec![interface(&node_id, "if0")]).unwrap();
    let response = send(
        &app.router,
        json_request("PATCH", &format!("/nodes/{node_id}/interfaces"), &body),
    )
    .await;
    let text = expect_status(response, StatusCode::SERVICE_UNAVAILABLE).await;
    assert!(text.contains("timed out dialing node"), "body: {text}");
}
