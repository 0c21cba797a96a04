//! Node endpoints: CRUD, interfaces, app bindings and lifecycle, DNS
//! bindings, traffic-policy bindings.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::entities::{
    Entity, Kind, NetworkInterface, Node, NodeApp, NodeAppTrafficPolicy, NodeDnsConfig,
    NodeInterfaceTrafficPolicy, Record, TrafficPolicy,
};

use crate::agent::LifecycleStatus;
use crate::app_state::AppState;
use crate::error::{Error, Result};

use super::{create_record, delete_record, read_record, IdResponse};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/nodes", post(create_node).get(list_nodes))
        .route(
            "/nodes/{node_id}",
            get(get_node).patch(update_node).delete(delete_node),
        )
        .route(
            "/nodes/{node_id}/interfaces",
            get(list_interfaces).patch(bulk_update_interfaces),
        )
        .route(
            "/nodes/{node_id}/interfaces/{interface_id}/policy",
            patch(set_interface_policy),
        )
        .route("/nodes/{node_id}/apps", post(bind_app).get(list_node_apps))
        .route(
            "/nodes/{node_id}/apps/{app_id}",
            get(app_status).patch(app_command).delete(unbind_app),
        )
        .route(
            "/nodes/{node_id}/apps/{app_id}/policy",
            patch(set_app_policy),
        )
        .route("/nodes/{node_id}/dns", post(bind_dns))
        .route("/nodes/{node_id}/dns/{dns_config_id}", axum::routing::delete(unbind_dns))
}

async fn create_node(
    State(state): State<AppState>,
    Json(payload): Json<Node>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    let created = create_record(&state, payload, Record::Node).await?;
    // Known to the registry from pre-approval on, so a dial before
    // first contact reports "not yet connected" rather than unknown.
    if let Ok(node_id) = Uuid::try_parse(&created.1.id) {
        state.registry.prime(node_id).await;
    }
    Ok(created)
}

async fn list_nodes(State(state): State<AppState>) -> Result<Json<Vec<Node>>> {
    let records = state.store.read_all(Kind::Node).await?;
    let nodes = records
        .into_iter()
        .filter_map(|record| match record {
            Record::Node(node) => Some(node),
            _ => None,
        })
        .collect();
    Ok(Json(nodes))
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>> {
    match read_record(&state, Kind::Node, &node_id, "node").await? {
        Record::Node(node) => Ok(Json(node)),
        _ => Err(Error::Internal("node row has wrong kind".into())),
    }
}

async fn update_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(mut payload): Json<Node>,
) -> Result<StatusCode> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    payload.id = node_id;
    payload.validate()?;
    state.store.bulk_update(vec![Record::Node(payload)]).await?;
    Ok(StatusCode::OK)
}

async fn delete_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<StatusCode> {
    delete_record(&state, Kind::Node, &node_id, "node").await?;

    // The node is gone; drop its connection and its interface rows
    // (deletable now, since no join rows survived the node delete).
    if let Ok(id) = Uuid::try_parse(&node_id) {
        state.registry.remove(id).await;
    }
    let interfaces = state
        .store
        .filter(Kind::NetworkInterface, &[("node_id", &node_id)])
        .await?;
    for iface in interfaces {
        let key = crate::persistence::interface_key(&node_id, iface.id());
        state.store.delete(Kind::NetworkInterface, &key).await?;
    }
    Ok(StatusCode::OK)
}

async fn node_interfaces(state: &AppState, node_id: &str) -> Result<Vec<NetworkInterface>> {
    let records = state
        .store
        .filter(Kind::NetworkInterface, &[("node_id", node_id)])
        .await?;
    Ok(records
        .into_iter()
        .filter_map(|record| match record {
            Record::NetworkInterface(iface) => Some(iface),
            _ => None,
        })
        .collect())
}

async fn list_interfaces(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Vec<NetworkInterface>>> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    Ok(Json(node_interfaces(&state, &node_id).await?))
}

async fn bulk_update_interfaces(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<Vec<NetworkInterface>>,
) -> Result<StatusCode> {
    read_record(&state, Kind::Node, &node_id, "node").await?;

    let mut requested = payload;
    for iface in &mut requested {
        iface.node_id = node_id.clone();
        iface.validate()?;
    }

    let known = node_interfaces(&state, &node_id).await?;
    state
        .dispatcher
        .bulk_update_interfaces(&node_id, &requested, &known)
        .await?;

    state
        .store
        .bulk_update(requested.into_iter().map(Record::NetworkInterface).collect())
        .await?;
    Ok(StatusCode::OK)
}

/// Body for policy-binding PATCH endpoints. A null id clears the
/// binding.
#[derive(Debug, Deserialize)]
struct PolicyBinding {
    traffic_policy_id: Option<String>,
}

async fn load_policy(state: &AppState, policy_id: &str) -> Result<TrafficPolicy> {
    match read_record(state, Kind::TrafficPolicy, policy_id, "traffic policy").await? {
        Record::TrafficPolicy(policy) => Ok(policy),
        _ => Err(Error::Internal("traffic policy row has wrong kind".into())),
    }
}

async fn set_interface_policy(
    State(state): State<AppState>,
    Path((node_id, interface_id)): Path<(String, String)>,
    Json(binding): Json<PolicyBinding>,
) -> Result<StatusCode> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    let known = node_interfaces(&state, &node_id).await?;
    if !known.iter().any(|iface| iface.id == interface_id) {
        return Err(Error::NotFound(format!("network interface {interface_id}")));
    }

    let policy = match &binding.traffic_policy_id {
        Some(policy_id) => Some(load_policy(&state, policy_id).await?),
        None => None,
    };

    state
        .dispatcher
        .set_interface_policy(&node_id, &interface_id, policy.as_ref())
        .await?;

    // Replace whatever binding row existed for this interface.
    let existing = state
        .store
        .filter(
            Kind::NodeInterfaceTrafficPolicy,
            &[("node_id", &node_id), ("interface_id", &interface_id)],
        )
        .await?;
    for row in existing {
        state
            .store
            .delete(Kind::NodeInterfaceTrafficPolicy, row.id())
            .await?;
    }
    if let Some(policy) = policy {
        state
            .store
            .create(Record::NodeInterfaceTrafficPolicy(NodeInterfaceTrafficPolicy {
                id: Uuid::new_v4().to_string(),
                node_id,
                interface_id,
                traffic_policy_id: policy.id,
            }))
            .await?;
    }
    Ok(StatusCode::OK)
}

async fn set_app_policy(
    State(state): State<AppState>,
    Path((node_id, app_id)): Path<(String, String)>,
    Json(binding): Json<PolicyBinding>,
) -> Result<StatusCode> {
    require_app_binding(&state, &node_id, &app_id).await?;

    let policy = match &binding.traffic_policy_id {
        Some(policy_id) => Some(load_policy(&state, policy_id).await?),
        None => None,
    };

    state
        .dispatcher
        .set_app_policy(&node_id, &app_id, policy.as_ref())
        .await?;

    let existing = state
        .store
        .filter(
            Kind::NodeAppTrafficPolicy,
            &[("node_id", &node_id), ("app_id", &app_id)],
        )
        .await?;
    for row in existing {
        state.store.delete(Kind::NodeAppTrafficPolicy, row.id()).await?;
    }
    if let Some(policy) = policy {
        state
            .store
            .create(Record::NodeAppTrafficPolicy(NodeAppTrafficPolicy {
                id: Uuid::new_v4().to_string(),
                node_id,
                app_id,
                traffic_policy_id: policy.id,
            }))
            .await?;
    }
    Ok(StatusCode::OK)
}

/// Body for binding an application to a node.
#[derive(Debug, Deserialize)]
struct AppBinding {
    app_id: String,
}

async fn bind_app(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(binding): Json<AppBinding>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    let app = match read_record(&state, Kind::App, &binding.app_id, "application").await? {
        Record::App(app) => app,
        _ => return Err(Error::Internal("app row has wrong kind".into())),
    };

    let existing = state
        .store
        .filter(
            Kind::NodeApp,
            &[("node_id", &node_id), ("app_id", &binding.app_id)],
        )
        .await?;
    if !existing.is_empty() {
        return Err(Error::Conflict(format!(
            "application {} already deployed on node {node_id}",
            binding.app_id
        )));
    }

    state.dispatcher.deploy_app(&node_id, &app).await?;

    let row = NodeApp {
        id: Uuid::new_v4().to_string(),
        node_id,
        app_id: binding.app_id,
    };
    row.validate()?;
    let id = row.id.clone();
    state.store.create(Record::NodeApp(row)).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn list_node_apps(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Vec<NodeApp>>> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    let rows = state
        .store
        .filter(Kind::NodeApp, &[("node_id", &node_id)])
        .await?;
    Ok(Json(
        rows.into_iter()
            .filter_map(|record| match record {
                Record::NodeApp(row) => Some(row),
                _ => None,
            })
            .collect(),
    ))
}

async fn require_app_binding(state: &AppState, node_id: &str, app_id: &str) -> Result<NodeApp> {
    read_record(state, Kind::Node, node_id, "node").await?;
    let rows = state
        .store
        .filter(Kind::NodeApp, &[("node_id", node_id), ("app_id", app_id)])
        .await?;
    match rows.into_iter().next() {
        Some(Record::NodeApp(row)) => Ok(row),
        _ => Err(Error::NotFound(format!(
            "application {app_id} on node {node_id}"
        ))),
    }
}

/// Pull-based status read; nothing is cached controller-side.
#[derive(Debug, Serialize)]
struct AppStatusResponse {
    id: String,
    status: LifecycleStatus,
}

async fn app_status(
    State(state): State<AppState>,
    Path((node_id, app_id)): Path<(String, String)>,
) -> Result<Json<AppStatusResponse>> {
    require_app_binding(&state, &node_id, &app_id).await?;
    let status = state.dispatcher.app_status(&node_id, &app_id).await?;
    Ok(Json(AppStatusResponse { id: app_id, status }))
}

/// Body for app lifecycle commands.
#[derive(Debug, Deserialize)]
struct AppCommand {
    cmd: String,
}

async fn app_command(
    State(state): State<AppState>,
    Path((node_id, app_id)): Path<(String, String)>,
    Json(body): Json<AppCommand>,
) -> Result<StatusCode> {
    require_app_binding(&state, &node_id, &app_id).await?;
    match body.cmd.as_str() {
        "start" => state.dispatcher.start_app(&node_id, &app_id).await?,
        "stop" => state.dispatcher.stop_app(&node_id, &app_id).await?,
        "restart" => state.dispatcher.restart_app(&node_id, &app_id).await?,
        other => {
            return Err(Error::InvalidArgument(format!(
                "cmd must be one of [start, stop, restart], got {other}"
            )))
        }
    }
    Ok(StatusCode::OK)
}

async fn unbind_app(
    State(state): State<AppState>,
    Path((node_id, app_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let row = require_app_binding(&state, &node_id, &app_id).await?;

    // Applied traffic policies hold a referential edge on the binding.
    let policies = state
        .store
        .filter(
            Kind::NodeAppTrafficPolicy,
            &[("node_id", &node_id), ("app_id", &app_id)],
        )
        .await?;
    if !policies.is_empty() {
        return Err(Error::IntegrityInUse {
            column: Kind::NodeApp.fk_column(),
            id: row.id,
            table: Kind::NodeAppTrafficPolicy.table_name(),
        });
    }

    state.dispatcher.undeploy_app(&node_id, &app_id).await?;
    state.store.delete(Kind::NodeApp, &row.id).await?;
    Ok(StatusCode::OK)
}

/// Body for binding a DNS configuration to a node.
#[derive(Debug, Deserialize)]
struct DnsBinding {
    dns_config_id: String,
}

async fn bind_dns(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(binding): Json<DnsBinding>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    let config = match read_record(&state, Kind::DnsConfig, &binding.dns_config_id, "dns config")
        .await?
    {
        Record::DnsConfig(config) => config,
        _ => return Err(Error::Internal("dns config row has wrong kind".into())),
    };

    state.dispatcher.set_dns(&node_id, &config).await?;

    let row = NodeDnsConfig {
        id: Uuid::new_v4().to_string(),
        node_id,
        dns_config_id: binding.dns_config_id,
    };
    row.validate()?;
    let id = row.id.clone();
    state.store.create(Record::NodeDnsConfig(row)).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn unbind_dns(
    State(state): State<AppState>,
    Path((node_id, dns_config_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    read_record(&state, Kind::Node, &node_id, "node").await?;
    let rows = state
        .store
        .filter(
            Kind::NodeDnsConfig,
            &[("node_id", &node_id), ("dns_config_id", &dns_config_id)],
        )
        .await?;
    let Some(row) = rows.into_iter().next() else {
        return Err(Error::NotFound(format!(
            "dns config {dns_config_id} on node {node_id}"
        )));
    };

    state.dispatcher.remove_dns(&node_id, &dns_config_id).await?;
    state.store.delete(Kind::NodeDnsConfig, row.id()).await?;
    Ok(StatusCode::OK)
}
