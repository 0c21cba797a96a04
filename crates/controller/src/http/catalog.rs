//! CRUD for the controller-owned catalog entities: applications,
//! traffic policies, DNS configurations and network zones. These
//! survive node lifecycles and are bound to nodes via join rows.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use common::entities::{
    Application, DnsConfig, Entity, Kind, NetworkZone, Record, TrafficPolicy, ZoneInterface,
};

use crate::app_state::AppState;
use crate::error::{Error, Result};

use super::{create_record, delete_record, read_record, IdResponse};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/apps", post(create_app).get(list_apps))
        .route(
            "/apps/{app_id}",
            get(get_app).patch(update_app).delete(delete_app),
        )
        .route(
            "/traffic_policies",
            post(create_policy).get(list_policies),
        )
        .route(
            "/traffic_policies/{policy_id}",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
        .route("/dns_configs", post(create_dns).get(list_dns))
        .route(
            "/dns_configs/{dns_config_id}",
            get(get_dns).patch(update_dns).delete(delete_dns),
        )
        .route("/zones", post(create_zone).get(list_zones))
        .route(
            "/zones/{zone_id}",
            get(get_zone).patch(update_zone).delete(delete_zone),
        )
        .route("/zones/{zone_id}/interfaces", post(bind_zone_interface))
        .route(
            "/zones/{zone_id}/interfaces/{binding_id}",
            delete(unbind_zone_interface),
        )
}

async fn list_of<T>(state: &AppState, kind: Kind, unwrap: fn(Record) -> Option<T>) -> Result<Json<Vec<T>>>
where
    T: Serialize,
{
    let records = state.store.read_all(kind).await?;
    Ok(Json(records.into_iter().filter_map(unwrap).collect()))
}

async fn update_of<T>(
    state: &AppState,
    kind: Kind,
    id: String,
    mut payload: T,
    what: &str,
    wrap: fn(T) -> Record,
) -> Result<StatusCode>
where
    T: Entity + DeserializeOwned,
{
    read_record(state, kind, &id, what).await?;
    payload.set_id(id);
    payload.validate()?;
    state.store.bulk_update(vec![wrap(payload)]).await?;
    Ok(StatusCode::OK)
}

macro_rules! unwrap_record {
    ($variant:ident) => {
        |record| match record {
            Record::$variant(inner) => Some(inner),
            _ => None,
        }
    };
}

// Applications.

async fn create_app(
    State(state): State<AppState>,
    Json(payload): Json<Application>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    create_record(&state, payload, Record::App).await
}

async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<Application>>> {
    list_of(&state, Kind::App, unwrap_record!(App)).await
}

async fn get_app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<Application>> {
    match read_record(&state, Kind::App, &app_id, "application").await? {
        Record::App(app) => Ok(Json(app)),
        _ => Err(Error::Internal("app row has wrong kind".into())),
    }
}

async fn update_app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Json(payload): Json<Application>,
) -> Result<StatusCode> {
    update_of(&state, Kind::App, app_id, payload, "application", Record::App).await
}

async fn delete_app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<StatusCode> {
    delete_record(&state, Kind::App, &app_id, "application").await?;
    Ok(StatusCode::OK)
}

// Traffic policies.

async fn create_policy(
    State(state): State<AppState>,
    Json(payload): Json<TrafficPolicy>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    create_record(&state, payload, Record::TrafficPolicy).await
}

async fn list_policies(State(state): State<AppState>) -> Result<Json<Vec<TrafficPolicy>>> {
    list_of(&state, Kind::TrafficPolicy, unwrap_record!(TrafficPolicy)).await
}

async fn get_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
) -> Result<Json<TrafficPolicy>> {
    match read_record(&state, Kind::TrafficPolicy, &policy_id, "traffic policy").await? {
        Record::TrafficPolicy(policy) => Ok(Json(policy)),
        _ => Err(Error::Internal("traffic policy row has wrong kind".into())),
    }
}

async fn update_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Json(payload): Json<TrafficPolicy>,
) -> Result<StatusCode> {
    update_of(
        &state,
        Kind::TrafficPolicy,
        policy_id,
        payload,
        "traffic policy",
        Record::TrafficPolicy,
    )
    .await
}

async fn delete_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
) -> Result<StatusCode> {
    delete_record(&state, Kind::TrafficPolicy, &policy_id, "traffic policy").await?;
    Ok(StatusCode::OK)
}

// DNS configurations.

async fn create_dns(
    State(state): State<AppState>,
    Json(payload): Json<DnsConfig>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    create_record(&state, payload, Record::DnsConfig).await
}

async fn list_dns(State(state): State<AppState>) -> Result<Json<Vec<DnsConfig>>> {
    list_of(&state, Kind::DnsConfig, unwrap_record!(DnsConfig)).await
}

async fn get_dns(
    State(state): State<AppState>,
    Path(dns_config_id): Path<String>,
) -> Result<Json<DnsConfig>> {
    match read_record(&state, Kind::DnsConfig, &dns_config_id, "dns config").await? {
        Record::DnsConfig(config) => Ok(Json(config)),
        _ => Err(Error::Internal("dns config row has wrong kind".into())),
    }
}

async fn update_dns(
    State(state): State<AppState>,
    Path(dns_config_id): Path<String>,
    Json(payload): Json<DnsConfig>,
) -> Result<StatusCode> {
    update_of(
        &state,
        Kind::DnsConfig,
        dns_config_id,
        payload,
        "dns config",
        Record::DnsConfig,
    )
    .await
}

async fn delete_dns(
    State(state): State<AppState>,
    Path(dns_config_id): Path<String>,
) -> Result<StatusCode> {
    delete_record(&state, Kind::DnsConfig, &dns_config_id, "dns config").await?;
    Ok(StatusCode::OK)
}

// Network zones.

async fn create_zone(
    State(state): State<AppState>,
    Json(payload): Json<NetworkZone>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    create_record(&state, payload, Record::NetworkZone).await
}

async fn list_zones(State(state): State<AppState>) -> Result<Json<Vec<NetworkZone>>> {
    list_of(&state, Kind::NetworkZone, unwrap_record!(NetworkZone)).await
}

async fn get_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
) -> Result<Json<NetworkZone>> {
    match read_record(&state, Kind::NetworkZone, &zone_id, "network zone").await? {
        Record::NetworkZone(zone) => Ok(Json(zone)),
        _ => Err(Error::Internal("network zone row has wrong kind".into())),
    }
}

async fn update_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Json(payload): Json<NetworkZone>,
) -> Result<StatusCode> {
    update_of(
        &state,
        Kind::NetworkZone,
        zone_id,
        payload,
        "network zone",
        Record::NetworkZone,
    )
    .await
}

async fn delete_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
) -> Result<StatusCode> {
    delete_record(&state, Kind::NetworkZone, &zone_id, "network zone").await?;
    Ok(StatusCode::OK)
}

/// Body for placing a node interface into a zone.
#[derive(Debug, serde::Deserialize)]
struct ZoneInterfaceBinding {
    node_id: String,
    interface_id: String,
}

async fn bind_zone_interface(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Json(binding): Json<ZoneInterfaceBinding>,
) -> Result<(StatusCode, Json<IdResponse>)> {
    read_record(&state, Kind::NetworkZone, &zone_id, "network zone").await?;
    read_record(&state, Kind::Node, &binding.node_id, "node").await?;
    let key = crate::persistence::interface_key(&binding.node_id, &binding.interface_id);
    read_record(&state, Kind::NetworkInterface, &key, "network interface").await?;

    let row = ZoneInterface {
        id: Uuid::new_v4().to_string(),
        node_id: binding.node_id,
        zone_id,
        interface_id: binding.interface_id,
    };
    row.validate()?;
    let id = row.id.clone();
    state.store.create(Record::ZoneInterface(row)).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn unbind_zone_interface(
    State(state): State<AppState>,
    Path((zone_id, binding_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let row = read_record(&state, Kind::ZoneInterface, &binding_id, "zone binding").await?;
    if row.field("zone_id").as_deref() != Some(zone_id.as_str()) {
        return Err(Error::NotFound("zone binding".into()));
    }
    delete_record(&state, Kind::ZoneInterface, &binding_id, "zone binding").await?;
    Ok(StatusCode::OK)
}
