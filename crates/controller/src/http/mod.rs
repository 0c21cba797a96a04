//! REST surface over the entity model and dispatcher.
//!
//! Handlers stay thin: validate, touch the persistence port, invoke the
//! dispatcher, map errors through [`crate::error::Error`]. Status
//! mapping: 201 on create (body `{id}`), 200 on read/update/delete, 400
//! with the plain-text validator message, 404 unknown id, 409 duplicate
//! serial, 422 referential integrity, 500 dispatcher precondition
//! failures.

use axum::http::StatusCode;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use common::entities::{Entity, Kind, Record};
use common::ValidationError;

use crate::app_state::AppState;
use crate::error::{Error, Result};

mod catalog;
mod nodes;

/// Body returned by create endpoints.
#[derive(Debug, Serialize)]
pub struct IdResponse {
    /// Id assigned to the created record.
    pub id: String,
}

/// Assemble the full REST router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(nodes::router())
        .merge(catalog::router())
        .with_state(state)
}

/// Reject create payloads that carry a client-chosen id.
fn require_no_id<T: Entity>(payload: &T) -> Result<()> {
    if payload.id().is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(ValidationError::new(
            "id cannot be specified in POST request",
        )))
    }
}

/// Assign a fresh id, validate, persist; the create flow shared by all
/// top-level entities.
async fn create_record<T, F>(state: &AppState, mut payload: T, wrap: F) -> Result<(StatusCode, Json<IdResponse>)>
where
    T: Entity,
    F: FnOnce(T) -> Record,
{
    require_no_id(&payload)?;
    let id = Uuid::new_v4().to_string();
    payload.set_id(id.clone());
    payload.validate()?;
    state.store.create(wrap(payload)).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn read_record(state: &AppState, kind: Kind, id: &str, what: &str) -> Result<Record> {
    state
        .store
        .read(kind, id)
        .await?
        .ok_or_else(|| Error::NotFound(what.to_string()))
}

async fn delete_record(state: &AppState, kind: Kind, id: &str, what: &str) -> Result<()> {
    if !state.store.delete(kind, id).await? {
        return Err(Error::NotFound(what.to_string()));
    }
    Ok(())
}

