use crate::db;
use crate::filters::QueryError;
use crate::gateway::GatewayError;
use crate::grades::GradeEntryError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{ref_id, EntityId, Snapshot};
use crate::planner::PlannerError;
use crate::session::Session;
use rusqlite::Connection;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GatewayError> for HandlerErr {
    fn from(e: GatewayError) -> Self {
        HandlerErr {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<PlannerError> for HandlerErr {
    fn from(e: PlannerError) -> Self {
        match e {
            PlannerError::Gateway(g) => g.into(),
            other => HandlerErr::new(other.code(), other.to_string()),
        }
    }
}

impl From<QueryError> for HandlerErr {
    fn from(e: QueryError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<GradeEntryError> for HandlerErr {
    fn from(e: GradeEntryError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

pub fn db_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", format!("{e:#}"))
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Grade-bearing reads and all writes need a logged-in user.
pub fn require_session<'a>(state: &'a AppState, what: &str) -> Result<&'a Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", format!("log in to {}", what)))
}

pub fn load_snapshot(conn: &Connection) -> Result<Snapshot, HandlerErr> {
    db::load_snapshot(conn).map_err(db_err)
}

fn is_unset(v: &serde_json::Value) -> bool {
    v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty())
}

pub fn optional_id(params: &serde_json::Value, key: &str) -> Result<Option<EntityId>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if is_unset(v) => Ok(None),
        Some(v) => ref_id(Some(v))
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must be an id", key))),
    }
}

pub fn required_id(params: &serde_json::Value, key: &str) -> Result<EntityId, HandlerErr> {
    optional_id(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", key)))
}

pub fn id_list(params: &serde_json::Value, key: &str) -> Result<Vec<EntityId>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params(format!("params.{} must be an array", key)));
    };
    items
        .iter()
        .map(|it| {
            ref_id(Some(it))
                .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must contain ids", key)))
        })
        .collect()
}
