use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::planner::AssignmentPlanner;
use crate::session::Session;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sessionRole": state.session.as_ref().map(|s| s.role.as_str()),
        }),
    )
}

/// Opens (or creates) the workspace at `path`. Shared with start-up.
pub fn open_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<()> {
    let conn = db::open_db(&path)?;
    tracing::info!(workspace = %path.display(), "workspace opened");
    state.workspace = Some(path);
    state.db = Some(conn);
    state.planner = AssignmentPlanner::default();
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, path.clone()) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn session_login(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = Session::from_login(params).map_err(|e| HandlerErr::bad_params(e))?;
    tracing::info!(user = session.user_id, role = session.role.as_str(), "session started");
    let out = json!({ "session": session });
    state.session = Some(session);
    Ok(out)
}

fn handle_session_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, session_login(state, &req.params))
}

fn handle_session_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "session": state.session }))
}

fn handle_session_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let had = state.session.take().is_some();
    if had {
        tracing::info!("session ended");
    }
    ok(&req.id, json!({ "loggedOut": had }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.login" => Some(handle_session_login(state, req)),
        "session.get" => Some(handle_session_get(state, req)),
        "session.logout" => Some(handle_session_logout(state, req)),
        _ => None,
    }
}
