use crate::batch::{run_batch, BatchPolicy, ItemError};
use crate::db;
use crate::gateway::GatewayError;
use crate::ipc::helpers::{db_err, id_list, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::ref_id;
use serde_json::{json, Value};
use std::time::Duration;

/// One backend call the host replayed from the outbox.
struct ReplayResult {
    id: i64,
    status: u16,
    body: Value,
}

fn parse_results(params: &Value) -> Result<Vec<ReplayResult>, HandlerErr> {
    let Some(raw) = params.get("results").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("params.results must be an array"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let id = ref_id(item.get("id"))
                .ok_or_else(|| HandlerErr::bad_params(format!("params.results[{}].id must be an id", i)))?;
            let status = item
                .get("status")
                .and_then(|v| v.as_u64())
                .and_then(|s| u16::try_from(s).ok())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("params.results[{}].status must be an HTTP status", i))
                })?;
            Ok(ReplayResult {
                id,
                status,
                body: item.get("body").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

fn outbox_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_acked = params
        .get("includeAcked")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let conn = require_db(state)?;
    Ok(json!({ "entries": db::outbox_list(conn, include_acked).map_err(db_err)? }))
}

/// `ids` are acknowledged outright. `results` carry the backend's reply to each
/// replayed entry: successes are acknowledged, rejections are recorded on the
/// entry and leave it pending. A systemic rejection of the first result (expired
/// session, CSRF) stops processing; the remaining entries are left untouched.
fn outbox_ack(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut ids = id_list(params, "ids")?;
    let results = parse_results(params)?;
    if ids.is_empty() && results.is_empty() {
        return Err(HandlerErr::bad_params("params.ids or params.results must list at least one entry"));
    }

    let policy = BatchPolicy {
        abort_on_first_item_systemic_failure: true,
        delay: Duration::ZERO,
    };
    let mut rejected: Vec<(i64, GatewayError)> = Vec::new();
    let report = run_batch(
        &results,
        &policy,
        |r| format!("outbox entry {}", r.id),
        |r| match GatewayError::classify_reply(r.status, &r.body) {
            Ok(_) => {
                ids.push(r.id);
                Ok(())
            }
            Err(e) => {
                rejected.push((r.id, e.clone()));
                Err(e)
            }
        },
        |_| {},
    );

    let conn = require_db(state)?;
    let tx = conn.unchecked_transaction().map_err(|e| db_err(e.into()))?;
    let acked = db::outbox_ack(&tx, &ids).map_err(db_err)?;
    let mut failed = Vec::with_capacity(rejected.len());
    for (id, e) in &rejected {
        let message = e.to_string();
        let recorded = db::outbox_fail(&tx, *id, e.code(), &message).map_err(db_err)?;
        failed.push(json!({
            "id": id,
            "code": e.code(),
            "message": message,
            "systemic": e.is_systemic(),
            "recorded": recorded,
        }));
    }
    tx.commit().map_err(|e| db_err(e.into()))?;

    let skipped: Vec<i64> = results.iter().skip(report.processed).map(|r| r.id).collect();
    if report.aborted {
        tracing::warn!(reason = ?report.abort_reason, skipped = skipped.len(), "outbox replay stopped");
    }
    tracing::info!(acked, failed = failed.len(), "outbox entries acknowledged");
    Ok(json!({
        "acked": acked,
        "failed": failed,
        "aborted": report.aborted,
        "abortReason": report.abort_reason,
        "skipped": skipped,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "outbox.list" => outbox_list(state, &req.params),
        "outbox.ack" => outbox_ack(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
