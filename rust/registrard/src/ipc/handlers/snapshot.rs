use crate::db;
use crate::ipc::helpers::{db_err, load_snapshot, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Collection;
use crate::registration::registrar_counters;
use serde_json::json;

/// Collection responses arrive bare or wrapped in `results` / `course_slips`.
/// Anything else (missing, null, an error body) is a failed load.
fn unwrap_collection(v: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    if let Some(items) = v.as_array() {
        return Some(items);
    }
    let obj = v.as_object()?;
    ["results", "course_slips", "data"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_array()))
}

fn snapshot_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let Some(collections) = params.get("collections").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing params.collections"));
    };
    let ignored: Vec<&str> = collections
        .keys()
        .filter(|k| Collection::from_key(k).is_none())
        .map(|k| k.as_str())
        .collect();
    let present: Vec<(Collection, &serde_json::Value)> = Collection::ALL
        .into_iter()
        .filter_map(|c| {
            collections
                .iter()
                .find(|(k, _)| Collection::from_key(k) == Some(c))
                .map(|(_, raw)| (c, raw))
        })
        .collect();
    if present.is_empty() {
        return Err(HandlerErr::bad_params(match ignored.first() {
            Some(k) => format!("unknown collection: {}", k),
            None => "params.collections is empty".to_string(),
        }));
    }
    if !ignored.is_empty() {
        tracing::warn!(?ignored, "ignoring unknown collections");
    }

    let mut imported = serde_json::Map::new();
    let mut degraded = Vec::new();
    for (collection, raw) in present {
        let (items, is_degraded) = match unwrap_collection(raw) {
            Some(items) => (items.as_slice(), false),
            None => (&[][..], true),
        };
        let summary = db::replace_collection(conn, collection, items, is_degraded).map_err(db_err)?;
        if is_degraded {
            tracing::warn!(collection = collection.key(), "collection failed to load; stored empty");
            degraded.push(collection.key());
        }
        if summary.skipped > 0 {
            tracing::warn!(
                collection = collection.key(),
                skipped = summary.skipped,
                "skipped items without a usable id"
            );
        }
        imported.insert(
            collection.key().to_string(),
            json!({
                "stored": summary.stored,
                "skipped": summary.skipped,
                "degraded": is_degraded,
            }),
        );
    }
    let generation = db::bump_generation(conn).map_err(db_err)?;
    tracing::info!(generation, collections = imported.len(), degraded = degraded.len(), "snapshot imported");

    Ok(json!({
        "generation": generation,
        "collections": imported,
        "degraded": degraded,
        "ignored": ignored,
    }))
}

fn snapshot_summary(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = load_snapshot(conn)?;
    Ok(json!({
        "generation": db::snapshot_generation(conn).map_err(db_err)?,
        "collections": db::collection_statuses(conn).map_err(db_err)?,
        "counters": registrar_counters(&snapshot),
    }))
}

fn handle_snapshot_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, snapshot_import(state, &req.params))
}

fn handle_snapshot_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, snapshot_summary(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshot.import" => Some(handle_snapshot_import(state, req)),
        "snapshot.summary" => Some(handle_snapshot_summary(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_and_failed_collections() {
        assert_eq!(unwrap_collection(&json!([1, 2])).map(|v| v.len()), Some(2));
        assert_eq!(
            unwrap_collection(&json!({ "count": 1, "results": [{ "id": 1 }] })).map(|v| v.len()),
            Some(1)
        );
        assert_eq!(
            unwrap_collection(&json!({ "success": true, "course_slips": [] })).map(|v| v.len()),
            Some(0)
        );
        assert!(unwrap_collection(&json!(null)).is_none());
        assert!(unwrap_collection(&json!({ "detail": "Not found." })).is_none());
    }
}
