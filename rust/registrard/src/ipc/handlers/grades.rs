use crate::gateway::GradeGateway;
use crate::grades::{active_semester, plan_grade_saves, plan_publish, publish_grades, save_grades, GradeEntryError};
use crate::ipc::helpers::{load_snapshot, optional_id, require_db, required_id, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{ref_id, EntityId, Snapshot};
use crate::staging::StagingGateway;
use serde_json::json;

/// `{"<studentId>": "B+"}` or `[{"studentId": 1, "grade": "B+"}]`.
fn parse_entries(raw: Option<&serde_json::Value>) -> Result<Vec<(EntityId, String)>, HandlerErr> {
    let bad = || HandlerErr::bad_params("params.entries must map student ids to letter grades");
    match raw {
        None => Err(HandlerErr::bad_params("missing params.entries")),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let id = k.trim().parse::<EntityId>().map_err(|_| bad())?;
                let letter = match v {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s.clone(),
                    _ => return Err(bad()),
                };
                Ok((id, letter))
            })
            .collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|it| {
                let id = ref_id(it.get("studentId")).ok_or_else(bad)?;
                let letter = it
                    .get("grade")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                Ok((id, letter))
            })
            .collect(),
        Some(_) => Err(bad()),
    }
}

fn semester_for(snapshot: &Snapshot, params: &serde_json::Value) -> Result<EntityId, HandlerErr> {
    match optional_id(params, "semesterId")? {
        Some(id) => Ok(id),
        None => active_semester(snapshot)
            .map(|s| s.id)
            .ok_or_else(|| GradeEntryError::NoActiveSemester.into()),
    }
}

fn grades_save(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_id(params, "courseId")?;
    let entries = parse_entries(params.get("entries"))?;
    let conn = require_db(state)?;
    let snapshot = load_snapshot(conn)?;
    let semester_id = semester_for(&snapshot, params)?;
    let planned = plan_grade_saves(&snapshot, course_id, semester_id, &entries)?;
    let mut gateway = StagingGateway::new(conn, state.session.as_ref());
    let report = save_grades(&mut gateway, &planned);
    Ok(json!({ "semesterId": semester_id, "planned": planned, "report": report }))
}

fn grades_publish(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_id(params, "courseId")?;
    let conn = require_db(state)?;
    let snapshot = load_snapshot(conn)?;
    let semester_id = semester_for(&snapshot, params)?;
    let planned = plan_publish(&snapshot, course_id, semester_id)?;
    let mut gateway = StagingGateway::new(conn, state.session.as_ref());
    let report = publish_grades(&mut gateway, &planned);
    Ok(json!({ "semesterId": semester_id, "report": report }))
}

fn grades_set_published(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = required_id(params, "gradeId")?;
    let Some(published) = params.get("published").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing params.published"));
    };
    let conn = require_db(state)?;
    let reply = StagingGateway::new(conn, state.session.as_ref()).set_grade_published(grade_id, published)?;
    Ok(json!(reply))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.save" => grades_save(state, &req.params),
        "grades.publish" => grades_publish(state, &req.params),
        "grades.setPublished" => grades_set_published(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
