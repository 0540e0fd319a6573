use crate::batch::BatchPolicy;
use crate::db;
use crate::ipc::helpers::{db_err, load_snapshot, optional_id, require_db, required_id, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::planner::{appropriate_courses_for_student, filter_by_department, students_without_course_slips};
use crate::staging::StagingGateway;
use serde_json::json;

const DEFAULT_RUNS_LIMIT: usize = 20;

fn planner_candidates(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = optional_id(params, "semesterId")?;
    let department_id = optional_id(params, "departmentId")?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let students = filter_by_department(
        students_without_course_slips(&snapshot, semester_id),
        department_id,
    );
    Ok(json!({ "count": students.len(), "students": students }))
}

fn planner_courses(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let student = snapshot
        .student(student_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("student not found: {}", student_id)))?;
    Ok(json!({ "courses": appropriate_courses_for_student(student, &snapshot.courses) }))
}

fn planner_select(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = optional_id(params, "semesterId")?;
    let department_id = optional_id(params, "departmentId")?;
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let snapshot = load_snapshot(conn)?;
    let generation = db::snapshot_generation(conn).map_err(db_err)?;
    let plan = state
        .planner
        .select(&snapshot, generation, semester_id, department_id)?;
    Ok(json!({ "state": "READY", "plan": plan }))
}

fn planner_run(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let AppState {
        config,
        db: conn,
        session,
        planner,
        ..
    } = state;
    let conn = conn
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let snapshot = load_snapshot(conn)?;
    let generation = db::snapshot_generation(conn).map_err(db_err)?;
    let policy = BatchPolicy {
        abort_on_first_item_systemic_failure: config.abort_on_first_auth_failure,
        delay: config.request_delay(),
    };
    let mut gateway = StagingGateway::new(conn, session.as_ref());
    let outcome = planner.run(&snapshot, generation, &mut gateway, &policy)?;
    db::save_planner_run(conn, &outcome.to_record()).map_err(db_err)?;
    Ok(json!(outcome))
}

fn planner_status(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!(state.planner.status()))
}

fn planner_dismiss(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    state.planner.dismiss()?;
    Ok(json!({ "state": state.planner.phase() }))
}

fn planner_runs(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = match params.get("limit") {
        None => DEFAULT_RUNS_LIMIT,
        Some(v) if v.is_null() => DEFAULT_RUNS_LIMIT,
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .ok_or_else(|| HandlerErr::bad_params("params.limit must be a positive integer"))?,
    };
    let conn = require_db(state)?;
    Ok(json!({ "runs": db::list_planner_runs(conn, limit).map_err(db_err)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "planner.candidates" => planner_candidates(state, &req.params),
        "planner.courses" => planner_courses(state, &req.params),
        "planner.select" => planner_select(state, &req.params),
        "planner.run" => planner_run(state, &req.params),
        "planner.status" => planner_status(state, &req.params),
        "planner.dismiss" => planner_dismiss(state, &req.params),
        "planner.runs" => planner_runs(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
