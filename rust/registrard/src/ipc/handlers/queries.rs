use crate::filters::{
    run_query, CourseQuery, CourseSlipQuery, GradeQuery, RegistrationQuery, StudentQuery,
};
use crate::ipc::helpers::{load_snapshot, require_db, require_session, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::registration::{distinct_departments, registration_status};
use serde_json::json;

fn students_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = StudentQuery::parse(params.get("filters"))?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let rows: Vec<serde_json::Value> = run_query(&query, &snapshot, &snapshot.students)
        .into_iter()
        .map(|s| {
            let mut row = json!(s);
            row["registrationStatus"] = json!(registration_status(s, &snapshot.registrations));
            row
        })
        .collect();
    Ok(json!({ "students": rows }))
}

fn courses_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = CourseQuery::parse(params.get("filters"))?;
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({ "courses": run_query(&query, &snapshot, &snapshot.courses) }))
}

fn grades_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = GradeQuery::parse(params.get("filters"))?;
    let session = require_session(state, "view grades")?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let visible = session.visible_grades(&snapshot);
    Ok(json!({ "grades": run_query(&query, &snapshot, &visible) }))
}

fn registrations_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = RegistrationQuery::parse(params.get("filters"))?;
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({ "registrations": run_query(&query, &snapshot, &snapshot.registrations) }))
}

fn course_slips_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = CourseSlipQuery::parse(params.get("filters"))?;
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({ "courseSlips": run_query(&query, &snapshot, &snapshot.course_slips) }))
}

fn departments_list(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({ "departments": distinct_departments(&snapshot) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "courses.list" => courses_list(state, &req.params),
        "grades.list" => grades_list(state, &req.params),
        "registrations.list" => registrations_list(state, &req.params),
        "courseSlips.list" => course_slips_list(state, &req.params),
        "departments.list" => departments_list(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
