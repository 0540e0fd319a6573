use crate::calc::{compute_academic_records, compute_department_statistics, compute_gpa, student_overview};
use crate::filters::{run_query, AcademicRecordQuery};
use crate::ipc::helpers::{load_snapshot, optional_id, require_db, require_session, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{EntityId, Grade, Snapshot, Student};
use crate::session::{Role, Session};
use serde_json::json;

/// Cohort-wide views are closed to student accounts.
fn require_staff(state: &AppState) -> Result<&Session, HandlerErr> {
    let session = require_session(state, "view academic records")?;
    if session.role == Role::Student {
        return Err(HandlerErr::new("forbidden", "students can only view their own record"));
    }
    Ok(session)
}

fn records_academic(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = AcademicRecordQuery::parse(params.get("filters"))?;
    require_staff(state)?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let records = compute_academic_records(&snapshot.students, &snapshot.grades, &snapshot.courses);
    let filtered = run_query(&query, &snapshot, &records);
    Ok(json!({ "records": filtered }))
}

fn records_department_stats(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_staff(state)?;
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({
        "statistics": compute_department_statistics(&snapshot.students, &snapshot.grades, &snapshot.courses)
    }))
}

/// The student a request is about: `studentId`, else the session's own record.
fn target_student<'s>(
    session: &Session,
    snapshot: &'s Snapshot,
    params: &serde_json::Value,
) -> Result<&'s Student, HandlerErr> {
    let id: EntityId = match optional_id(params, "studentId")? {
        Some(id) => id,
        None => session
            .own_student(&snapshot.students)
            .map(|s| s.id)
            .ok_or_else(|| HandlerErr::bad_params("missing params.studentId"))?,
    };
    let student = snapshot
        .student(id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("student not found: {}", id)))?;
    if session.role == Role::Student && student.user != Some(session.user_id) {
        return Err(HandlerErr::new("forbidden", "students can only view their own record"));
    }
    Ok(student)
}

fn records_gpa(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = require_session(state, "view grade point averages")?;
    if let Some(raw) = params.get("grades") {
        let Some(items) = raw.as_array() else {
            return Err(HandlerErr::bad_params("params.grades must be an array"));
        };
        let grades: Vec<Grade> = items.iter().filter_map(Grade::from_json).collect();
        return Ok(json!({ "gpa": compute_gpa(&grades) }));
    }
    let snapshot = load_snapshot(require_db(state)?)?;
    let student = target_student(session, &snapshot, params)?;
    let overview = student_overview(student, &snapshot.grades, &snapshot.courses);
    Ok(json!({ "studentId": student.id, "gpa": overview.gpa }))
}

fn records_student_overview(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = require_session(state, "view student records")?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let student = target_student(session, &snapshot, params)?;
    let overview = student_overview(student, &snapshot.grades, &snapshot.courses);
    serde_json::to_value(overview).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_records_academic(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, records_academic(state, &req.params))
}

fn handle_records_department_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, records_department_stats(state, &req.params))
}

fn handle_records_gpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, records_gpa(state, &req.params))
}

fn handle_records_student_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(req, records_student_overview(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.academic" => Some(handle_records_academic(state, req)),
        "records.departmentStats" => Some(handle_records_department_stats(state, req)),
        "records.gpa" => Some(handle_records_gpa(state, req)),
        "records.studentOverview" => Some(handle_records_student_overview(state, req)),
        _ => None,
    }
}
