use crate::ipc::helpers::{id_list, load_snapshot, optional_id, require_db, required_id, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::number;
use crate::planner::assign_courses_to_student;
use crate::registration::{registration_status, registration_window, students_without_registration};
use crate::staging::StagingGateway;
use chrono::NaiveDate;
use serde_json::json;

fn registrations_status(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    let snapshot = load_snapshot(require_db(state)?)?;
    let student = snapshot
        .student(student_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("student not found: {}", student_id)))?;
    Ok(json!({
        "studentId": student.id,
        "status": registration_status(student, &snapshot.registrations),
    }))
}

fn registrations_window(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let snapshot = load_snapshot(require_db(state)?)?;
    let year = match optional_id(params, "academicYearId")? {
        Some(id) => snapshot
            .academic_year(id)
            .ok_or_else(|| HandlerErr::new("not_found", format!("academic year not found: {}", id)))?,
        None => snapshot
            .academic_years
            .iter()
            .find(|y| y.is_active)
            .ok_or_else(|| HandlerErr::new("not_found", "no active academic year"))?,
    };
    let today = match params.get("today").and_then(|v| v.as_str()) {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("params.today must be YYYY-MM-DD"))?,
        None => chrono::Utc::now().date_naive(),
    };
    let penalty = number(params.get("penaltyAmount"));
    Ok(json!(registration_window(year, today, penalty)))
}

fn registrations_unregistered(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let snapshot = load_snapshot(require_db(state)?)?;
    Ok(json!({ "students": students_without_registration(&snapshot) }))
}

fn registrations_approve(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_id(params, "registrationId")?;
    let conn = require_db(state)?;
    let reply = StagingGateway::new(conn, state.session.as_ref()).approve_registration(id)?;
    Ok(json!(reply))
}

fn course_slips_approve(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_id(params, "courseSlipId")?;
    let conn = require_db(state)?;
    let reply = StagingGateway::new(conn, state.session.as_ref()).approve_course_slip(id)?;
    Ok(json!(reply))
}

fn course_slips_assign(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = optional_id(params, "studentId")?;
    let semester_id = optional_id(params, "semesterId")?;
    let course_ids = id_list(params, "courseIds")?;
    let conn = require_db(state)?;
    let mut gateway = StagingGateway::new(conn, state.session.as_ref());
    let reply = assign_courses_to_student(&mut gateway, student_id, semester_id, &course_ids)?;
    Ok(json!(reply))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "registrations.status" => registrations_status(state, &req.params),
        "registrations.window" => registrations_window(state, &req.params),
        "registrations.unregistered" => registrations_unregistered(state, &req.params),
        "registrations.approve" => registrations_approve(state, &req.params),
        "courseSlips.approve" => course_slips_approve(state, &req.params),
        "courseSlips.assign" => course_slips_assign(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
