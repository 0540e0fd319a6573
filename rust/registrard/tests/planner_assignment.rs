use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .args(["--request-delay-ms", "0"])
        .env_remove("REGISTRARD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn one_candidate_collections() -> serde_json::Value {
    json!({
        "students": [
            { "id": 1, "student_id": "S001", "first_name": "Ada", "last_name": "Lovelace",
              "department": 10, "year": 1 },
            { "id": 2, "student_id": "S002", "first_name": "Alan", "last_name": "Turing",
              "department": 10, "year": 1 }
        ],
        "courses": [
            { "id": 5, "code": "CS101", "name": "Programming I", "credits": 3,
              "department": 10, "year": 1, "semester": 1 },
            { "id": 6, "code": "CS201", "name": "Data Structures", "credits": 4,
              "department": 10, "year": 2, "semester": 1 }
        ],
        "semesters": [
            { "id": 7, "name": "Fall", "academic_year": 3, "semester_number": 1, "is_active": true }
        ],
        "course_slips": {
            "success": true,
            "course_slips": [
                { "id": 40, "student": 2, "semester": 7, "courses": [5], "is_approved": true }
            ]
        }
    })
}

fn login_registrar(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let _ = request_ok(
        stdin,
        reader,
        "login",
        "session.login",
        json!({
            "message": "Login successful",
            "user": { "id": 900, "username": "registrar" },
            "role": { "role": "registrar", "department": null, "department_id": null }
        }),
    );
}

#[test]
fn single_candidate_gets_exactly_one_slip() {
    let workspace = temp_dir("registrard-planner-single");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select",
        json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "snapshot.import",
        json!({ "collections": one_candidate_collections() }));
    login_registrar(&mut stdin, &mut reader);

    let candidates = request_ok(&mut stdin, &mut reader, "3", "planner.candidates",
        json!({ "semesterId": 7 }));
    assert_eq!(candidates["count"].as_u64(), Some(1));
    assert_eq!(candidates["students"][0]["id"].as_i64(), Some(1));

    let selected = request_ok(&mut stdin, &mut reader, "4", "planner.select",
        json!({ "semesterId": 7 }));
    assert_eq!(selected["state"].as_str(), Some("READY"));
    let slips = selected["plan"]["slips"].as_array().expect("planned slips");
    assert_eq!(slips.len(), 1);
    assert_eq!(slips[0]["studentId"].as_i64(), Some(1));
    assert_eq!(slips[0]["courseIds"], json!([5]));
    assert_eq!(slips[0]["courseCodes"], json!(["CS101"]));

    let run = request_ok(&mut stdin, &mut reader, "5", "planner.run", json!({}));
    assert_eq!(run["state"].as_str(), Some("DONE"));
    assert_eq!(run["report"]["total"].as_u64(), Some(1));
    assert_eq!(run["report"]["successCount"].as_u64(), Some(1));
    assert_eq!(run["report"]["errorCount"].as_u64(), Some(0));
    assert_eq!(run["report"]["aborted"].as_bool(), Some(false));
    let percents: Vec<u64> = run["progress"]
        .as_array()
        .expect("progress trail")
        .iter()
        .filter_map(|p| p["percent"].as_u64())
        .collect();
    assert_eq!(percents, vec![0, 100]);

    let outbox = request_ok(&mut stdin, &mut reader, "6", "outbox.list", json!({}));
    let entries = outbox["entries"].as_array().expect("outbox entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"].as_str(), Some("courseSlip.create"));
    assert_eq!(
        entries[0]["payload"]["body"],
        json!({ "student_id": 1, "course_ids": [5], "semester_id": 7 })
    );
    assert_eq!(entries[0]["payload"]["path"].as_str(), Some("/create-student-course-slip/"));

    // The staged slip is part of the local snapshot now.
    let slips = request_ok(&mut stdin, &mut reader, "7", "courseSlips.list",
        json!({ "filters": { "semester": 7 } }));
    assert_eq!(slips["courseSlips"].as_array().map(|a| a.len()), Some(2));

    let after = request_ok(&mut stdin, &mut reader, "8", "planner.candidates",
        json!({ "semesterId": 7 }));
    assert_eq!(after["count"].as_u64(), Some(0));

    let _ = request_ok(&mut stdin, &mut reader, "9", "planner.dismiss", json!({}));
    let again = request(&mut stdin, &mut reader, "10", "planner.select", json!({ "semesterId": 7 }));
    assert_eq!(again["ok"].as_bool(), Some(false));
    assert_eq!(error_code(&again), "no_candidates");

    let runs = request_ok(&mut stdin, &mut reader, "11", "planner.runs", json!({}));
    let runs = runs["runs"].as_array().expect("run history");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["state"].as_str(), Some("DONE"));
    assert_eq!(runs[0]["successCount"].as_u64(), Some(1));
    assert_eq!(runs[0]["items"][0]["outcome"].as_str(), Some("created"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn run_without_session_aborts_after_first_item() {
    let workspace = temp_dir("registrard-planner-abort");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let mut collections = one_candidate_collections();
    collections["course_slips"] = json!([]);
    collections["students"]
        .as_array_mut()
        .expect("students")
        .push(json!({ "id": 3, "student_id": "S003", "first_name": "Grace", "last_name": "Hopper",
                      "department": 10, "year": 1 }));

    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select",
        json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "snapshot.import",
        json!({ "collections": collections }));

    let selected = request_ok(&mut stdin, &mut reader, "3", "planner.select",
        json!({ "semesterId": 7 }));
    assert_eq!(selected["plan"]["slips"].as_array().map(|a| a.len()), Some(3));

    let run = request_ok(&mut stdin, &mut reader, "4", "planner.run", json!({}));
    assert_eq!(run["state"].as_str(), Some("ABORTED"));
    assert_eq!(run["report"]["processed"].as_u64(), Some(1));
    assert_eq!(run["report"]["errorCount"].as_u64(), Some(1));
    assert_eq!(run["report"]["aborted"].as_bool(), Some(true));
    assert!(run["report"]["abortReason"]
        .as_str()
        .unwrap_or("")
        .contains("Authentication credentials"));

    let status = request_ok(&mut stdin, &mut reader, "5", "planner.status", json!({}));
    assert_eq!(status["state"].as_str(), Some("ABORTED"));

    let outbox = request_ok(&mut stdin, &mut reader, "6", "outbox.list", json!({}));
    assert_eq!(outbox["entries"].as_array().map(|a| a.len()), Some(0));

    // Selecting again requires going back to idle first.
    let blocked = request(&mut stdin, &mut reader, "7", "planner.select", json!({ "semesterId": 7 }));
    assert_eq!(error_code(&blocked), "invalid_state");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reimport_between_select_and_run_is_stale() {
    let workspace = temp_dir("registrard-planner-stale");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select",
        json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "snapshot.import",
        json!({ "collections": one_candidate_collections() }));
    login_registrar(&mut stdin, &mut reader);
    let _ = request_ok(&mut stdin, &mut reader, "3", "planner.select", json!({ "semesterId": 7 }));
    let _ = request_ok(&mut stdin, &mut reader, "4", "snapshot.import",
        json!({ "collections": one_candidate_collections() }));

    let run = request(&mut stdin, &mut reader, "5", "planner.run", json!({}));
    assert_eq!(run["ok"].as_bool(), Some(false));
    assert_eq!(error_code(&run), "stale_snapshot");

    let status = request_ok(&mut stdin, &mut reader, "6", "planner.status", json!({}));
    assert_eq!(status["state"].as_str(), Some("IDLE"));

    let not_ready = request(&mut stdin, &mut reader, "7", "planner.run", json!({}));
    assert_eq!(error_code(&not_ready), "invalid_state");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fallback_and_empty_course_choices_are_counted_as_item_errors() {
    let workspace = temp_dir("registrard-planner-fallback");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let collections = json!({
        "students": [
            { "id": 1, "student_id": "S001", "first_name": "Ada", "last_name": "Lovelace",
              "department": 10, "year": 1 },
            { "id": 2, "student_id": "S002", "first_name": "Emmy", "last_name": "Noether",
              "department": 20, "year": 1 },
            { "id": 3, "student_id": "S003", "first_name": "Kurt", "last_name": "Goedel",
              "department": 20, "year": 4 }
        ],
        "courses": [
            { "id": 5, "code": "CS101", "credits": 3, "department": 10, "year": 1, "semester": 1 }
        ],
        "semesters": [ { "id": 7, "name": "Fall", "academic_year": 3 } ],
        "course_slips": []
    });

    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select",
        json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "snapshot.import",
        json!({ "collections": collections }));
    login_registrar(&mut stdin, &mut reader);

    let courses = request_ok(&mut stdin, &mut reader, "3", "planner.courses", json!({ "studentId": 2 }));
    assert_eq!(courses["courses"][0]["code"].as_str(), Some("CS101"));

    let _ = request_ok(&mut stdin, &mut reader, "4", "planner.select", json!({ "semesterId": 7 }));
    let run = request_ok(&mut stdin, &mut reader, "5", "planner.run", json!({}));
    assert_eq!(run["state"].as_str(), Some("DONE"));
    assert_eq!(run["report"]["successCount"].as_u64(), Some(1));
    assert_eq!(run["report"]["errorCount"].as_u64(), Some(2));
    let failures = run["report"]["failures"].as_array().expect("failures");
    assert_eq!(failures[0]["index"].as_u64(), Some(1));
    assert_eq!(failures[0]["message"].as_str(), Some("Invalid courses selected"));
    assert_eq!(failures[1]["index"].as_u64(), Some(2));
    assert_eq!(failures[1]["message"].as_str(), Some("No appropriate courses found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manual_assignment_validates_before_staging() {
    let workspace = temp_dir("registrard-manual-assign");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let mut collections = one_candidate_collections();
    collections["course_slips"] = json!([]);
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select",
        json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "snapshot.import",
        json!({ "collections": collections }));
    login_registrar(&mut stdin, &mut reader);

    let missing = request(&mut stdin, &mut reader, "3", "courseSlips.assign",
        json!({ "studentId": 1, "semesterId": 7, "courseIds": [] }));
    assert_eq!(error_code(&missing), "validation_failed");

    let wrong_year = request(&mut stdin, &mut reader, "4", "courseSlips.assign",
        json!({ "studentId": 1, "semesterId": 7, "courseIds": [6] }));
    assert_eq!(error_code(&wrong_year), "validation_failed");
    assert_eq!(
        wrong_year["error"]["details"]["invalid_courses"],
        json!(["CS201 - Wrong academic year"])
    );

    let done = request_ok(&mut stdin, &mut reader, "5", "courseSlips.assign",
        json!({ "studentId": 1, "semesterId": 7, "courseIds": [5] }));
    assert_eq!(done["success"].as_bool(), Some(true));
    assert_eq!(done["message"].as_str(), Some("Course slip created for Ada Lovelace"));

    let duplicate = request(&mut stdin, &mut reader, "6", "courseSlips.assign",
        json!({ "studentId": 1, "semesterId": 7, "courseIds": [5] }));
    assert_eq!(error_code(&duplicate), "validation_failed");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
