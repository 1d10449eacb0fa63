use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const SECTION: &str = "5b0e3c8a-6f1d-4f3a-9a57-2f1e8c4d7b10";
const SUBJECT: &str = "a3d9f2e1-7c4b-4e8a-b1f6-0c2d3e4f5a61";
const STUDENT: &str = "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a";

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

fn spawn_sidecar(cwd: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .current_dir(cwd)
        .env_remove("GRADEBOOKD_CONFIG")
        .env_remove("GRADEBOOKD_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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

fn error_of(value: &serde_json::Value) -> (String, u64) {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    let e = value.get("error").expect("error object");
    (
        e.get("code").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        e.get("status").and_then(|v| v.as_u64()).unwrap_or(0),
    )
}

const SECOND_SUBJECT: &str = "d2c1b0a9-8e7f-4a6b-8c5d-3e2f1a0b9c8d";

fn records_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> Vec<serde_json::Value> {
    let res = request_ok(stdin, reader, id, "grades.listForStudent", params);
    res.get("records")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("records")
}

#[test]
fn grade_records_follow_subject_assignment() {
    let workspace = temp_dir("gradebook-assignment");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Assigned before any formula exists: empty records for every formula term.
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.assignSubjects",
        json!({
            "studentId": STUDENT,
            "sectionId": SECTION,
            "yearLevel": "11",
            "subjectIds": [SUBJECT, SECOND_SUBJECT],
        }),
    );
    assert_eq!(assigned.get("created").and_then(|v| v.as_u64()), Some(6));
    let records = records_for(
        &mut stdin,
        &mut reader,
        "3",
        json!({ "studentId": STUDENT, "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    let mut terms: Vec<&str> = records
        .iter()
        .filter_map(|r| r.get("term").and_then(|v| v.as_str()))
        .collect();
    terms.sort();
    assert_eq!(terms, vec!["Finalterm", "Midterm", "Prelim"]);
    assert!(records
        .iter()
        .all(|r| r.get("components").and_then(|v| v.as_array()).map(|a| a.is_empty()) == Some(true)));

    // Re-assigning is a no-op for existing records.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.assignSubjects",
        json!({
            "studentId": STUDENT,
            "sectionId": SECTION,
            "yearLevel": "11",
            "subjectIds": [SUBJECT],
        }),
    );
    assert_eq!(again.get("created").and_then(|v| v.as_u64()), Some(0));

    // Creating the formulas seeds the existing records.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "formulas.createForAssignment",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT, "yearLevel": "11" }),
    );
    let records = records_for(
        &mut stdin,
        &mut reader,
        "6",
        json!({ "studentId": STUDENT, "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert!(records
        .iter()
        .all(|r| r.get("components").and_then(|v| v.as_array()).map(|a| a.len()) == Some(3)));

    let formulas = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "formulas.list",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert_eq!(
        formulas.get("formulas").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(3)
    );

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.unassignSubjects",
        json!({ "studentId": STUDENT, "sectionId": SECTION, "subjectIds": [SUBJECT] }),
    );
    assert_eq!(removed.get("deleted").and_then(|v| v.as_u64()), Some(3));
    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "grades.listForStudent",
        json!({ "studentId": STUDENT, "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert_eq!(error_of(&missing), ("not_found".to_string(), 404));
    assert_eq!(
        records_for(&mut stdin, &mut reader, "10", json!({ "studentId": STUDENT })).len(),
        3
    );

    let wiped = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.deleteForStudent",
        json!({ "studentId": STUDENT }),
    );
    assert_eq!(wiped.get("deleted").and_then(|v| v.as_u64()), Some(3));
    assert!(records_for(&mut stdin, &mut reader, "12", json!({ "studentId": STUDENT })).is_empty());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn formula_lifecycle_for_assignment() {
    let workspace = temp_dir("gradebook-assignment-formulas");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request(
        &mut stdin,
        &mut reader,
        "2",
        "formulas.list",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert_eq!(error_of(&empty), ("not_found".to_string(), 404));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "formulas.create",
        json!({
            "sectionId": SECTION,
            "subjectId": SUBJECT,
            "term": "Midterm",
            "yearLevel": "11",
            "components": [{ "componentName": "exams", "weight": 100, "items": [] }],
        }),
    );
    // Only the two missing terms get the default template.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "formulas.createForAssignment",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT, "yearLevel": "11" }),
    );
    assert_eq!(created.get("created").and_then(|v| v.as_u64()), Some(2));
    let midterm = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "formulas.get",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT, "term": "Midterm" }),
    );
    assert_eq!(
        midterm
            .get("formula")
            .and_then(|f| f.get("components"))
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "formulas.delete",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_u64()), Some(3));
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "formulas.delete",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT }),
    );
    assert_eq!(error_of(&gone), ("not_found".to_string(), 404));
    let get_gone = request(
        &mut stdin,
        &mut reader,
        "8",
        "formulas.get",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT, "term": "Midterm" }),
    );
    assert_eq!(error_of(&get_gone), ("not_found".to_string(), 404));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn score_updates_report_missing_targets() {
    let workspace = temp_dir("gradebook-assignment-scores");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "formulas.createForAssignment",
        json!({ "sectionId": SECTION, "subjectId": SUBJECT, "yearLevel": "11" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.assignSubjects",
        json!({
            "studentId": STUDENT,
            "sectionId": SECTION,
            "yearLevel": "11",
            "subjectIds": [SUBJECT],
        }),
    );

    let base = json!({
        "studentId": STUDENT,
        "subjectId": SUBJECT,
        "sectionId": SECTION,
        "term": "Prelim",
        "componentName": "exams",
        "itemName": "exam",
        "score": 45,
    });
    let updated = request_ok(&mut stdin, &mut reader, "4", "grades.updateScore", base.clone());
    assert_eq!(
        updated
            .get("record")
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty()),
        Some(true)
    );

    let cases = [
        ("5", json!({ "componentName": "projects" }), "not_found", 404),
        ("6", json!({ "itemName": "exam_2" }), "not_found", 404),
        ("7", json!({ "studentId": "e5d4c3b2-a190-4f8e-8d7c-6b5a49382716" }), "not_found", 404),
        ("8", json!({ "score": -1 }), "bad_params", 400),
        ("9", json!({ "score": "ten" }), "bad_params", 400),
    ];
    for (id, patch, code, status) in cases {
        let mut params = base.clone();
        for (k, v) in patch.as_object().expect("patch object") {
            params[k] = v.clone();
        }
        let res = request(&mut stdin, &mut reader, id, "grades.updateScore", params);
        assert_eq!(error_of(&res), (code.to_string(), status), "case {}", id);
    }

    drop(stdin);
    let _ = child.wait();
}
