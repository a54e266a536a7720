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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

#[test]
fn save_rejects_bad_records_without_persisting() {
    let workspace = temp_dir("gradebook-degrees-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 8B" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Nasser", "firstName": "Omar" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "Science" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let quiz_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "componentTypes.create",
        json!({ "subjectId": subject_id, "name": "Quiz", "baseMaxScore": 10.0 }),
    )["componentTypeId"]
        .as_str()
        .expect("componentTypeId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "componentTypes.create",
        json!({ "subjectId": subject_id, "name": "Practical", "baseMaxScore": 10.0 }),
    );

    // Unknown students are reported the same way sheet.build reports them,
    // not as a foreign-key insert failure.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6b",
        "degrees.save",
        json!({
            "studentId": "no-such-student",
            "subjectId": subject_id,
            "examType": 2,
            "single": { "score": 10.0 }
        }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Component score above its scaled maximum: rejected, never clamped.
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 1,
            "components": [{ "componentTypeId": quiz_id, "score": 11.0 }]
        }),
    );
    assert_eq!(error_code(&resp), "out_of_range");

    // Empty component list is an empty-record error, not a silent save.
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 1,
            "components": []
        }),
    );
    assert_eq!(error_code(&resp), "empty_record");

    // Unknown component ids point at stale client catalogs.
    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 1,
            "components": [{ "componentTypeId": "nope", "score": 1.0 }]
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // Nothing reached the store.
    let records = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "degrees.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(records["records"].as_array().map(|a| a.len()), Some(0));

    // Single-score mode is capped by the exam type ceiling.
    let resp = request(
        &mut stdin,
        &mut reader,
        "11",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 2,
            "single": { "score": 25.0 }
        }),
    );
    assert_eq!(error_code(&resp), "out_of_range");

    let resp = request(
        &mut stdin,
        &mut reader,
        "12",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 2,
            "single": { "score": 15.0 }
        }),
    );
    assert!(resp["ok"].as_bool().unwrap_or(false), "valid single save: {}", resp);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn resave_replaces_the_whole_record() {
    let workspace = temp_dir("gradebook-degrees-resave");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 9A" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Saleh", "firstName": "Lina" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "History" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let quiz_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "componentTypes.create",
        json!({ "subjectId": subject_id, "name": "Quiz", "baseMaxScore": 20.0 }),
    )["componentTypeId"]
        .as_str()
        .expect("componentTypeId")
        .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 1,
            "components": [{ "componentTypeId": quiz_id, "score": 12.0 }]
        }),
    );
    let degree_id = first["degreeId"].as_str().expect("degreeId").to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "degrees.save",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "examType": 1,
            "single": { "score": 18.0 }
        }),
    );
    assert_eq!(second["degreeId"].as_str(), Some(degree_id.as_str()));

    let records = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "degrees.get",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    let arr = records["records"].as_array().expect("records");
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["mode"].as_str(), Some("single"));
    assert_eq!(arr[0]["score"].as_f64(), Some(18.0));
    assert_eq!(arr[0]["maxScore"].as_f64(), Some(20.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
