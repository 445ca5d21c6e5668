// End-to-end caller/callee round trips against the reference callee binary.
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use procbridge::api::{Caller, ResponseLine};
use serde_json::{Value, json};

fn callee() -> &'static str {
    env!("CARGO_BIN_EXE_procbridge-callee")
}

#[cfg(unix)]
fn write_script(path: &std::path::Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).expect("write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}

fn python_available() -> bool {
    Command::new("python")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[test]
fn unique_call_returns_scalar() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "double", "n": 2}));
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert_eq!(result.data, json!(4));
    assert!(result.is_unique);
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(result.data_as::<i64>().expect("int"), 4);
}

#[test]
fn many_call_collects_outputs_in_order() {
    let result = Caller::new().with_unique(false).call(
        "exe",
        callee(),
        &json!({"op": "count", "values": [1, null, 3]}),
    );
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert!(!result.is_unique);
    assert_eq!(result.data, json!([1, null, 3]));
}

#[test]
fn excess_outputs_under_unique_fail() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "twice"}));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.data, Value::Null);
    assert!(
        result
            .errors
            .iter()
            .any(|e| e == "Error: outputs out of bound (isUnique: true).")
    );
    assert_eq!(
        result.errors.last().map(String::as_str),
        Some("Error: Expected 1 output (isUnique=True) but received 2.")
    );
}

#[test]
fn silent_callee_with_optional_output_is_unset() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "silent"}));
    assert_eq!(result.request_status, None);
    assert_eq!(result.data, Value::Null);
    assert!(result.errors.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("didn't give any output"));
}

#[test]
fn silent_callee_with_required_output_fails() {
    let result = Caller::new()
        .with_optional_output(false)
        .call("exe", callee(), &json!({"op": "silent"}));
    assert_eq!(result.request_status, Some(false));
    assert!(!result.optional_output);
    assert!(result.errors[0].contains("didn't give any output"));
}

#[test]
fn stray_stdout_is_not_mistaken_for_protocol() {
    let result = Caller::new().call(
        "exe",
        callee(),
        &json!({"op": "noise", "value": {"answer": 42}}),
    );
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert_eq!(result.data, json!({"answer": 42}));
}

#[test]
fn unknown_payload_is_echoed() {
    let result = Caller::new().call("exe", callee(), &json!(["a", "b"]));
    assert_eq!(result.request_status, Some(true));
    assert_eq!(result.data, json!(["a", "b"]));
}

#[test]
fn nonzero_exit_fails_despite_valid_lines() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "fail", "code": 3}));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.data, Value::Null);
    assert_eq!(result.errors[0], "Process exited with code 3");
    assert!(result.errors.iter().any(|e| e == "stderr: simulated failure"));
    assert!(result.warnings[0].contains("error in the targeted script"));
}

#[test]
fn slow_callee_is_killed_at_deadline() {
    let result = Caller::new()
        .with_timeout(Duration::from_millis(200))
        .call("exe", callee(), &json!({"op": "sleep", "ms": 10_000}));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.errors, vec!["Error: Process timed out after 200 ms".to_string()]);
}

#[test]
fn fast_callee_finishes_within_deadline() {
    let result = Caller::new()
        .with_timeout(Duration::from_secs(30))
        .call("exe", callee(), &json!({"op": "sleep", "ms": 1}));
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert_eq!(result.data, json!("awake"));
}

#[test]
fn malformed_request_yields_one_keyless_fault_line() {
    let mut child = Command::new(callee())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn callee");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"{this is not json\n")
        .expect("write");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).expect("utf8");
    let lines: Vec<ResponseLine> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("protocol line"))
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].key, None);
    assert!(!lines[0].request_status);
    assert!(lines[0].errors[0].starts_with("Error: request could not be decoded"));
}

#[test]
fn missing_target_reports_resolver_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("absent.py");
    let missing = missing.to_str().unwrap();
    let result = Caller::new().call("python", missing, &json!(null));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.errors, vec![format!("Error: File not found: {missing}")]);
}

#[test]
fn python_target_runs_through_interpreter() {
    if !python_available() {
        eprintln!("skipping: python is not installed");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("double.py");
    std::fs::write(
        &script,
        concat!(
            "import json, sys\n",
            "request = json.loads(sys.stdin.read())\n",
            "print('debug chatter')\n",
            "print(json.dumps({\"key\": request[\"key\"], \"request_status\": True,\n",
            "    \"data\": request[\"data\"][\"n\"] * 2, \"optionalOutput\": request[\"optionalOutput\"],\n",
            "    \"isUnique\": request[\"isUnique\"], \"errors\": [], \"warnings\": []}))\n",
        ),
    )
    .expect("write script");

    let result = Caller::new().call("python", script.to_str().unwrap(), &json!({"n": 2}));
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert_eq!(result.data, json!(4));
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
}

#[cfg(unix)]
#[test]
fn deadline_bounds_calls_whose_grandchildren_hold_the_pipes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("wrapper");
    write_script(&script, "#!/bin/sh\ncat >/dev/null\nsleep 5\n");

    let started = Instant::now();
    let result = Caller::new()
        .with_timeout(Duration::from_millis(200))
        .call("exe", script.to_str().unwrap(), &json!(null));
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "call took {elapsed:?}");
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.errors, vec!["Error: Process timed out after 200 ms".to_string()]);
}

#[cfg(unix)]
#[test]
fn signal_death_reports_negative_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("crash");
    write_script(&script, "#!/bin/sh\ncat >/dev/null\nkill -9 $$\n");

    let result = Caller::new().call("exe", script.to_str().unwrap(), &json!(null));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.errors[0], "Process exited with code -9");
}

#[cfg(unix)]
#[test]
fn stray_stdout_lands_in_the_capture_sink() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "captured"}));
    assert_eq!(result.request_status, Some(true), "errors: {:?}", result.errors);
    assert_eq!(result.data, json!("hidden line\n"));
}

#[test]
fn overflow_is_reported_as_failed_output() {
    let result = Caller::new().call("exe", callee(), &json!({"op": "double", "n": i64::MAX}));
    assert_eq!(result.request_status, Some(false));
    assert_eq!(result.data, Value::Null);
    assert_eq!(
        result.errors,
        vec![format!("Error: {} * 2 overflows a 64-bit integer", i64::MAX)]
    );
}
