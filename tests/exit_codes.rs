use std::process::Command;

fn bytecontract() -> Command {
    let binary = std::env::var("CARGO_BIN_EXE_bytecontract").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("bytecontract");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    Command::new(binary)
}

#[test]
fn bytecontract_exits_non_zero_on_error() {
    let output = bytecontract()
        .arg("--input")
        .arg("missing.class")
        .output()
        .expect("run bytecontract");

    assert!(!output.status.success());
}

#[test]
fn bytecontract_reports_empty_input_directory() {
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let output = bytecontract()
        .arg("--input")
        .arg(temp_dir.path())
        .arg("--quiet")
        .output()
        .expect("run bytecontract");

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["stats"]["class_count"], 0);
    assert!(report["members"].as_array().expect("members").is_empty());
}
