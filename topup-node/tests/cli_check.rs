use assert_cmd::prelude::*;
use std::path::Path;
use std::process::{Command, Output};

fn write_config(dir: &Path, profile: &str) -> std::path::PathBuf {
    let state = dir.join("state").join("bridge-state.json");
    let toml = format!(
        r#"
[runtime]
profile = "{profile}"

[facility]
address = "0xfa"

[topup]
threshold = "5000000000000000000000"
amount = "2000000000000000000000"
check_interval_ms = 10000

[state]
path = "{}"

[logging]
format = "text"
"#,
        state.display()
    );
    let cfg = dir.join("topup.toml");
    std::fs::write(&cfg, toml).expect("write config");
    cfg
}

fn check(cfg: &Path) -> Output {
    Command::cargo_bin("topup-node")
        .expect("binary")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(cfg)
        .arg("--backend")
        .arg("mock")
        .arg("check")
        .output()
        .expect("run")
}

#[test]
fn check_prints_summary_without_pending_bridge() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = write_config(tmp.path(), "development");

    let out = check(&cfg);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("config ok"), "{stdout}");
    assert!(stdout.contains("backend            mock"), "{stdout}");
    assert!(stdout.contains("threshold          5000000000000000000000"), "{stdout}");
    assert!(stdout.contains("ready stale after  30000ms"), "{stdout}");
    assert!(stdout.contains("pending bridge     none"), "{stdout}");
}

#[test]
fn check_reports_pending_bridge() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = write_config(tmp.path(), "development");
    let state = tmp.path().join("state");
    std::fs::create_dir_all(&state).expect("state dir");
    let hash = format!("0x{}", "ab".repeat(32));
    std::fs::write(
        state.join("bridge-state.json"),
        format!(
            r#"{{"version":1,"bridge":{{"baselineBalance":"1","amount":"2","claimSecretHash":"0x{}","messageHash":"{hash}","messageLeafIndex":"7","submittedAtMs":"1000"}}}}"#,
            "01".repeat(32)
        ),
    )
    .expect("write state");

    let out = check(&cfg);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.contains(&format!("pending bridge     message {hash} (amount 2, baseline 1")),
        "{stdout}"
    );
}

#[test]
fn corrupt_state_file_exits_with_usage_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = write_config(tmp.path(), "development");
    let state = tmp.path().join("state");
    std::fs::create_dir_all(&state).expect("state dir");
    std::fs::write(state.join("bridge-state.json"), "not json").expect("write state");

    let out = check(&cfg);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("bridge state unreadable"));
}

#[test]
fn production_profile_rejects_mock_backend() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = write_config(tmp.path(), "production");

    let out = check(&cfg);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("mock backend is not allowed"));
}
