use assert_cmd::prelude::*;
use std::path::Path;
use std::process::Command;

const SIGNING_KEY: &str = "0707070707070707070707070707070707070707070707070707070707070707";

fn write_config(path: &Path, profile: &str, auth: &str) {
    let toml = format!(
        r#"
[runtime]
profile = "{profile}"

[quote]
facility_address = "0xfa"
accepted_asset_address = "0xaa"
accepted_asset_name = "humanUSDC"
market_rate_num = 1
market_rate_den = 100000
fee_bips = 200
validity_seconds = 600

[signer]
key = {{ source = "env", var = "FPC_QUOTE_TEST_SIGNING_KEY" }}

{auth}

[logging]
format = "text"
"#
    );
    std::fs::write(path, toml).expect("write config");
}

#[test]
fn check_prints_summary() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = tmp.path().join("quote.toml");
    write_config(&cfg, "development", "");

    let out = Command::cargo_bin("quote-node")
        .expect("binary")
        .env("FPC_QUOTE_TEST_SIGNING_KEY", SIGNING_KEY)
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .output()
        .expect("run");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("config ok"), "{stdout}");
    assert!(stdout.contains("final rate         10200/1000000000"), "{stdout}");
    // The secret value never reaches the output.
    assert!(!stdout.contains(SIGNING_KEY));
    assert!(!String::from_utf8_lossy(&out.stderr).contains(SIGNING_KEY));
}

#[test]
fn production_profile_fails_fast_on_disabled_auth() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = tmp.path().join("quote.toml");
    write_config(&cfg, "production", "[auth]\nmode = \"disabled\"");

    let out = Command::cargo_bin("quote-node")
        .expect("binary")
        .env("FPC_QUOTE_TEST_SIGNING_KEY", SIGNING_KEY)
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("auth.mode = disabled"));
}

#[test]
fn missing_config_exits_with_usage_error() {
    let out = Command::cargo_bin("quote-node")
        .expect("binary")
        .env_remove("FPC_QUOTE_CONFIG")
        .arg("check")
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("FPC_QUOTE_CONFIG"));
}
