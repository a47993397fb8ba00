use assert_cmd::prelude::*;
use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use tempfile::tempdir;

#[test]
fn init_then_simulate_writes_summary() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("demo.toml");
    let summary = tmp.path().join("summary.json");

    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy()])
        .assert()
        .success();
    assert!(experiment.exists(), "init should write the experiment file");

    Command::cargo_bin("nsk")?
        .args([
            "simulate",
            &experiment.to_string_lossy(),
            "--duration-ms",
            "20",
            "-o",
            &summary.to_string_lossy(),
        ])
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary)?)?;
    assert_eq!(json["experiment"], "demo");
    assert_eq!(json["ranks"], 2);
    assert_eq!(json["connections"], 20);
    assert!(json["probe_spikes"]["readout"].as_u64().unwrap_or(0) >= 24);
    assert_eq!(json["per_rank"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn simulate_prints_to_stdout_with_overrides() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("exp.toml");
    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy()])
        .assert()
        .success();

    Command::cargo_bin("nsk")?
        .args([
            "simulate",
            &experiment.to_string_lossy(),
            "--ranks",
            "1",
            "--threads",
            "3",
            "--duration-ms",
            "5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"probe_spikes\""))
        .stdout(predicate::str::contains("\"threads\": 3"));
    Ok(())
}

#[test]
fn init_refuses_to_overwrite() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("exp.toml");
    fs::write(&experiment, "name = \"mine\"\n")?;

    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy()])
        .assert()
        .failure();
    assert_eq!(fs::read_to_string(&experiment)?, "name = \"mine\"\n");

    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy(), "--force"])
        .assert()
        .success();
    assert!(fs::read_to_string(&experiment)?.contains("stimulus"));
    Ok(())
}

#[test]
fn inspect_reports_layout() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("exp.toml");
    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy()])
        .assert()
        .success();

    let output = Command::cargo_bin("nsk")?
        .args(["inspect", &experiment.to_string_lossy()])
        .output()?;
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["time_ms"], 0.0);
    let min_delay = json["min_delay_ms"].as_f64().unwrap_or_default();
    assert!((min_delay - 1.5).abs() < 1e-9);
    assert_eq!(json["populations"][2]["name"], "readout");

    Command::cargo_bin("nsk")?
        .args(["inspect", &experiment.to_string_lossy(), "--config-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[[populations]]"));
    Ok(())
}

#[test]
fn broken_experiment_fails() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("bad.toml");
    fs::write(
        &experiment,
        "name = \"bad\"\n[[projections]]\nsource = \"a\"\ntarget = \"b\"\nrule = { rule = \"all_to_all\" }\n",
    )?;

    Command::cargo_bin("nsk")?
        .args(["simulate", &experiment.to_string_lossy()])
        .assert()
        .failure();

    Command::cargo_bin("nsk")?
        .args(["simulate", &tmp.path().join("missing.toml").to_string_lossy()])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn unwritable_report_names_the_path() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let experiment = tmp.path().join("demo.toml");
    Command::cargo_bin("nsk")?
        .args(["init", &experiment.to_string_lossy()])
        .assert()
        .success();

    let report = tmp.path().join("no-such-dir").join("summary.json");
    Command::cargo_bin("nsk")?
        .args([
            "inspect",
            &experiment.to_string_lossy(),
            "--config-only",
            "-o",
            &report.to_string_lossy(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not write report to"));
    assert!(!report.exists());
    Ok(())
}
