use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tte_core::TimeInterval;
use tte_events::{EventStore, write_event_parquet};
use tte_like::ResponseMatrix;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ttelike"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).expect("stdout should be JSON")
}

/// Three channels of 10/s on [-50, 50] plus 50/s in channel 1 during [0, 4].
fn write_fixture(dir: &Path, binning: &str) -> PathBuf {
    let mut events = Vec::new();
    for c in 0..3usize {
        for k in 0..1000 {
            events.push((-50.0 + (k as f64 + 0.2 + 0.3 * c as f64) * 0.1, c));
        }
    }
    for k in 0..200 {
        events.push(((k as f64 + 0.5) * 0.02, 1));
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (times, channels): (Vec<f64>, Vec<usize>) = events.into_iter().unzip();
    let store =
        EventStore::from_columns(times, channels, 3, Some(TimeInterval::new(-50.0, 50.0).unwrap()))
            .unwrap();
    write_event_parquet(&store, &dir.join("events.parquet")).unwrap();
    ResponseMatrix::diagonal(&[10.0, 50.0, 200.0, 1000.0], 100.0)
        .unwrap()
        .to_json(&dir.join("rsp.json"))
        .unwrap();

    let config = dir.join("analysis.yaml");
    std::fs::write(
        &config,
        format!(
            "detector: n5\nevents: events.parquet\nresponse: rsp.json\nbackground: \"-50--10, 20-50\"\nactive: \"-5-10\"\npoly_order: 0\nunbinned: false\n{binning}"
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_bins_constant() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), "binning: {start: 0, stop: 4, method: constant, dt: 1}\n");
    let v = stdout_json(&run(&["bins", "--config", config.to_str().unwrap()]));
    assert_eq!(v["n_bins"], 4);
    assert_eq!(v["method"]["method"], "constant");
    assert_eq!(v["bins"][0]["counts"], 80);
}

#[test]
fn test_bins_unknown_method_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), "binning: {start: 0, stop: 4, method: blocks, p0: 0.1}\n");
    let out = run(&["bins", "--config", config.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown binning method"));
}

#[test]
fn test_pha_files_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), "binning: {start: 0, stop: 4, method: constant, dt: 2}\n");
    let basename = dir.path().join("out");
    let args = ["pha", "--config", config.to_str().unwrap(), "--basename", basename.to_str().unwrap()];
    let out = run(&args);
    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join("out_0.pha.parquet").exists());
    assert!(dir.path().join("out_1.pha.parquet").exists());
    assert!(!run(&args).status.success());
    let mut again = args.to_vec();
    again.push("--overwrite");
    assert!(run(&again).status.success());
}

#[test]
fn test_lightcurve_and_background() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), "");
    let v = stdout_json(&run(&[
        "lightcurve",
        "--config",
        config.to_str().unwrap(),
        "--start",
        "-10",
        "--stop",
        "10",
        "--dt",
        "2",
    ]));
    assert_eq!(v["starts"].as_array().unwrap().len(), 10);

    let v = stdout_json(&run(&["background", "--config", config.to_str().unwrap()]));
    assert_eq!(v["order"], 0);
    assert_eq!(v["channels"].as_array().unwrap().len(), 3);
}

#[test]
fn test_likelihood() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), "");
    let model = dir.path().join("model.json");
    std::fs::write(&model, r#"{"type": "powerlaw", "k": 0.001, "index": -2.0}"#).unwrap();
    let v = stdout_json(&run(&[
        "likelihood",
        "--config",
        config.to_str().unwrap(),
        "--model",
        model.to_str().unwrap(),
        "--free-effective-area",
    ]));
    assert!(v["log_likelihood"].as_f64().unwrap().is_finite());
    assert_eq!(v["n_data_points"], 3);
    assert!(v["nuisance_parameters"]["cons_n5"]["free"].as_bool().unwrap());
}
