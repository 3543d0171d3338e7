mod common;
use common::*;

use flate2::write::GzEncoder;
use std::io::Write;

fn sample_unit(root: &std::path::Path) -> std::path::PathBuf {
    write_timer_file(
        root,
        "ac0001_00",
        "TOrder",
        "0",
        "timers.csv",
        &[
            "T,TOrder,1000,900,false",
            "A,Login,1000,300,false",
            "R,Product.1.4,1200,40,false,10,200,200,/p/14",
            "R,Product.2.1,1300,60,true,10,200,500,/p/21",
            "this is not a record",
            "R,Late,90000,10,false,1,2,200,/late",
        ],
    )
}

#[test]
fn test_report_json_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_unit(dir.path());

    let (report, _stderr, code) =
        run_loadstat_json(&["--remove-indexes", "--threads", "2", path_str(&file)]);
    assert_eq!(code, 0);
    assert_eq!(report["cancelled"], false);
    assert_eq!(report["minimum_time"], 1000);
    assert_eq!(report["maximum_time"], 90000);
    assert_eq!(report["stats"]["parse_errors"], 1);
    assert_eq!(report["stats"]["records_delivered"], 5);

    let product = &report["providers"]["summary"]["request"]["Product"];
    assert_eq!(product["count"], 2);
    assert_eq!(product["errors"], 1);
    assert_eq!(product["min"], 40);
    assert_eq!(product["max"], 60);
}

#[test]
fn test_time_window_options() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_unit(dir.path());

    let (report, _stderr, code) = run_loadstat_json(&[
        "--from",
        "1970-01-01T00:00:01.100Z",
        "--to",
        "2000",
        path_str(&file),
    ]);
    assert_eq!(code, 0);
    assert_eq!(report["stats"]["out_of_window"], 3);
    assert_eq!(report["minimum_time"], 1200);
    assert_eq!(report["maximum_time"], 1300);
}

#[test]
fn test_gzip_input_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let unit = dir.path().join("ac0002_00").join("TSearch").join("1");
    std::fs::create_dir_all(&unit).unwrap();
    let path = unit.join("timers.csv.gz");

    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(b"T,TSearch,5000,100,false\nE,Retry,5100,TSearch,slow backend\n")
        .unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();

    let (report, stderr, code) = run_loadstat_json(&["--stats", path_str(&path)]);
    assert_eq!(code, 0);
    assert_eq!(report["providers"]["summary"]["event"]["Retry"]["count"], 1);
    assert!(stderr.contains("Lines processed: 2 total"), "stderr: {}", stderr);
}

#[test]
fn test_config_file_with_merge_rules() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_unit(dir.path());
    let config = dir.path().join("report.json");
    std::fs::write(
        &config,
        r#"{
            "merge_rules": [
                {"include": {"url": "^/p/(\\d)"}, "new_name": "Product {u:1}"}
            ]
        }"#,
    )
    .unwrap();

    let (report, _stderr, code) =
        run_loadstat_json(&["--config", path_str(&config), path_str(&file)]);
    assert_eq!(code, 0);
    let requests = &report["providers"]["summary"]["request"];
    assert_eq!(requests["Product 1"]["count"], 1);
    assert_eq!(requests["Product 2"]["count"], 1);
    assert_eq!(requests["Late"]["count"], 1);
}

#[test]
fn test_invalid_usage_exit_codes() {
    let (_stdout, _stderr, code) = run_loadstat(&[]);
    assert_eq!(code, 2, "missing files is a usage error");

    let (_stdout, stderr, code) = run_loadstat(&["--sample-factor", "0", "timers.csv"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("data_sample_factor"), "stderr: {}", stderr);

    let (_stdout, _stderr, code) = run_loadstat(&["--from", "later", "timers.csv"]);
    assert_eq!(code, 2);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let (_stdout, stderr, code) = run_loadstat(&["--config", "/nonexistent/report.json", "x.csv"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_unreadable_file_is_logged_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_unit(dir.path());
    let missing = dir.path().join("gone").join("timers.csv");

    let (report, stderr, code) =
        run_loadstat_json(&[path_str(&missing), path_str(&file)]);
    assert_eq!(code, 0);
    assert_eq!(report["stats"]["units_finished"], 2);
    assert!(stderr.contains("Failed to read source unit"), "stderr: {}", stderr);
}

#[test]
fn test_help_and_version() {
    let (stdout, _stderr, code) = run_loadstat(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("--sample-factor"));

    let (stdout, _stderr, code) = run_loadstat(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.starts_with("loadstat"));
}
