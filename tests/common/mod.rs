// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use loadstat::buffer::CharBuffer;
use loadstat::parallel::{DataChunk, ReportProvider};
use loadstat::record::DataRecord;

/// Run the loadstat binary with the given arguments
pub fn run_loadstat(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_loadstat"))
        .args(args)
        .output()
        .expect("Failed to execute loadstat");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run loadstat on files and parse the JSON report from stdout
pub fn run_loadstat_json(args: &[&str]) -> (serde_json::Value, String, i32) {
    let (stdout, stderr, code) = run_loadstat(args);
    let report = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}\nstderr: {}", e, stdout, stderr));
    (report, stderr, code)
}

/// Create `<root>/<agent>/<test case>/<user number>/<file>` with the given lines
pub fn write_timer_file(
    root: &Path,
    agent: &str,
    test_case: &str,
    user_number: &str,
    file: &str,
    lines: &[&str],
) -> PathBuf {
    let dir = root.join(agent).join(test_case).join(user_number);
    fs::create_dir_all(&dir).expect("Failed to create unit directory");
    let path = dir.join(file);
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).expect("Failed to write timer file");
    path
}

pub fn chunk_of(lines: &[&str]) -> DataChunk {
    DataChunk::new(lines.iter().map(|l| CharBuffer::from(*l)).collect())
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

/// Provider that keeps every record it receives
#[derive(Default)]
pub struct Collecting {
    pub records: Vec<DataRecord>,
}

impl ReportProvider for Collecting {
    fn name(&self) -> &str {
        "collecting"
    }

    fn process_data_record(&mut self, record: &DataRecord) -> anyhow::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
