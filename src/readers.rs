//! Timer file readers
//!
//! Input files are grouped by directory into source units. A unit's
//! directory path ends in `<agent>/<test case>/<user number>`; every record
//! read from the unit is stamped with those names. Units are read by a small
//! pool of reader threads, each unit entirely by one thread.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use crate::buffer::CharBuffer;
use crate::decompression::DecompressionReader;
use crate::error::Cancelled;
use crate::parallel::{ActionNameIndex, DataChunk, Dispatcher};

/// Prefix of timer files written by the web driver agent.
const WEB_DRIVER_TIMERS_PREFIX: &str = "timers-wd-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub collect_action_names: bool,
    pub adjust_timer_names: bool,
}

/// All timer files of one agent, test case and user.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub directory: PathBuf,
    pub agent_name: Arc<str>,
    pub test_case_name: Arc<str>,
    pub user_number: Arc<str>,
    /// Action-collecting files come first.
    pub files: Vec<SourceFile>,
}

/// Reader behavior switches
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub chunk_size: usize,
    pub reader_threads: usize,
    pub collect_action_names: bool,
    pub adjust_timer_names: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::parallel::DEFAULT_CHUNK_SIZE,
            reader_threads: 2,
            collect_action_names: true,
            adjust_timer_names: true,
        }
    }
}

/// Group `paths` by parent directory, in directory order.
///
/// Inside a unit that contains web driver timer files, those files get their
/// timer names adjusted and all other files collect action names; the
/// collecting files are read first.
pub fn group_files(paths: &[PathBuf], options: &ReaderOptions) -> Vec<SourceUnit> {
    let mut by_directory: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for path in paths {
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        by_directory.entry(directory).or_default().push(path.clone());
    }

    by_directory
        .into_iter()
        .map(|(directory, mut paths)| {
            paths.sort();
            paths.dedup();

            let has_web_driver_timers = paths.iter().any(|p| is_web_driver_timers(p));
            let mut files: Vec<SourceFile> = paths
                .into_iter()
                .map(|path| {
                    let web_driver = is_web_driver_timers(&path);
                    SourceFile {
                        collect_action_names: options.collect_action_names
                            && has_web_driver_timers
                            && !web_driver,
                        adjust_timer_names: options.adjust_timer_names && web_driver,
                        path,
                    }
                })
                .collect();
            files.sort_by_key(|f| !f.collect_action_names);

            let mut names = directory
                .components()
                .rev()
                .map(|c| c.as_os_str().to_string_lossy().into_owned());
            let user_number = names.next().unwrap_or_default();
            let test_case_name = names.next().unwrap_or_default();
            let agent_name = names.next().unwrap_or_default();

            SourceUnit {
                directory,
                agent_name: Arc::from(agent_name),
                test_case_name: Arc::from(test_case_name),
                user_number: Arc::from(user_number),
                files,
            }
        })
        .collect()
}

fn is_web_driver_timers(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(WEB_DRIVER_TIMERS_PREFIX))
}

/// Read every file of `unit` into chunks of at most `chunk_size` lines and
/// hand them to the dispatcher. Empty lines are skipped but still counted
/// for line numbers.
pub fn read_unit(unit: &SourceUnit, dispatcher: &Dispatcher, chunk_size: usize) -> Result<()> {
    let action_names = ActionNameIndex::new();
    let chunk_size = chunk_size.max(1);

    for file in &unit.files {
        debug!(file = %file.path.display(), "Reading timer file");

        let new_chunk = |lines: Vec<CharBuffer>, base_line_number: usize| DataChunk {
            lines,
            agent_name: Arc::clone(&unit.agent_name),
            test_case_name: Arc::clone(&unit.test_case_name),
            user_number: Arc::clone(&unit.user_number),
            base_line_number,
            source: Some(file.path.clone()),
            collect_action_names: file.collect_action_names,
            adjust_timer_names: file.adjust_timer_names,
            action_names: action_names.clone(),
        };

        let mut reader = DecompressionReader::open(&file.path)?;
        let mut raw = Vec::new();
        let mut lines = Vec::with_capacity(chunk_size);
        let mut line_number = 0;
        let mut chunk_start = 1;

        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .with_context(|| format!("Failed to read {}", file.path.display()))?;
            if n == 0 {
                break;
            }
            line_number += 1;

            let text = String::from_utf8_lossy(&raw);
            if let Cow::Owned(_) = text {
                warn!(
                    file = %file.path.display(),
                    line = line_number,
                    "Replaced invalid UTF-8 in timer file line"
                );
            }
            let text = text.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }

            if lines.is_empty() {
                chunk_start = line_number;
            }
            lines.push(CharBuffer::from(text));

            if lines.len() >= chunk_size {
                let full = std::mem::replace(&mut lines, Vec::with_capacity(chunk_size));
                dispatcher.add_read_data(new_chunk(full, chunk_start))?;
            }
        }

        if !lines.is_empty() {
            dispatcher.add_read_data(new_chunk(lines, chunk_start))?;
        }
    }

    Ok(())
}

/// Register all units with the dispatcher and start the reader pool. Every
/// unit is reported finished once read, even when reading it failed, so the
/// pipeline never waits for a broken unit.
pub fn spawn_readers(
    units: Vec<SourceUnit>,
    dispatcher: Arc<Dispatcher>,
    options: &ReaderOptions,
) -> Result<Vec<thread::JoinHandle<()>>> {
    for _ in &units {
        dispatcher.register_unit();
    }
    dispatcher.begin_reading();

    let (unit_sender, unit_receiver) = crossbeam_channel::unbounded();
    for unit in units {
        // the receiver is alive, so this cannot fail
        let _ = unit_sender.send(unit);
    }
    drop(unit_sender);

    let chunk_size = options.chunk_size;
    let mut handles = Vec::with_capacity(options.reader_threads);
    for id in 0..options.reader_threads.max(1) {
        let receiver = unit_receiver.clone();
        let dispatcher = Arc::clone(&dispatcher);
        let handle = thread::Builder::new()
            .name(format!("loadstat-reader-{}", id))
            .spawn(move || reader_thread(receiver, dispatcher, chunk_size))
            .context("Failed to spawn reader thread")?;
        handles.push(handle);
    }

    Ok(handles)
}

fn reader_thread(
    units: crossbeam_channel::Receiver<SourceUnit>,
    dispatcher: Arc<Dispatcher>,
    chunk_size: usize,
) {
    while let Ok(unit) = units.recv() {
        if dispatcher.is_cancelled() {
            warn!("Reader stopped by cancellation");
            return;
        }

        match read_unit(&unit, &dispatcher, chunk_size) {
            Ok(()) => debug!(directory = %unit.directory.display(), "Source unit read"),
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                warn!("Reader stopped by cancellation");
                return;
            }
            Err(err) => error!(
                "Failed to read source unit {}: {:#}",
                unit.directory.display(),
                err
            ),
        }
        dispatcher.finished_reading();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::StatisticsProcessor;
    use crate::stats::PipelineStats;
    use std::fs;

    fn dispatcher(queue_length: usize) -> Arc<Dispatcher> {
        let stats = Arc::new(PipelineStats::new());
        let statistics = Arc::new(StatisticsProcessor::new(Vec::new(), stats.clone()));
        Arc::new(Dispatcher::new(queue_length, statistics, stats))
    }

    #[test]
    fn test_group_files_by_directory() {
        let paths = vec![
            PathBuf::from("results/ac0001_00/TOrder/7/timers.csv"),
            PathBuf::from("results/ac0001_00/TOrder/7/timers-wd-1.csv"),
            PathBuf::from("results/ac0001_00/TBrowse/3/timers.csv.gz"),
        ];
        let units = group_files(&paths, &ReaderOptions::default());
        assert_eq!(units.len(), 2);

        let browse = &units[0];
        assert_eq!(&*browse.agent_name, "ac0001_00");
        assert_eq!(&*browse.test_case_name, "TBrowse");
        assert_eq!(&*browse.user_number, "3");
        assert!(!browse.files[0].collect_action_names);
        assert!(!browse.files[0].adjust_timer_names);

        let order = &units[1];
        assert_eq!(&*order.test_case_name, "TOrder");
        assert_eq!(order.files.len(), 2);
        assert_eq!(order.files[0].path, PathBuf::from("results/ac0001_00/TOrder/7/timers.csv"));
        assert!(order.files[0].collect_action_names);
        assert!(order.files[1].adjust_timer_names);
        assert!(!order.files[1].collect_action_names);
    }

    #[test]
    fn test_group_files_respects_switches() {
        let paths = vec![
            PathBuf::from("a/t/u/timers.csv"),
            PathBuf::from("a/t/u/timers-wd-1.csv"),
        ];
        let options = ReaderOptions {
            collect_action_names: false,
            adjust_timer_names: false,
            ..Default::default()
        };
        let units = group_files(&paths, &options);
        assert!(units[0].files.iter().all(|f| !f.collect_action_names && !f.adjust_timer_names));
    }

    #[test]
    fn test_read_unit_chunks_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let unit_dir = dir.path().join("ac0001_00").join("TOrder").join("4");
        fs::create_dir_all(&unit_dir)?;
        let file = unit_dir.join("timers.csv");
        fs::write(&file, "A,a,1,1,false\r\n\nA,b,2,1,false\nA,c,3,1,false\nA,d,4,1,false")?;

        let units = group_files(&[file.clone()], &ReaderOptions::default());
        let d = dispatcher(10);
        read_unit(&units[0], &d, 2)?;

        let first = d.retrieve_read_data().unwrap();
        assert_eq!(first.lines, vec![CharBuffer::from("A,a,1,1,false"), CharBuffer::from("A,b,2,1,false")]);
        assert_eq!(first.base_line_number, 1);
        assert_eq!(&*first.agent_name, "ac0001_00");
        assert_eq!(&*first.test_case_name, "TOrder");
        assert_eq!(&*first.user_number, "4");
        assert_eq!(first.source.as_deref(), Some(file.as_path()));

        let second = d.retrieve_read_data().unwrap();
        assert_eq!(second.lines.len(), 2);
        assert_eq!(second.base_line_number, 4);
        assert_eq!(d.open_chunks(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("timers.csv");
        fs::write(&file, b"A,Caf\xe9,1000,1,false\nA,Ok,2000,1,false\n")?;

        let units = group_files(&[file], &ReaderOptions::default());
        let d = dispatcher(4);
        read_unit(&units[0], &d, 10)?;

        let chunk = d.retrieve_read_data().unwrap();
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.lines[0], "A,Caf\u{FFFD},1000,1,false");
        assert_eq!(chunk.lines[1], "A,Ok,2000,1,false");
        Ok(())
    }

    #[test]
    fn test_units_share_one_action_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("timers.csv"), "A,Login,1000,1,false\n")?;
        fs::write(dir.path().join("timers-wd-1.csv"), "R,page_1,1500,1,false,0,0,200,/\n")?;

        let units = group_files(
            &[dir.path().join("timers-wd-1.csv"), dir.path().join("timers.csv")],
            &ReaderOptions::default(),
        );
        let d = dispatcher(10);
        read_unit(&units[0], &d, 100)?;

        let collect = d.retrieve_read_data().unwrap();
        let adjust = d.retrieve_read_data().unwrap();
        assert!(collect.collect_action_names);
        assert!(adjust.adjust_timer_names);
        collect.action_names.insert(1000, CharBuffer::from("Login"));
        assert_eq!(adjust.action_names.floor(1500).unwrap(), "Login");
        Ok(())
    }

    #[test]
    fn test_broken_unit_still_finishes() -> Result<()> {
        let units = group_files(&[PathBuf::from("/nonexistent/a/t/u/timers.csv")], &ReaderOptions::default());
        let d = dispatcher(4);
        let handles = spawn_readers(units, Arc::clone(&d), &ReaderOptions::default())?;
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(d.total_units(), 1);
        assert_eq!(d.remaining_units(), 0);
        assert_eq!(d.wait_for_completion(), Ok(()));
        Ok(())
    }
}
