use crate::{
    bunch::{Bunch, Template},
    RunNumber,
};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] io::Error),
    #[error("Last run file {path:?} does not hold a run number: '{content}'")]
    MalformedLastRun { path: PathBuf, content: String },
    #[error("Failed run file {path:?} line {line} is malformed: '{content}'")]
    MalformedFailedRun {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// A failed run recorded for relaunching. Workers record a bare run number,
/// older tooling wrote three runs per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaunchEntry {
    Run(RunNumber),
    Triple([RunNumber; 3]),
}

impl RelaunchEntry {
    pub fn run(&self) -> RunNumber {
        match self {
            Self::Run(run) => *run,
            Self::Triple([run, _, _]) => *run,
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let fields = line
            .split_whitespace()
            .map(parse_run_token)
            .collect::<Option<Vec<_>>>()?;

        match fields[..] {
            [run] => Some(Self::Run(run)),
            [first, second, third] => Some(Self::Triple([first, second, third])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub last_run: Option<RunNumber>,
    pub relaunch: Vec<RelaunchEntry>,
}

/// The per bunch `LastRun`/`FailedRun` files
#[derive(Debug, Clone)]
pub struct StateFiles {
    last_run: PathBuf,
    failed_run: PathBuf,
}

impl StateFiles {
    pub fn new(dir: &Path, bunch: Bunch) -> Self {
        Self {
            last_run: dir.join(bunch.resolve(Template::StateFile, "LastRun__AAG__.txt")),
            failed_run: dir.join(bunch.resolve(Template::StateFile, "FailedRun__AAG__.txt")),
        }
    }

    pub fn last_run_path(&self) -> &Path {
        &self.last_run
    }

    pub fn failed_run_path(&self) -> &Path {
        &self.failed_run
    }

    /// Create missing state files as empty files
    pub fn ensure(&self) -> Result<(), StateError> {
        for path in [&self.last_run, &self.failed_run] {
            if !path.exists() {
                debug!(path = %path.display(), "Creating empty state file");
                OpenOptions::new().create(true).append(true).open(path)?;
            }
        }

        Ok(())
    }

    pub fn read(&self) -> Result<RunState, StateError> {
        self.ensure()?;

        let state = RunState {
            last_run: parse_last_run(&self.last_run, &fs::read_to_string(&self.last_run)?)?,
            relaunch: parse_failed_runs(&self.failed_run, &fs::read_to_string(&self.failed_run)?)?,
        };
        info!(last_run = ?state.last_run, relaunch = state.relaunch.len(), "Read run state");

        Ok(state)
    }

    pub fn clear_failed(&self) -> Result<(), StateError> {
        debug!(path = %self.failed_run.display(), "Truncating failed run file");
        fs::write(&self.failed_run, "")?;

        Ok(())
    }

    pub fn write_last_run(&self, run: RunNumber) -> Result<(), StateError> {
        fs::write(&self.last_run, run.to_string())?;
        info!(run = run, path = %self.last_run.display(), "Stored last run");

        Ok(())
    }

    /// Append `run` to the failed run file, called from the workers
    pub fn record_failure(&self, run: RunNumber) -> Result<(), StateError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failed_run)?;
        writeln!(file, "{run}")?;
        warn!(run = run, path = %self.failed_run.display(), "Recorded failed run");

        Ok(())
    }
}

// run numbers are exactly six digits
fn parse_run_token(token: &str) -> Option<RunNumber> {
    if token.len() == 6 && token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

fn parse_last_run(path: &Path, content: &str) -> Result<Option<RunNumber>, StateError> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(None);
    }

    content
        .parse()
        .map(Some)
        .map_err(|_| StateError::MalformedLastRun {
            path: path.to_path_buf(),
            content: content.to_owned(),
        })
}

fn parse_failed_runs(path: &Path, content: &str) -> Result<Vec<RelaunchEntry>, StateError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            RelaunchEntry::parse(line).ok_or_else(|| StateError::MalformedFailedRun {
                path: path.to_path_buf(),
                line: number + 1,
                content: line.to_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_bunch() {
        let dir = Path::new("/work");

        let standard = StateFiles::new(dir, Bunch::Standard);
        let alternate = StateFiles::new(dir, Bunch::Alternate);

        assert_eq!(standard.last_run_path(), Path::new("/work/LastRun.txt"));
        assert_eq!(standard.failed_run_path(), Path::new("/work/FailedRun.txt"));
        assert_eq!(alternate.last_run_path(), Path::new("/work/LastRun_Aag.txt"));
        assert_eq!(alternate.failed_run_path(), Path::new("/work/FailedRun_Aag.txt"));
    }

    #[test]
    fn missing_files_are_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path(), Bunch::Standard);

        assert_eq!(files.read().unwrap(), RunState::default());
        assert!(files.last_run_path().exists());
        assert!(files.failed_run_path().exists());
    }

    #[test]
    fn last_run_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path(), Bunch::Alternate);

        files.write_last_run(123456).unwrap();

        assert_eq!(files.read().unwrap().last_run, Some(123456));
    }

    #[test]
    fn failed_runs_accumulate_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path(), Bunch::Standard);

        fs::write(files.failed_run_path(), "654321\n\n111111 222222 333333\n").unwrap();

        let relaunch = files.read().unwrap().relaunch;
        assert_eq!(
            relaunch,
            vec![
                RelaunchEntry::Run(654321),
                RelaunchEntry::Triple([111111, 222222, 333333])
            ]
        );
        assert_eq!(relaunch[1].run(), 111111);

        files.record_failure(378240).unwrap();
        assert_eq!(
            files.read().unwrap().relaunch.last(),
            Some(&RelaunchEntry::Run(378240))
        );

        files.clear_failed().unwrap();
        assert!(files.read().unwrap().relaunch.is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path(), Bunch::Standard);

        fs::write(files.last_run_path(), "last\n").unwrap();
        assert!(matches!(
            files.read(),
            Err(StateError::MalformedLastRun { .. })
        ));

        fs::write(files.last_run_path(), "").unwrap();
        for garbage in ["378236\n378237 1\n", "378236\n378237 378238\n", "378236\n37823\n"] {
            fs::write(files.failed_run_path(), garbage).unwrap();
            assert!(matches!(
                files.read(),
                Err(StateError::MalformedFailedRun { line: 2, .. })
            ));
        }
    }
}
