mod condor;
mod local;

use crate::{
    bunch::Bunch,
    config::SchedulerConfig,
    shell::{Shell, ShellError},
    submission::DescriptorOptions,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to run the scheduler: {0}")]
    Shell(#[from] ShellError),
    #[error("Submission was rejected with status {status:?}: {output}")]
    SubmitFailed { status: Option<i32>, output: String },
    #[error("Failed to read submission files: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index line {line} is malformed: '{content}'")]
    MalformedIndex { line: usize, content: String },
}

/// All scheduler back-ends, created through `Schedulers::load`
#[derive(Debug, Clone)]
pub enum Schedulers {
    Condor(condor::CondorScheduler),
    Local(local::LocalScheduler),
}

impl Schedulers {
    /// relative input files are taken relative to `working_dir`
    pub fn load(config: &SchedulerConfig, working_dir: &Path, shell: Shell) -> Self {
        match config {
            SchedulerConfig::Condor {
                command,
                job_flavour,
                batch_name,
                transfer_input_files,
            } => Self::Condor(condor::CondorScheduler::new(
                command.clone(),
                batch_name.clone(),
                DescriptorOptions {
                    job_flavour: job_flavour.clone(),
                    transfer_input_files: transfer_input_files
                        .iter()
                        .map(|path| working_dir.join(path))
                        .collect(),
                },
                shell,
            )),
            SchedulerConfig::Local { timeout } => {
                Self::Local(local::LocalScheduler::new(Duration::from_secs(*timeout)))
            }
        }
    }

    /// what the generated descriptor should carry
    pub fn descriptor_options(&self) -> DescriptorOptions {
        match self {
            Self::Condor(scheduler) => scheduler.options().clone(),
            Self::Local(_) => DescriptorOptions::default(),
        }
    }

    /// command line a submission would run, shown in dry runs
    pub fn submit_command(&self, descriptor: &Path, bunch: Bunch) -> String {
        match self {
            Self::Condor(scheduler) => scheduler.submit_command(descriptor, bunch),
            Self::Local(scheduler) => scheduler.describe(descriptor),
        }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn submit(&self, descriptor: &Path, bunch: Bunch) -> Result<(), SchedulerError> {
        match self {
            Self::Condor(scheduler) => scheduler.submit(descriptor, bunch),
            Self::Local(scheduler) => scheduler.submit(descriptor),
        }
    }
}

fn descriptor_dir(descriptor: &Path) -> PathBuf {
    descriptor
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
