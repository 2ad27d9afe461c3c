use crate::{
    config::Configuration,
    shell::{quote, ShellError},
    state::{StateError, StateFiles},
    RunNumber,
};
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to run the producer: {0}")]
    Shell(#[from] ShellError),
    #[error("Failed to record the failed run: {0}")]
    State(#[from] StateError),
    #[error("Failed to handle the output file: {0}")]
    Io(#[from] io::Error),
}

/// One batch of a run, as passed on the worker command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    pub run: RunNumber,
    pub files: Vec<String>,
    pub batch: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// producer failed, the run was recorded for relaunching
    Failed { status: Option<i32> },
    /// producer succeeded without writing its output, recorded like a failure
    MissingOutput,
    /// output too small to be worth keeping
    Discarded { bytes: u64 },
    StagedOut { target: String },
    StageOutFailed { status: Option<i32> },
}

impl WorkerJob {
    pub fn new(run: RunNumber, files: &str, batch: usize) -> Self {
        Self {
            run,
            files: files
                .split(',')
                .map(str::trim)
                .filter(|file| !file.is_empty())
                .map(str::to_owned)
                .collect(),
            batch,
        }
    }

    /// `calibtree_<run>.root` for the first batch, `calibtree_<run>_<batch>.root` after
    pub fn output_name(&self) -> String {
        if self.batch == 1 {
            format!("calibtree_{}.root", self.run)
        } else {
            format!("calibtree_{}_{}.root", self.run, self.batch)
        }
    }
}

pub fn producer_command(config: &Configuration, job: &WorkerJob) -> String {
    format!(
        "{} {} outputFile={} conditionGT={} inputCollection={} {} runNumber={}",
        config.worker.producer,
        config.worker.producer_cfg,
        job.output_name(),
        quote(&config.global_tag),
        quote(&config.collection),
        quote(&format!("inputFiles={}", job.files.join(","))),
        job.run
    )
}

pub fn stageout_target(config: &Configuration, output: &str) -> String {
    format!(
        "{}/{}/{}",
        config.worker.stageout_url.trim_end_matches('/'),
        config.output_dir.trim_matches('/'),
        output
    )
}

/// Produce the calibration tree of one batch inside `work_dir` and stage it out
#[tracing::instrument(level = "info", skip(config, job), fields(run = job.run, batch = job.batch))]
pub fn run_worker(
    config: &Configuration,
    job: &WorkerJob,
    work_dir: &Path,
) -> Result<WorkerOutcome, WorkerError> {
    let shell = config.shell().in_dir(work_dir);
    let output_name = job.output_name();
    let output_path = work_dir.join(&output_name);

    let first = job.batch.saturating_sub(1) * config.n_files_per_job.get() + 1;
    info!(
        "Processing files {} to {} of run {} ({} files total)",
        first,
        first + job.files.len().saturating_sub(1),
        job.run,
        job.files.len()
    );

    let command = producer_command(config, job);
    info!(command = %command, "Running producer");
    let producer = shell.run(&command)?;

    let state = StateFiles::new(&config.state_dir, config.bunch);
    let outcome = if !producer.success() {
        error!(status = ?producer.status, output = %producer.combined(), "Job failed");
        state.record_failure(job.run)?;

        WorkerOutcome::Failed {
            status: producer.status,
        }
    } else if !output_path.is_file() {
        error!(output = %output_path.display(), "Producer finished without writing its output");
        state.record_failure(job.run)?;

        WorkerOutcome::MissingOutput
    } else {
        let bytes = fs::metadata(&output_path)?.len();

        if bytes > config.worker.min_output_bytes {
            let target = stageout_target(config, &output_name);
            info!(target = %target, bytes = bytes, "Staging out output");

            let stageout = shell.run(&format!(
                "{} {} {}",
                config.worker.stageout_command,
                quote(&output_name),
                quote(&target)
            ))?;

            if stageout.success() {
                WorkerOutcome::StagedOut { target }
            } else {
                error!(status = ?stageout.status, output = %stageout.combined(), "Stage out failed");
                WorkerOutcome::StageOutFailed {
                    status: stageout.status,
                }
            }
        } else {
            warn!(bytes = bytes, "Output is too small, not staging out");
            WorkerOutcome::Discarded { bytes }
        }
    };

    if output_path.exists() {
        fs::remove_file(&output_path)?;
    }

    Ok(outcome)
}
