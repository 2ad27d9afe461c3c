use super::{descriptor_dir, SchedulerError};
use crate::{
    shell::{Shell, ShellError},
    submission::{job_dir_name, INDEX_NAME, LAUNCH_SCRIPT_NAME},
    RunNumber,
};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

/// Runs the generated jobs one after the other on this machine
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    timeout: Duration,
}

impl LocalScheduler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn describe(&self, descriptor: &Path) -> String {
        format!("run jobs of {} locally", descriptor_dir(descriptor).display())
    }

    /// job directories in queue order, a missing index means a single job
    fn job_dirs(dir: &Path) -> Result<Vec<PathBuf>, SchedulerError> {
        let index = dir.join(INDEX_NAME);
        if !index.exists() {
            return Ok(vec![dir.to_path_buf()]);
        }

        fs::read_to_string(index)?
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                parse_index_line(line)
                    .map(|(run, batch)| dir.join(job_dir_name(run, batch)))
                    .ok_or_else(|| SchedulerError::MalformedIndex {
                        line: number + 1,
                        content: line.to_owned(),
                    })
            })
            .collect()
    }

    pub fn submit(&self, descriptor: &Path) -> Result<(), SchedulerError> {
        let jobs = Self::job_dirs(&descriptor_dir(descriptor))?;
        let total = jobs.len();

        for (done, job_dir) in jobs.into_iter().enumerate() {
            let shell = Shell::default().in_dir(&job_dir).with_timeout(self.timeout);

            match shell.run(&format!("sh {LAUNCH_SCRIPT_NAME}")) {
                Ok(output) => {
                    fs::write(job_dir.join("job.out"), &output.stdout)?;
                    fs::write(job_dir.join("job.err"), &output.stderr)?;
                    if !output.success() {
                        warn!(job = %job_dir.display(), status = ?output.status, "Job failed");
                    }
                }
                Err(ShellError::Timeout(timeout)) => {
                    warn!(job = %job_dir.display(), timeout = ?timeout, "Job ran into timeout")
                }
                Err(error) => return Err(error.into()),
            }

            info!("Done with {}/{total}", done + 1);
        }

        Ok(())
    }
}

fn parse_index_line(line: &str) -> Option<(RunNumber, usize)> {
    let (run, batch) = line.trim().split_once(',')?;

    Some((run.parse().ok()?, batch.parse().ok()?))
}
