use crate::{bunch::Bunch, partition::JobBatch, shell::quote, RunNumber};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    fs,
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DESCRIPTOR_NAME: &str = "condor_submission.submit";
pub const INDEX_NAME: &str = "input_numbers.txt";
pub const LAUNCH_SCRIPT_NAME: &str = "launch.sh";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Failed to write submission files: {0}")]
    Io(#[from] io::Error),
    #[error("Submission directory {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),
}

pub fn job_dir_name(run: RunNumber, index: usize) -> String {
    format!("job_{run}_{index}")
}

/// Write `content` to `path` and make it executable for everyone
pub fn write_executable(path: &Path, content: &str) -> io::Result<()> {
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorOptions {
    pub job_flavour: String,
    pub transfer_input_files: Vec<PathBuf>,
}

impl Default for DescriptorOptions {
    fn default() -> Self {
        Self {
            job_flavour: "workday".to_owned(),
            transfer_input_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    /// one job per line of the index file
    PerJob,
    /// a single job living directly in the submission directory
    Single,
}

/// HTCondor submit description file
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub dir: PathBuf,
    pub queue: Queue,
    pub options: DescriptorOptions,
}

impl Descriptor {
    pub fn per_job(dir: &Path, options: DescriptorOptions) -> Self {
        Self {
            dir: dir.to_path_buf(),
            queue: Queue::PerJob,
            options,
        }
    }

    pub fn single(dir: &Path, options: DescriptorOptions) -> Self {
        Self {
            dir: dir.to_path_buf(),
            queue: Queue::Single,
            options,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(DESCRIPTOR_NAME)
    }

    pub fn render(&self) -> String {
        let dir = self.dir.display();
        let job_dir = match self.queue {
            Queue::PerJob => format!("{dir}/job_$(run)_$(number)"),
            Queue::Single => dir.to_string(),
        };

        let mut descriptor = String::new();
        descriptor.push_str("Universe = vanilla\n");
        descriptor.push_str(&format!("Executable = {job_dir}/{LAUNCH_SCRIPT_NAME}\n"));
        descriptor.push_str("Arguments =\n\n");
        descriptor.push_str(&format!("Error = {job_dir}/job.err\n"));
        descriptor.push_str(&format!("Output = {job_dir}/job.out\n"));
        descriptor.push_str(&format!("Log = {job_dir}/job.log\n"));
        if !self.options.transfer_input_files.is_empty() {
            descriptor.push_str(&format!(
                "transfer_input_files = {}\n",
                self.options
                    .transfer_input_files
                    .iter()
                    .map(|path| path.display())
                    .join(",")
            ));
        }
        descriptor.push('\n');
        descriptor.push_str(&format!("+JobFlavour = \"{}\"\n", self.options.job_flavour));
        match self.queue {
            Queue::PerJob => {
                descriptor.push_str(&format!("queue run,number from {dir}/{INDEX_NAME}\n"))
            }
            Queue::Single => descriptor.push_str("queue\n"),
        }

        descriptor
    }

    pub fn write(&self) -> Result<PathBuf, SubmissionError> {
        let path = self.path();
        fs::write(&path, self.render())?;
        debug!(path = %path.display(), "Wrote submit descriptor");

        Ok(path)
    }
}

/// Shell script a scheduler slot executes
#[derive(Debug, Clone)]
pub struct LaunchScript {
    pub init_env: String,
    pub command: String,
}

impl LaunchScript {
    pub fn render(&self) -> String {
        format!(
            "#!/bin/bash\n{}{}\n",
            self.init_env.replace(';', ";\n"),
            self.command
        )
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, SubmissionError> {
        let path = dir.join(LAUNCH_SCRIPT_NAME);
        write_executable(&path, &self.render())?;

        Ok(path)
    }
}

/// Summary of a run handed to the scheduler, reported to the operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchedRun {
    pub jobs: usize,
    // files the catalog listed for the run
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub dir: PathBuf,
    // missing when no job was generated
    pub descriptor: Option<PathBuf>,
    pub launched: BTreeMap<RunNumber, LaunchedRun>,
    pub n_jobs: usize,
}

/// Lays out one directory with a launch script per job batch, the index of
/// all jobs and the descriptor queueing them
#[derive(Debug)]
pub struct SubmissionGenerator {
    dir: PathBuf,
    init_env: String,
    launcher: String,
    // where the workers record failed runs
    state_dir: PathBuf,
    bunch: Bunch,
    index: Vec<(RunNumber, usize)>,
    launched: BTreeMap<RunNumber, LaunchedRun>,
}

impl SubmissionGenerator {
    pub fn new(dir: &Path, init_env: &str, launcher: &str, state_dir: &Path, bunch: Bunch) -> Self {
        Self {
            dir: dir.to_path_buf(),
            init_env: init_env.to_owned(),
            launcher: launcher.to_owned(),
            state_dir: state_dir.to_path_buf(),
            bunch,
            index: Vec::new(),
            launched: BTreeMap::new(),
        }
    }

    /// Create the submission directory, or clean what an earlier submission left
    pub fn prepare(&self) -> Result<(), SubmissionError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            return Ok(());
        }
        if !self.dir.is_dir() {
            return Err(SubmissionError::NotADirectory(self.dir.clone()));
        }

        info!(dir = %self.dir.display(), "Found old submission directory, removing its contents");
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with("job_") && entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else if name == DESCRIPTOR_NAME || name == INDEX_NAME {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(())
    }

    /// first free batch index of `run`, runs can come from several datasets
    pub fn next_index(&self, run: RunNumber) -> usize {
        self.launched.get(&run).map_or(1, |launched| launched.jobs + 1)
    }

    pub fn worker_command(&self, batch: &JobBatch) -> String {
        let mut command = format!(
            "{} worker --run {} --files {} --batch {} --state-dir {}",
            self.launcher,
            batch.run,
            quote(&batch.files.join(",")),
            batch.index,
            quote(&self.state_dir.to_string_lossy())
        );
        if self.bunch == Bunch::Alternate {
            command.push_str(" --alternate");
        }

        command
    }

    pub fn add_run(
        &mut self,
        run: RunNumber,
        listed_files: usize,
        batches: &[JobBatch],
    ) -> Result<(), SubmissionError> {
        if self.launched.contains_key(&run) {
            warn!(run = run, "Run is submitted a second time, continuing its batch numbering");
        }

        for batch in batches {
            self.setup_job(batch)?;
        }

        let launched = self.launched.entry(run).or_default();
        launched.jobs += batches.len();
        launched.files += listed_files;
        info!(run = run, jobs = launched.jobs, files = launched.files, "Prepared jobs for run");

        Ok(())
    }

    fn setup_job(&mut self, batch: &JobBatch) -> Result<PathBuf, SubmissionError> {
        let job_dir = self.dir.join(job_dir_name(batch.run, batch.index));
        fs::create_dir_all(&job_dir)?;

        let script = LaunchScript {
            init_env: self.init_env.clone(),
            command: self.worker_command(batch),
        }
        .write(&job_dir)?;
        debug!(script = %script.display(), files = batch.files.len(), "Wrote launch script");

        self.index.push((batch.run, batch.index));

        Ok(job_dir)
    }

    pub fn n_jobs(&self) -> usize {
        self.index.len()
    }

    /// Write index and descriptor. Nothing is written when no job was set up.
    pub fn finish(self, options: DescriptorOptions) -> Result<Submission, SubmissionError> {
        let n_jobs = self.n_jobs();

        let descriptor = if n_jobs == 0 {
            info!(bunch = self.bunch.label(), "No runs were found");
            None
        } else {
            let index = self
                .index
                .iter()
                .map(|(run, number)| format!("{run},{number}\n"))
                .collect::<String>();
            fs::write(self.dir.join(INDEX_NAME), index)?;

            Some(Descriptor::per_job(&self.dir, options).write()?)
        };

        Ok(Submission {
            dir: self.dir,
            descriptor,
            launched: self.launched,
            n_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(run: RunNumber, index: usize, files: &[&str]) -> JobBatch {
        JobBatch {
            run,
            index,
            files: files.iter().map(|file| file.to_string()).collect(),
        }
    }

    #[test]
    fn per_job_descriptor() {
        let descriptor = Descriptor::per_job(
            Path::new("/work/condor_submission"),
            DescriptorOptions {
                job_flavour: "workday".into(),
                transfer_input_files: vec![PathBuf::from("/work/produce_cfg.py")],
            },
        );

        assert_eq!(
            descriptor.render(),
            "Universe = vanilla
Executable = /work/condor_submission/job_$(run)_$(number)/launch.sh
Arguments =

Error = /work/condor_submission/job_$(run)_$(number)/job.err
Output = /work/condor_submission/job_$(run)_$(number)/job.out
Log = /work/condor_submission/job_$(run)_$(number)/job.log
transfer_input_files = /work/produce_cfg.py

+JobFlavour = \"workday\"
queue run,number from /work/condor_submission/input_numbers.txt
"
        );
    }

    #[test]
    fn single_descriptor() {
        let rendered = Descriptor::single(Path::new("/data/condor"), DescriptorOptions::default()).render();

        assert!(rendered.contains("Executable = /data/condor/launch.sh\n"));
        assert!(rendered.contains("Log = /data/condor/job.log\n"));
        assert!(!rendered.contains("transfer_input_files"));
        assert!(!rendered.contains("$(run)"));
        assert!(rendered.ends_with("\nqueue\n"));
    }

    #[test]
    fn launch_script_splits_environment() {
        let script = LaunchScript {
            init_env: "cd /cmssw;eval `scram runtime -sh`;cd - >/dev/null;".into(),
            command: "calib-submit worker --run 1".into(),
        };

        assert_eq!(
            script.render(),
            "#!/bin/bash\ncd /cmssw;\neval `scram runtime -sh`;\ncd - >/dev/null;\ncalib-submit worker --run 1\n"
        );
    }

    #[test]
    fn generates_jobs_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let submission_dir = dir.path().join("condor_submission_AAG");

        let mut generator = SubmissionGenerator::new(
            &submission_dir,
            "",
            "calib-submit",
            Path::new("/work/state"),
            Bunch::Alternate,
        );
        generator.prepare().unwrap();
        generator
            .add_run(
                378236,
                3,
                &[
                    batch(378236, 1, &["/store/a.root", "/store/b.root"]),
                    batch(378236, 2, &["/store/c.root"]),
                ],
            )
            .unwrap();

        assert_eq!(generator.next_index(378236), 3);
        assert_eq!(generator.next_index(378240), 1);

        let submission = generator.finish(DescriptorOptions::default()).unwrap();

        assert_eq!(submission.n_jobs, 2);
        assert_eq!(
            submission.launched[&378236],
            LaunchedRun { jobs: 2, files: 3 }
        );
        assert_eq!(
            fs::read_to_string(submission_dir.join(INDEX_NAME)).unwrap(),
            "378236,1\n378236,2\n"
        );
        assert_eq!(
            submission.descriptor,
            Some(submission_dir.join(DESCRIPTOR_NAME))
        );

        let script = submission_dir.join("job_378236_1").join(LAUNCH_SCRIPT_NAME);
        let content = fs::read_to_string(&script).unwrap();
        assert!(content.ends_with(
            "calib-submit worker --run 378236 --files /store/a.root,/store/b.root --batch 1 --state-dir /work/state --alternate\n"
        ));
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn nothing_is_written_without_jobs() {
        let dir = tempfile::tempdir().unwrap();

        let generator = SubmissionGenerator::new(dir.path(), "", "calib-submit", dir.path(), Bunch::Standard);
        generator.prepare().unwrap();
        let submission = generator.finish(DescriptorOptions::default()).unwrap();

        assert_eq!(submission.n_jobs, 0);
        assert!(submission.descriptor.is_none());
        assert!(!dir.path().join(INDEX_NAME).exists());
        assert!(!dir.path().join(DESCRIPTOR_NAME).exists());
    }

    #[test]
    fn cleanup_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("job_1_1")).unwrap();
        fs::write(dir.path().join("job_1_1/job.out"), "old").unwrap();
        fs::write(dir.path().join(DESCRIPTOR_NAME), "old").unwrap();
        fs::write(dir.path().join(INDEX_NAME), "1,1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        SubmissionGenerator::new(dir.path(), "", "calib-submit", dir.path(), Bunch::Standard)
            .prepare()
            .unwrap();

        let mut left = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        left.sort();
        assert_eq!(left, vec!["notes.txt"]);
    }
}
