use crate::{
    bunch::{Bunch, Template},
    catalog::{validate_dataset_path, DatasetPathError},
    shell::{quote, Shell},
    RunNumber,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    env, fmt,
    fs::{self, File},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Configuration is invalid ({} problem(s))", .0.len())]
    Invalid(Vec<ConfigProblem>),
}

/// A single reason for a configuration to be rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    #[error("dataset path {path}: {reason}")]
    DatasetPath {
        path: String,
        reason: DatasetPathError,
    },
    #[error("CMSSW directory was not found and CMSSW_BASE is not set. Are you in a CMSSW environment?")]
    MissingEnvironmentRoot,
    #[error("The global tag was not specified")]
    MissingGlobalTag,
    #[error("n_files_per_job cannot be 0")]
    ZeroFilesPerJob,
    #[error("first run {first} is after last run {last}")]
    InvalidRunRange { first: RunNumber, last: RunNumber },
    #[error("working directory {0:?} does not exist")]
    WorkingDir(PathBuf),
    #[error("could not read run list {path:?}: {reason}")]
    UnreadableRunList { path: PathBuf, reason: String },
    #[error("run list {path:?} line {line}: '{content}' is not a run number")]
    MalformedRunList {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("No runs were found in the run list {0:?}")]
    EmptyRunList(PathBuf),
    #[error("could not determine the path of the worker executable: {0}")]
    Launcher(String),
    #[error("output directory {path} was not found: {reason}")]
    OutputDir { path: String, reason: String },
}

/// Proxy location the grid tools expect on lxplus, `None` outside of a login session
static DEFAULT_PROXY_PATH: Lazy<Option<PathBuf>> = Lazy::new(|| {
    let user = env::var("USER").ok().filter(|user| !user.is_empty())?;
    let initial = user.chars().next()?;

    Some(PathBuf::from(format!(
        "/afs/cern.ch/user/{initial}/{user}/x509up_u{}",
        nix::unistd::geteuid()
    )))
});

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    // catalog dataset pattern, may contain the bunch placeholder
    pub dataset_path: String,
    // stage-out directory of the produced calibration trees
    pub output_dir: String,
    pub collection: String,
    pub global_tag: String,

    #[serde(default)]
    pub first_run: RunNumber,
    #[serde(default = "default_last_run")]
    pub last_run: RunNumber,

    #[serde(default)]
    pub mail_address: Option<String>,

    #[serde(default = "default_files_per_job")]
    pub n_files_per_job: usize,
    #[serde(default = "default_min_events")]
    pub min_events: u64,
    #[serde(default)]
    pub max_events: Option<u64>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default, alias = "CMSSW_dir")]
    pub cmssw_dir: Option<PathBuf>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    // where LastRun/FailedRun live, defaults to the working directory
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_proxy_path")]
    pub proxy_path: Option<PathBuf>,
    // replaces the generated environment initialisation verbatim
    #[serde(default)]
    pub init_env: Option<String>,
    // listing used to check that the stage-out directory exists, null skips the check
    #[serde(default = "default_output_check")]
    pub output_check: Option<OutputCheck>,

    pub catalog: CatalogConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "name", content = "parameter", rename_all = "lowercase")]
pub enum CatalogConfig {
    Das {
        #[serde(default = "default_das_command")]
        command: String,
        #[serde(default = "default_query_limit")]
        limit: i64,
        // seconds
        #[serde(default = "default_query_timeout", alias = "query_timeout_secs")]
        timeout: u64,
    },
    Snapshot {
        path: PathBuf,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "name", content = "parameter", rename_all = "lowercase")]
pub enum SchedulerConfig {
    Condor {
        #[serde(default = "default_submit_command")]
        command: String,
        #[serde(default = "default_job_flavour")]
        job_flavour: String,
        #[serde(default = "default_batch_name")]
        batch_name: String,
        #[serde(default)]
        transfer_input_files: Vec<PathBuf>,
    },
    /// run every job one after the other on this machine
    Local {
        // seconds per job
        #[serde(default = "default_job_timeout")]
        timeout: u64,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    // command line the launch scripts start the worker with
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_producer")]
    pub producer: String,
    #[serde(default = "default_producer_cfg")]
    pub producer_cfg: String,
    #[serde(default = "default_stageout_command")]
    pub stageout_command: String,
    #[serde(default = "default_stageout_url")]
    pub stageout_url: String,
    // outputs at or below this size are not worth staging out
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            producer: default_producer(),
            producer_cfg: default_producer_cfg(),
            stageout_command: default_stageout_command(),
            stageout_url: default_stageout_url(),
            min_output_bytes: default_min_output_bytes(),
        }
    }
}

/// `<command> <root><parent of output_dir>` has to list the output directory
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputCheck {
    #[serde(default = "default_listing_command")]
    pub command: String,
    #[serde(default = "default_listing_root")]
    pub root: String,
    // seconds
    #[serde(default = "default_listing_timeout")]
    pub timeout: u64,
}

impl Default for OutputCheck {
    fn default() -> Self {
        Self {
            command: default_listing_command(),
            root: default_listing_root(),
            timeout: default_listing_timeout(),
        }
    }
}

impl OutputCheck {
    /// `Err` carries the reason the directory is considered missing
    pub fn verify(&self, shell: &Shell, output_dir: &str) -> Result<(), String> {
        let trimmed = output_dir.trim_end_matches('/');
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some((parent, name)) if !name.is_empty() => (parent, name),
            _ => return Err("path has no parent directory".to_owned()),
        };

        let command = format!("{} {}", self.command, quote(&format!("{}{parent}/", self.root)));
        debug!(command = %command, "Checking output directory");

        let output = shell
            .clone()
            .with_timeout(Duration::from_secs(self.timeout))
            .run(&command)
            .map_err(|error| error.to_string())?;
        if !output.success() {
            return Err(format!(
                "listing failed with status {:?}: {}",
                output.status,
                output.combined()
            ));
        }

        if output.stdout.lines().any(|line| line.trim() == name) {
            Ok(())
        } else {
            Err(format!("not listed in {}{parent}", self.root))
        }
    }
}

/// Command line level adjustments applied while resolving a configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub debug: bool,
    pub first_run: Option<RunNumber>,
    pub last_run: Option<RunNumber>,
    pub run_list: Option<PathBuf>,
    // configuration file the workers should load again
    pub config_path: Option<PathBuf>,
    // state directory handed down by the submitter to its workers
    pub state_dir: Option<PathBuf>,
}

/// Fully resolved, immutable configuration for a single bunch
#[derive(Debug, Clone)]
pub struct Configuration {
    pub bunch: Bunch,
    pub debug: bool,
    pub dataset_path: String,
    pub collection: String,
    pub output_dir: String,
    pub global_tag: String,
    pub first_run: RunNumber,
    // set when the lower bound came from the command line and must not be reseeded
    pub first_run_pinned: bool,
    pub last_run: RunNumber,
    pub run_list: Option<BTreeSet<RunNumber>>,
    pub n_files_per_job: NonZeroUsize,
    pub min_events: u64,
    pub max_events: Option<u64>,
    pub file_prefix: String,
    pub cmssw_dir: Option<PathBuf>,
    pub working_dir: PathBuf,
    pub submission_dir: PathBuf,
    pub state_dir: PathBuf,
    pub proxy_path: Option<PathBuf>,
    pub init_env: String,
    pub launcher: String,
    pub mail_address: Option<String>,
    pub catalog: CatalogConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            dataset_path: "/StreamExpress/Run2024*-SiStripCalMinBias__AAG__-Express-v*/ALCARECO"
                .to_owned(),
            output_dir: "/store/group/dpg_tracker_strip/comm_tracker/Strip/Calibration/calibrationtree/GR24__AAG__".to_owned(),
            collection: "ALCARECOSiStripCalMinBias__AAG__".to_owned(),
            global_tag: "141X_dataRun3_Express_v2".to_owned(),
            first_run: 0,
            last_run: default_last_run(),
            mail_address: None,
            n_files_per_job: default_files_per_job(),
            min_events: default_min_events(),
            max_events: None,
            file_prefix: default_file_prefix(),
            cmssw_dir: None,
            working_dir: None,
            state_dir: None,
            proxy_path: default_proxy_path(),
            init_env: None,
            output_check: default_output_check(),
            catalog: CatalogConfig::Das {
                command: default_das_command(),
                limit: default_query_limit(),
                timeout: default_query_timeout(),
            },
            scheduler: SchedulerConfig::Condor {
                command: default_submit_command(),
                job_flavour: default_job_flavour(),
                batch_name: default_batch_name(),
                transfer_input_files: vec![PathBuf::from(default_producer_cfg())],
            },
            worker: WorkerConfig::default(),
        }
    }
}

impl SubmitConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigErrors> {
        fs::write(path, serde_yaml::to_string(self)?)?;

        Ok(())
    }

    /// Resolve the templates for `bunch` and check everything that can be
    /// checked before talking to the catalog. All problems are reported at
    /// once instead of piece-by-piece to make debugging easier for users.
    pub fn resolve(&self, bunch: Bunch, overrides: &Overrides) -> Result<Configuration, ConfigErrors> {
        let mut problems = Vec::new();

        let dataset_path = bunch.resolve(Template::Dataset, &self.dataset_path);
        if let Err(reason) = validate_dataset_path(&dataset_path) {
            problems.push(ConfigProblem::DatasetPath {
                path: dataset_path.clone(),
                reason,
            });
        }

        let cmssw_dir = match self.cmssw_dir.as_ref().filter(|dir| dir.is_dir()) {
            Some(dir) => Some(dir.clone()),
            None => {
                debug!("CMSSW directory was not found, falling back to CMSSW_BASE");
                env::var_os("CMSSW_BASE").map(|base| PathBuf::from(base).join("src"))
            }
        };
        if cmssw_dir.is_none() && self.init_env.is_none() {
            problems.push(ConfigProblem::MissingEnvironmentRoot);
        }

        let current_dir = env::current_dir()?;
        let working_dir = match self.working_dir {
            Some(ref dir) => current_dir.join(dir),
            None => {
                debug!("Working directory not specified, using the current directory");
                current_dir.clone()
            }
        };
        if !working_dir.is_dir() {
            problems.push(ConfigProblem::WorkingDir(working_dir.clone()));
        }

        if self.global_tag.trim().is_empty() {
            problems.push(ConfigProblem::MissingGlobalTag);
        }

        let n_files_per_job = NonZeroUsize::new(self.n_files_per_job);
        if n_files_per_job.is_none() {
            problems.push(ConfigProblem::ZeroFilesPerJob);
        }

        let first_run = overrides.first_run.unwrap_or(self.first_run);
        let last_run = overrides.last_run.unwrap_or(self.last_run);
        if first_run > last_run {
            problems.push(ConfigProblem::InvalidRunRange {
                first: first_run,
                last: last_run,
            });
        }

        let run_list = match overrides.run_list {
            Some(ref path) => match read_run_list(path) {
                Ok(runs) if runs.is_empty() => {
                    problems.push(ConfigProblem::EmptyRunList(path.clone()));
                    None
                }
                Ok(runs) => Some(runs),
                Err(problem) => {
                    problems.push(problem);
                    None
                }
            },
            None => None,
        };

        let launcher = match self.worker.command {
            Some(ref command) => command.clone(),
            None => match worker_launcher(overrides.config_path.as_deref()) {
                Ok(launcher) => launcher,
                Err(problem) => {
                    problems.push(problem);
                    String::new()
                }
            },
        };

        let init_env = match self.init_env {
            Some(ref init_env) => init_env.clone(),
            None => environment_command(cmssw_dir.as_deref(), self.proxy_path.as_deref()),
        };

        if let Some(ref check) = self.output_check {
            let output_dir = bunch.resolve(Template::OutputDir, &self.output_dir);
            if let Err(reason) = check.verify(&Shell::new(init_env.clone()), &output_dir) {
                problems.push(ConfigProblem::OutputDir {
                    path: output_dir,
                    reason,
                });
            }
        }

        if !problems.is_empty() {
            for problem in problems.iter() {
                error!("CONFIG WARNING: {problem}");
            }

            return Err(ConfigErrors::Invalid(problems));
        }

        let submission_dir =
            working_dir.join(bunch.resolve(Template::SubmissionDir, "condor_submission__AAG__"));
        // absolute, the workers resolve it again on the execution node
        let state_dir = match overrides.state_dir.as_ref().or(self.state_dir.as_ref()) {
            Some(dir) => current_dir.join(dir),
            None => working_dir.clone(),
        };

        Ok(Configuration {
            bunch,
            debug: overrides.debug,
            dataset_path,
            collection: bunch.resolve(Template::Collection, &self.collection),
            output_dir: bunch.resolve(Template::OutputDir, &self.output_dir),
            global_tag: self.global_tag.clone(),
            first_run,
            first_run_pinned: overrides.first_run.is_some(),
            last_run,
            run_list,
            // checked above, problems would have returned early
            n_files_per_job: n_files_per_job.unwrap_or(NonZeroUsize::MIN),
            min_events: self.min_events,
            max_events: self.max_events,
            file_prefix: self.file_prefix.clone(),
            cmssw_dir,
            working_dir,
            submission_dir,
            state_dir,
            proxy_path: self.proxy_path.clone(),
            init_env,
            launcher,
            mail_address: self.mail_address.clone().filter(|address| !address.is_empty()),
            catalog: self.catalog.clone(),
            scheduler: self.scheduler.clone(),
            worker: self.worker.clone(),
        })
    }
}

impl Configuration {
    pub fn shell(&self) -> Shell {
        Shell::new(self.init_env.clone())
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    First run       = {}", self.first_run)?;
        writeln!(f, "    Last run        = {}", self.last_run)?;
        if let Some(ref runs) = self.run_list {
            writeln!(f, "    Run list        = {} run(s)", runs.len())?;
        }
        writeln!(f, "    Bunch           = {}", self.bunch)?;
        writeln!(f, "    Dataset         = {}", self.dataset_path)?;
        writeln!(f, "    Collection      = {}", self.collection)?;
        writeln!(f, "    Global tag      = {}", self.global_tag)?;
        writeln!(
            f,
            "    Proxy file path = {}",
            self.proxy_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default()
        )?;
        writeln!(
            f,
            "    CMSSW           = {}",
            self.cmssw_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default()
        )?;
        writeln!(f, "    Output dir      = {}", self.output_dir)?;
        writeln!(f, "    Working dir     = {}", self.working_dir.display())?;
        writeln!(f, "    Files per job   = {}", self.n_files_per_job)?;
        write!(f, "    Debug mode      = {}", self.debug)
    }
}

/// Read a run list: one run per line, blank lines are ignored and anything
/// else is rejected
pub fn read_run_list(path: &Path) -> Result<BTreeSet<RunNumber>, ConfigProblem> {
    let content = fs::read_to_string(path).map_err(|error| ConfigProblem::UnreadableRunList {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;

    parse_run_list(&content).map_err(|(line, content)| ConfigProblem::MalformedRunList {
        path: path.to_path_buf(),
        line,
        content,
    })
}

/// on error returns the (1-based) line number and its content
pub fn parse_run_list(content: &str) -> Result<BTreeSet<RunNumber>, (usize, String)> {
    let mut runs = BTreeSet::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.parse::<RunNumber>() {
            Ok(run) if line.bytes().all(|b| b.is_ascii_digit()) => {
                runs.insert(run);
            }
            _ => return Err((number + 1, line.to_owned())),
        }
    }

    Ok(runs)
}

/// Shell prefix that brings a CMSSW runtime environment and grid proxy into scope
pub fn environment_command(cmssw_dir: Option<&Path>, proxy_path: Option<&Path>) -> String {
    let mut command = String::new();

    if let Some(dir) = cmssw_dir {
        command.push_str(&format!("cd {};", quote(&dir.to_string_lossy())));
        command.push_str("eval `scram runtime -sh`;");
    }
    if let Some(proxy) = proxy_path {
        command.push_str(&format!(
            "export X509_USER_PROXY={};",
            quote(&proxy.to_string_lossy())
        ));
    }
    if cmssw_dir.is_some() {
        command.push_str("cd - >/dev/null;");
    }

    command
}

fn worker_launcher(config_path: Option<&Path>) -> Result<String, ConfigProblem> {
    let executable =
        env::current_exe().map_err(|error| ConfigProblem::Launcher(error.to_string()))?;
    let mut launcher = quote(&executable.to_string_lossy());

    if let Some(path) = config_path {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        launcher.push_str(&format!(" --config {}", quote(&path.to_string_lossy())));
    }

    Ok(launcher)
}

fn default_last_run() -> RunNumber {
    999999
}

fn default_files_per_job() -> usize {
    25
}

fn default_min_events() -> u64 {
    250
}

fn default_file_prefix() -> String {
    "/store".to_owned()
}

fn default_proxy_path() -> Option<PathBuf> {
    DEFAULT_PROXY_PATH.clone()
}

fn default_das_command() -> String {
    "dasgoclient".to_owned()
}

fn default_query_limit() -> i64 {
    9999
}

fn default_query_timeout() -> u64 {
    600
}

fn default_submit_command() -> String {
    "condor_submit".to_owned()
}

fn default_job_flavour() -> String {
    "workday".to_owned()
}

fn default_batch_name() -> String {
    "CalibTrees__AAG__".to_owned()
}

fn default_job_timeout() -> u64 {
    // one HTCondor "workday"
    8 * 60 * 60
}

fn default_output_check() -> Option<OutputCheck> {
    Some(OutputCheck::default())
}

fn default_listing_command() -> String {
    "eos ls".to_owned()
}

fn default_listing_root() -> String {
    "/eos/cms".to_owned()
}

fn default_listing_timeout() -> u64 {
    60
}

fn default_producer() -> String {
    "cmsRun".to_owned()
}

fn default_producer_cfg() -> String {
    "produceCalibrationTree_template_cfg.py".to_owned()
}

fn default_stageout_command() -> String {
    "eos cp".to_owned()
}

fn default_stageout_url() -> String {
    "root://eoscms.cern.ch//eos/cms".to_owned()
}

fn default_min_output_bytes() -> u64 {
    10_000
}
