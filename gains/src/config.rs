use calib_submit::{
    bunch::{Bunch, Template},
    config::{CatalogConfig, ConfigErrors, SchedulerConfig},
    shell::quote,
};
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct GainsConfig {
    // dataset pattern of the prompt calibration output, may carry the bunch placeholder
    pub pcl_dataset: String,
    pub global_tag: String,

    #[serde(default = "default_min_events")]
    pub min_events: u64,
    #[serde(default = "default_max_events")]
    pub max_events: Option<u64>,
    // total below which a campaign is considered low statistics
    #[serde(default = "default_min_total_events")]
    pub min_total_events: u64,

    #[serde(default = "default_dqm_dir")]
    pub dqm_dir: String,

    // directory holding the configuration templates and macros
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    // campaign directories are created below this one
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    // replaces the generated environment initialisation verbatim
    #[serde(default)]
    pub init_env: Option<String>,
    // command line the launch script starts `run` with
    #[serde(default)]
    pub launcher: Option<String>,

    pub catalog: CatalogConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub stages: StageConfig,
}

/// Commands of the three pipeline stages
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[serde(default = "default_compute")]
    pub compute: String,
    #[serde(default = "default_post_process")]
    pub post_process: String,
    // gets the mode and the plot label appended
    #[serde(default = "default_plots")]
    pub plots: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            compute: default_compute(),
            post_process: default_post_process(),
            plots: default_plots(),
        }
    }
}

impl Default for GainsConfig {
    fn default() -> Self {
        Self {
            pcl_dataset:
                "/StreamExpress/Run2024*-PromptCalibProdSiStripGains__AAG__-Express-v*/ALCAPROMPT"
                    .to_owned(),
            global_tag: "141X_dataRun3_Express_v2".to_owned(),
            min_events: default_min_events(),
            max_events: default_max_events(),
            min_total_events: default_min_total_events(),
            dqm_dir: default_dqm_dir(),
            template_dir: default_template_dir(),
            data_root: default_data_root(),
            init_env: None,
            launcher: None,
            catalog: CatalogConfig::Das {
                command: "dasgoclient".to_owned(),
                limit: 9999,
                timeout: 600,
            },
            scheduler: SchedulerConfig::Condor {
                command: "condor_submit".to_owned(),
                job_flavour: "workday".to_owned(),
                batch_name: "GainCalibration__AAG__".to_owned(),
                transfer_input_files: Vec::new(),
            },
            stages: StageConfig::default(),
        }
    }
}

impl GainsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigErrors> {
        fs::write(path, serde_yaml::to_string(self)?)?;

        Ok(())
    }

    pub fn dataset(&self, bunch: Bunch) -> String {
        bunch.resolve(Template::Dataset, &self.pcl_dataset)
    }

    pub fn dqm_dir(&self, bunch: Bunch) -> String {
        bunch.resolve(Template::DqmDir, &self.dqm_dir)
    }

    /// Environment initialisation for commands run from `dir`
    pub fn environment(&self, dir: &Path) -> String {
        match self.init_env {
            Some(ref init_env) => init_env.clone(),
            None => format!(
                "cd {};source /cvmfs/cms.cern.ch/cmsset_default.sh;cmsenv;",
                quote(&dir.to_string_lossy())
            ),
        }
    }

    /// Command line that starts this binary again with the same configuration
    pub fn launcher(&self, config_path: &Path) -> io::Result<String> {
        if let Some(ref launcher) = self.launcher {
            return Ok(launcher.clone());
        }

        let executable = env::current_exe()?;
        let config_path = fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());

        Ok(format!(
            "{} --config {}",
            quote(&executable.to_string_lossy()),
            quote(&config_path.to_string_lossy())
        ))
    }
}

fn default_min_events() -> u64 {
    3000
}

fn default_max_events() -> Option<u64> {
    Some(3_000_000)
}

fn default_min_total_events() -> u64 {
    2_000_000
}

fn default_dqm_dir() -> String {
    "AlCaReco/SiStripGains__AAG__".to_owned()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_data_root() -> PathBuf {
    PathBuf::from("..")
}

fn default_compute() -> String {
    "cmsRun Gains_Compute_cfg.py".to_owned()
}

fn default_post_process() -> String {
    "root -l -b -q KeepOnlyGain.C+".to_owned()
}

fn default_plots() -> String {
    "sh PlotMacro.sh".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bunch_dependent_values() {
        let config = GainsConfig::default();

        assert_eq!(
            config.dataset(Bunch::Alternate),
            "/StreamExpress/Run2024*-PromptCalibProdSiStripGainsAAG-Express-v*/ALCAPROMPT"
        );
        assert_eq!(config.dqm_dir(Bunch::Standard), "AlCaReco/SiStripGains");
        assert_eq!(config.dqm_dir(Bunch::Alternate), "AlCaReco/SiStripGainsAAG");
    }

    #[test]
    fn environment_prefix() {
        let mut config = GainsConfig::default();

        assert_eq!(
            config.environment(Path::new("/data/Data_Run_1_2_StdBunch_PCL")),
            "cd /data/Data_Run_1_2_StdBunch_PCL;source /cvmfs/cms.cern.ch/cmsset_default.sh;cmsenv;"
        );

        config.init_env = Some(String::new());
        assert_eq!(config.environment(Path::new("/data")), "");
    }

    #[test]
    fn minimal_yaml() {
        let config: GainsConfig = serde_yaml::from_str(
            "pcl_dataset: /A/B/C\nglobal_tag: GT\ncatalog:\n  name: snapshot\n  parameter:\n    path: runs.yml\nscheduler:\n  name: local\n  parameter: {}\n",
        )
        .unwrap();

        assert_eq!(config.min_events, 3000);
        assert_eq!(config.max_events, Some(3_000_000));
        assert_eq!(config.min_total_events, 2_000_000);
        assert_eq!(config.stages, StageConfig::default());
    }

    #[test]
    fn template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib-gains.yml");

        GainsConfig::default().save(&path).unwrap();

        assert_eq!(
            GainsConfig::load(&path).unwrap().scheduler,
            GainsConfig::default().scheduler
        );
    }
}
