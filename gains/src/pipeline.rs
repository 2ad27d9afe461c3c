use crate::config::{GainsConfig, StageConfig};
use calib_submit::{
    bunch::Bunch,
    shell::{quote, Shell, ShellError},
    RunNumber,
};
use std::{fmt, path::Path};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to run pipeline stage: {0}")]
    Shell(#[from] ShellError),
    #[error("{stage} failed with status {status:?}")]
    StageFailed { stage: Stage, status: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compute,
    PostProcess,
    Plots,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Compute, Stage::PostProcess, Stage::Plots];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compute => "Gain calibration",
            Self::PostProcess => "ROOT macro",
            Self::Plots => "Plotting script",
        })
    }
}

pub fn stage_command(
    stage: Stage,
    stages: &StageConfig,
    first_run: RunNumber,
    last_run: RunNumber,
    bunch: Bunch,
) -> String {
    match stage {
        Stage::Compute => stages.compute.clone(),
        Stage::PostProcess => stages.post_process.clone(),
        Stage::Plots => format!(
            "{} {} {}",
            stages.plots,
            quote(&format!("\"{}\"", bunch.mode())),
            quote(&format!(
                "\"CMS Preliminary  -  Run {first_run} to {last_run}\""
            ))
        ),
    }
}

/// Compute the gains, post-process them and plot the result inside
/// `work_dir`. The first failing stage ends the pipeline.
#[tracing::instrument(level = "info", skip(config))]
pub fn run_pipeline(
    config: &GainsConfig,
    first_run: RunNumber,
    last_run: RunNumber,
    bunch: Bunch,
    work_dir: &Path,
) -> Result<(), PipelineError> {
    let shell = Shell::new(config.environment(work_dir)).in_dir(work_dir);

    for stage in Stage::ALL {
        let command = stage_command(stage, &config.stages, first_run, last_run, bunch);
        info!(stage = %stage, command = %command, "Running stage");

        let output = shell.run(&command)?;
        debug!(stage = %stage, output = %output.combined(), "Stage output");

        if !output.success() {
            error!(stage = %stage, status = ?output.status, output = %output.combined(), "Stage failed");
            return Err(PipelineError::StageFailed {
                stage,
                status: output.status,
            });
        }
    }

    info!("Job finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commands() {
        let stages = StageConfig::default();

        assert_eq!(
            stage_command(Stage::Compute, &stages, 1, 2, Bunch::Standard),
            "cmsRun Gains_Compute_cfg.py"
        );
        assert_eq!(
            stage_command(Stage::PostProcess, &stages, 1, 2, Bunch::Standard),
            "root -l -b -q KeepOnlyGain.C+"
        );
        assert_eq!(
            stage_command(Stage::Plots, &stages, 378236, 378240, Bunch::Alternate),
            "sh PlotMacro.sh '\"AagBunch\"' '\"CMS Preliminary  -  Run 378236 to 378240\"'"
        );
    }
}
