pub mod campaign;
pub mod config;
pub mod pipeline;

use calib_submit::config::ConfigErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GainsError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Campaign(#[from] campaign::CampaignError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
    #[error("Failed to determine the launcher: {0}")]
    Launcher(#[from] std::io::Error),
}
