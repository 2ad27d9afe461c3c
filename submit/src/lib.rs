pub mod bunch;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod notify;
pub mod partition;
pub mod scheduler;
pub mod selector;
pub mod shell;
pub mod state;
pub mod submission;
pub mod submitter;
pub mod worker;

use thiserror::Error;

pub type RunNumber = u32;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Config(#[from] config::ConfigErrors),
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogError),
    #[error(transparent)]
    State(#[from] state::StateError),
    #[error(transparent)]
    Submission(#[from] submission::SubmissionError),
    #[error(transparent)]
    Scheduler(#[from] scheduler::SchedulerError),
    #[error(transparent)]
    Shell(#[from] shell::ShellError),
    #[error(transparent)]
    Worker(#[from] worker::WorkerError),
}
