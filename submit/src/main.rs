use calib_submit::{
    bunch::Bunch,
    config::{ConfigErrors, Overrides, SubmitConfig},
    logging,
    notify::{Notifier, Report},
    submitter::submit_bunch,
    worker::{run_worker, WorkerJob, WorkerOutcome},
    RunNumber, SubmitError,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};
use tracing::{error, info, warn};

/// Submit calibration tree production jobs for new runs
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a configuration file (YAML)
    #[arg(short, long, global = true, default_value = "calib-submit.yml")]
    config: PathBuf,

    /// Prepare everything but do not hand the jobs to the scheduler
    #[arg(short, long)]
    dry_run: bool,

    /// Debug mode: more output, state files are left untouched
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long)]
    skip_standard: bool,

    #[arg(long)]
    skip_alternate: bool,

    /// Only process the runs listed in this file, one per line
    #[arg(long)]
    run_list: Option<PathBuf>,

    #[arg(long)]
    first_run: Option<RunNumber>,

    #[arg(long)]
    last_run: Option<RunNumber>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new template config file
    New,
    /// Produce the calibration tree of one job batch, run from the launch scripts
    Worker {
        #[arg(short, long)]
        run: RunNumber,
        /// comma separated list of input files
        #[arg(short, long, default_value = "")]
        files: String,
        #[arg(short = 'n', long)]
        batch: usize,
        /// directory holding the failed run file of the submitter
        #[arg(short, long)]
        state_dir: Option<PathBuf>,
        #[arg(short, long)]
        alternate: bool,
    },
}

fn main() -> Result<(), SubmitError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Some(Commands::New) => {
            info!(path = %cli.config.display(), "Writing template configuration");
            SubmitConfig::default().save(&cli.config)?;
            Ok(())
        }
        Some(Commands::Worker {
            run,
            ref files,
            batch,
            ref state_dir,
            alternate,
        }) => {
            let bunch = if alternate {
                Bunch::Alternate
            } else {
                Bunch::Standard
            };
            let config = SubmitConfig {
                // the submitter already listed the output directory
                output_check: None,
                ..SubmitConfig::load(&cli.config)?
            }
            .resolve(
                bunch,
                &Overrides {
                    debug: cli.verbose,
                    config_path: Some(cli.config.clone()),
                    state_dir: state_dir.clone(),
                    ..Overrides::default()
                },
            )?;

            let job = WorkerJob::new(run, files, batch);
            match run_worker(&config, &job, &env::current_dir().map_err(ConfigErrors::Io)?)? {
                WorkerOutcome::Failed { status } => {
                    warn!(run = run, status = ?status, "Run recorded for relaunch")
                }
                WorkerOutcome::MissingOutput => warn!(run = run, "Run recorded for relaunch"),
                outcome => info!(run = run, outcome = ?outcome, "Job done"),
            }
            Ok(())
        }
        None => submit(&cli),
    }
}

fn submit(cli: &Cli) -> Result<(), SubmitError> {
    let report_start = Local::now();
    let config = SubmitConfig::load(&cli.config)?;
    info!(path = %cli.config.display(), "Loaded configuration");

    let overrides = Overrides {
        debug: cli.verbose,
        first_run: cli.first_run,
        last_run: cli.last_run,
        run_list: cli.run_list.clone(),
        config_path: Some(cli.config.clone()),
        state_dir: None,
    };

    let mut report = Report::new(report_start);
    for bunch in Bunch::ALL {
        if (bunch == Bunch::Standard && cli.skip_standard)
            || (bunch == Bunch::Alternate && cli.skip_alternate)
        {
            info!(bunch = bunch.label(), "Skipping bunch");
            continue;
        }

        info!("===> PROCESSING {} BUNCH...", bunch.label());
        let resolved = match config.resolve(bunch, &overrides) {
            Ok(resolved) => resolved,
            Err(ConfigErrors::Invalid(problems)) => {
                error!(
                    bunch = bunch.label(),
                    problems = problems.len(),
                    "There were some problems with the configuration, skipping bunch"
                );
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        let outcome = submit_bunch(&resolved, cli.dry_run)?;
        info!(
            bunch = bunch.label(),
            runs = outcome.launched.len(),
            jobs = outcome.n_jobs,
            last_run = outcome.last_run,
            submitted = outcome.submitted,
            "Bunch done"
        );
        report.add(bunch, outcome.launched);
    }

    if !cli.dry_run {
        Notifier::new(config.mail_address.clone().filter(|address| !address.is_empty()))
            .send(&report);
    }

    Ok(())
}
