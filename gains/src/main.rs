use calib_gains::{
    campaign::{prepare, CampaignRequest},
    config::GainsConfig,
    pipeline::run_pipeline,
    GainsError,
};
use calib_submit::{bunch::Bunch, logging, selector::LowStatisticsPolicy, RunNumber};
use clap::{Parser, Subcommand};
use std::{io, path::PathBuf};
use tracing::info;

/// Prepare and run strip gain calibration campaigns
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a configuration file (YAML)
    #[arg(short, long, global = true, default_value = "calib-gains.yml")]
    config: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new template config file
    New,
    /// Select runs and lay out the campaign directory
    Prepare {
        #[arg(short, long)]
        first_run: RunNumber,
        #[arg(short, long)]
        last_run: RunNumber,
        #[arg(short, long, value_enum, default_value_t = Bunch::Alternate)]
        mode: Bunch,
        /// What to do when the selected runs hold too few events
        #[arg(long, value_enum, default_value_t = LowStatisticsPolicy::Abort)]
        low_statistics: LowStatisticsPolicy,
        /// Hand the pipeline job to the scheduler
        #[arg(short, long)]
        submit: bool,
    },
    /// Run the compute, post-processing and plotting stages
    Run {
        #[arg(short, long)]
        first_run: RunNumber,
        #[arg(short, long)]
        last_run: RunNumber,
        #[arg(short, long, value_enum, default_value_t = Bunch::Alternate)]
        mode: Bunch,
        #[arg(short, long)]
        work_dir: PathBuf,
    },
}

fn main() -> Result<(), GainsError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::New => {
            info!(path = %cli.config.display(), "Writing template configuration");
            GainsConfig::default().save(&cli.config)?;
        }
        Commands::Prepare {
            first_run,
            last_run,
            mode,
            low_statistics,
            submit,
        } => {
            let config = GainsConfig::load(&cli.config)?;
            let request = CampaignRequest {
                first_run,
                last_run,
                bunch: mode,
                policy: low_statistics,
                launcher: config.launcher(&cli.config)?,
                submit,
            };

            let campaign = prepare(
                &config,
                &request,
                &mut io::stdin().lock(),
                &mut io::stdout(),
            )?;
            info!(
                tag = %campaign.tag,
                dir = %campaign.work_dir.display(),
                runs = campaign.runs.len(),
                events = campaign.total_events,
                submitted = campaign.submitted,
                "Campaign prepared"
            );
        }
        Commands::Run {
            first_run,
            last_run,
            mode,
            ref work_dir,
        } => {
            let config = GainsConfig::load(&cli.config)?;
            run_pipeline(&config, first_run, last_run, mode, work_dir)?;
        }
    }

    Ok(())
}
