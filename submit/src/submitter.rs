use crate::{
    bunch::Bunch,
    catalog::Catalogs,
    config::Configuration,
    partition::{filter_files, partition_from},
    scheduler::Schedulers,
    selector::{select_runs, RunFilter, SelectionCriteria},
    state::StateFiles,
    submission::{LaunchedRun, SubmissionGenerator},
    RunNumber, SubmitError,
};
use std::{collections::BTreeMap, path::PathBuf};
use tracing::{info, warn};

/// Outcome of processing one bunch
#[derive(Debug, Clone)]
pub struct BunchReport {
    pub bunch: Bunch,
    pub launched: BTreeMap<RunNumber, LaunchedRun>,
    pub n_jobs: usize,
    pub last_run: RunNumber,
    pub descriptor: Option<PathBuf>,
    pub submitted: bool,
}

/// Lower bound of the run range: a command line value is kept, otherwise the
/// last processed run takes over from the configured value
pub fn seed_first_run(config: &Configuration, last_run: Option<RunNumber>) -> RunNumber {
    match last_run {
        Some(last_run) if !config.first_run_pinned => last_run,
        _ => config.first_run,
    }
}

pub fn criteria(
    config: &Configuration,
    first_run: RunNumber,
    relaunch: impl IntoIterator<Item = RunNumber>,
) -> SelectionCriteria {
    SelectionCriteria {
        filter: match config.run_list {
            Some(ref runs) => RunFilter::AllowList(runs.clone()),
            None => RunFilter::Range {
                first: first_run,
                last: config.last_run,
            },
        },
        relaunch: relaunch.into_iter().collect(),
        min_events: config.min_events,
        max_events: config.max_events,
    }
}

/// Select, lay out and submit the jobs of one bunch, then update its state files
#[tracing::instrument(level = "info", skip(config), fields(bunch = config.bunch.label()))]
pub fn submit_bunch(config: &Configuration, dry_run: bool) -> Result<BunchReport, SubmitError> {
    info!("Using the following configuration:\n{config}");

    let state = StateFiles::new(&config.state_dir, config.bunch);
    let run_state = state.read()?;

    let first_run = seed_first_run(config, run_state.last_run);
    if first_run > config.last_run && config.run_list.is_none() {
        warn!(first_run = first_run, last_run = config.last_run, "Run range is empty");
    }

    let catalog = Catalogs::load(&config.catalog, config.shell())?;
    let criteria = criteria(
        config,
        first_run,
        run_state.relaunch.iter().map(|entry| entry.run()),
    );
    let selection = select_runs(&catalog, &config.dataset_path, &criteria)?;

    let mut generator = SubmissionGenerator::new(
        &config.submission_dir,
        &config.init_env,
        &config.launcher,
        &config.state_dir,
        config.bunch,
    );
    generator.prepare()?;

    let mut last_processed = first_run;
    for accepted in selection.runs.iter() {
        let n_files = catalog.count_files(&accepted.dataset, accepted.run)?;
        if n_files == 0 {
            info!(run = accepted.run, events = accepted.events, "Skipping run: no files found");
            continue;
        }

        let files = catalog.list_files(&accepted.dataset, accepted.run)?;
        let listed = files.len();
        let files = filter_files(files, &config.file_prefix);
        let batches = partition_from(
            accepted.run,
            &files,
            config.n_files_per_job,
            generator.next_index(accepted.run),
        );

        info!(
            run = accepted.run,
            events = accepted.events,
            files = listed,
            "Run will be processed"
        );
        generator.add_run(accepted.run, listed, &batches)?;
        last_processed = last_processed.max(accepted.run);
    }

    let scheduler = Schedulers::load(&config.scheduler, &config.working_dir, config.shell());
    let submission = generator.finish(scheduler.descriptor_options())?;

    let mut submitted = false;
    if let Some(ref descriptor) = submission.descriptor {
        let command = scheduler.submit_command(descriptor, config.bunch);
        if dry_run {
            info!("Dry run, the jobs have not been submitted. Submit them with: {command}");
        } else {
            info!(command = %command, jobs = submission.n_jobs, "Submitting jobs");
            scheduler.submit(descriptor, config.bunch)?;
            submitted = true;
        }
    }

    // failed runs were relaunched above, only now they can be forgotten
    if !config.debug {
        state.clear_failed()?;
        state.write_last_run(last_processed)?;
    }

    Ok(BunchReport {
        bunch: config.bunch,
        launched: submission.launched,
        n_jobs: submission.n_jobs,
        last_run: last_processed,
        descriptor: submission.descriptor,
        submitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::CatalogError,
        config::{tests::offline_config, CatalogConfig, Overrides},
        state::RelaunchEntry,
    };
    use std::{collections::BTreeSet, fs};

    #[test]
    fn lower_bound_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path());

        let from_config = config.resolve(Bunch::Standard, &Overrides::default()).unwrap();
        let pinned = config
            .resolve(
                Bunch::Standard,
                &Overrides {
                    first_run: Some(378000),
                    ..Overrides::default()
                },
            )
            .unwrap();

        assert_eq!(seed_first_run(&from_config, None), 0);
        assert_eq!(seed_first_run(&from_config, Some(123456)), 123456);
        assert_eq!(seed_first_run(&pinned, Some(123456)), 378000);
    }

    #[test]
    fn relaunched_runs_are_wanted() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path())
            .resolve(Bunch::Standard, &Overrides::default())
            .unwrap();

        let criteria = criteria(&config, 378236, [378100]);

        assert_eq!(criteria.relaunch, BTreeSet::from([378100]));
        assert!(criteria.wants(378100));
        assert!(!criteria.wants(378101));
        assert!(criteria.wants(378236));
    }

    #[test]
    fn catalog_failure_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.catalog = CatalogConfig::Das {
            command: "false".to_owned(),
            limit: 9999,
            timeout: 30,
        };
        let config = config
            .resolve(Bunch::Standard, &Overrides::default())
            .unwrap();

        let state = StateFiles::new(dir.path(), Bunch::Standard);
        state.write_last_run(123456).unwrap();
        fs::write(state.failed_run_path(), "654321\n").unwrap();

        assert!(matches!(
            submit_bunch(&config, false),
            Err(SubmitError::Catalog(CatalogError::QueryFailed {
                status: Some(1),
                ..
            }))
        ));

        let run_state = state.read().unwrap();
        assert_eq!(run_state.relaunch, vec![RelaunchEntry::Run(654321)]);
        assert_eq!(run_state.last_run, Some(123456));
    }
}
