use crate::config::GainsConfig;
use calib_submit::{
    bunch::Bunch,
    catalog::{CatalogError, Catalogs},
    scheduler::{SchedulerError, Schedulers},
    selector::{select_runs, AcceptedRun, LowStatisticsPolicy, RunFilter, SelectionCriteria},
    shell::{quote, Shell},
    submission::{Descriptor, LaunchScript, SubmissionError},
    RunNumber,
};
use std::{
    collections::BTreeSet,
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

pub const FILE_LIST_NAME: &str = "FileList_cfg.py";
pub const CONDOR_DIR_NAME: &str = "condor_submission";

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("No run between {first} and {last} passed the selection")]
    NoRuns { first: RunNumber, last: RunNumber },
    #[error("Low statistics: {total} events, at least {floor} are needed")]
    LowStatistics { total: u64, floor: u64 },
    #[error("Failed to prepare the campaign directory: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub first_run: RunNumber,
    pub last_run: RunNumber,
    pub bunch: Bunch,
    pub policy: LowStatisticsPolicy,
    // command line of this binary, used in the launch script
    pub launcher: String,
    pub submit: bool,
}

/// A prepared gain campaign
#[derive(Debug, Clone)]
pub struct Campaign {
    pub tag: String,
    pub work_dir: PathBuf,
    pub first_run: RunNumber,
    pub last_run: RunNumber,
    pub total_events: u64,
    pub runs: Vec<AcceptedRun>,
    pub descriptor: PathBuf,
    pub submitted: bool,
}

/// Values the configuration templates carry placeholders for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub first_run: RunNumber,
    pub last_run: RunNumber,
    pub global_tag: String,
    pub mode: String,
    pub dqm_dir: String,
}

impl Placeholders {
    fn pairs(&self) -> [(&'static str, String); 6] {
        [
            ("XXX_FIRSTRUN_XXX", self.first_run.to_string()),
            ("XXX_LASTRUN_XXX", self.last_run.to_string()),
            ("XXX_GT_XXX", self.global_tag.clone()),
            // only the prompt calibration output is supported as input
            ("XXX_PCL_XXX", "True".to_owned()),
            ("XXX_CALMODE_XXX", self.mode.clone()),
            ("XXX_DQMDIR_XXX", self.dqm_dir.clone()),
        ]
    }

    pub fn substitute(&self, content: &str) -> String {
        self.pairs()
            .iter()
            .fold(content.to_owned(), |content, (placeholder, value)| {
                content.replace(placeholder, value)
            })
    }
}

pub fn tag(first_run: RunNumber, last_run: RunNumber, bunch: Bunch) -> String {
    format!("Run_{first_run}_{last_run}_{}_PCL", bunch.mode())
}

/// event count in thousands, right aligned the way the file list always had it
pub fn kilo_events(events: u64) -> String {
    format!("{:>8}K", format!("{:?}", events as f64 / 1000.0))
}

pub fn render_file_list(runs: &[(AcceptedRun, Vec<String>)], total_events: u64) -> String {
    let mut content = String::from(
        "import FWCore.ParameterSet.Config as cms\ncalibTreeList = cms.untracked.vstring()\n",
    );
    content.push_str(&format!(
        "#Total number of events considered is: {total_events}\n"
    ));

    for (run, _) in runs {
        content.push_str(&format!(
            "# run = {} --> n_events = {}\n",
            run.run,
            kilo_events(run.events)
        ));
    }
    for file in runs.iter().flat_map(|(_, files)| files) {
        content.push_str(&format!("calibTreeList.extend(['{file}'])\n"));
    }

    content
}

fn copy_templates(template_dir: &Path, work_dir: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in fs::read_dir(template_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), work_dir.join(entry.file_name()))?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn substitute_templates(work_dir: &Path, placeholders: &Placeholders) -> io::Result<()> {
    for entry in fs::read_dir(work_dir)? {
        let path = entry?.path();
        let is_template = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with("_cfg.py"));

        if is_template && path.is_file() {
            let content = fs::read_to_string(&path)?;
            fs::write(&path, placeholders.substitute(&content))?;
            debug!(path = %path.display(), "Filled in placeholders");
        }
    }

    Ok(())
}

/// Select the runs of a gain campaign, lay out its working directory and
/// optionally hand the pipeline job to the scheduler. `input`/`output` are
/// used when the low statistics policy asks the operator.
#[tracing::instrument(level = "info", skip(config, input, output))]
pub fn prepare<R: BufRead, W: Write>(
    config: &GainsConfig,
    request: &CampaignRequest,
    input: &mut R,
    output: &mut W,
) -> Result<Campaign, CampaignError> {
    let bunch = request.bunch;
    let catalog = Catalogs::load(
        &config.catalog,
        Shell::new(config.environment(&config.template_dir)),
    )?;

    let criteria = SelectionCriteria {
        filter: RunFilter::Range {
            first: request.first_run,
            last: request.last_run,
        },
        relaunch: BTreeSet::new(),
        min_events: config.min_events,
        max_events: config.max_events,
    };
    let selection = select_runs(&catalog, &config.dataset(bunch), &criteria)?;

    let (Some(first_run), Some(last_run)) = (selection.first_run(), selection.last_run()) else {
        return Err(CampaignError::NoRuns {
            first: request.first_run,
            last: request.last_run,
        });
    };
    info!(
        "Run range: [{first_run}, {last_run}] --> {} events",
        kilo_events(selection.total_events)
    );

    if !request
        .policy
        .confirm(selection.total_events, config.min_total_events, input, output)?
    {
        return Err(CampaignError::LowStatistics {
            total: selection.total_events,
            floor: config.min_total_events,
        });
    }

    let mut runs = Vec::with_capacity(selection.runs.len());
    for accepted in selection.runs.iter() {
        let files = catalog.list_files(&accepted.dataset, accepted.run)?;
        runs.push((accepted.clone(), files));
    }

    let tag = tag(first_run, last_run, bunch);
    let work_dir = config.data_root.join(format!("Data_{tag}"));
    fs::create_dir_all(&work_dir)?;
    let work_dir = fs::canonicalize(&work_dir)?;
    info!(dir = %work_dir.display(), "Preparing campaign directory");

    let copied = copy_templates(&config.template_dir, &work_dir)?;
    debug!(copied = copied, "Copied templates");

    fs::write(
        work_dir.join(FILE_LIST_NAME),
        render_file_list(&runs, selection.total_events),
    )?;
    substitute_templates(
        &work_dir,
        &Placeholders {
            first_run,
            last_run,
            global_tag: config.global_tag.clone(),
            mode: bunch.mode().to_owned(),
            dqm_dir: config.dqm_dir(bunch),
        },
    )?;

    let condor_dir = work_dir.join(CONDOR_DIR_NAME);
    fs::create_dir_all(&condor_dir)?;

    let work_dir_arg = quote(&work_dir.to_string_lossy());
    LaunchScript {
        init_env: format!("{}cd {work_dir_arg};", config.environment(&config.template_dir)),
        command: format!(
            "{} run --first-run {first_run} --last-run {last_run} --mode {} --work-dir {work_dir_arg}",
            request.launcher,
            bunch.arg()
        ),
    }
    .write(&condor_dir)?;

    let scheduler = Schedulers::load(&config.scheduler, &work_dir, Shell::default());
    let descriptor = Descriptor::single(&condor_dir, scheduler.descriptor_options()).write()?;

    let submitted = if request.submit {
        scheduler.submit(&descriptor, bunch)?;
        true
    } else {
        info!(
            "The job has not been submitted, submit it with: {}",
            scheduler.submit_command(&descriptor, bunch)
        );
        false
    };

    Ok(Campaign {
        tag,
        work_dir,
        first_run,
        last_run,
        total_events: selection.total_events,
        runs: selection.runs,
        descriptor,
        submitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(run: RunNumber, events: u64) -> AcceptedRun {
        AcceptedRun {
            dataset: "/A/B/C".to_owned(),
            run,
            events,
        }
    }

    #[test]
    fn campaign_tag() {
        assert_eq!(tag(378236, 378240, Bunch::Alternate), "Run_378236_378240_AagBunch_PCL");
    }

    #[test]
    fn kilo_event_format() {
        assert_eq!(kilo_events(5000), "     5.0K");
        assert_eq!(kilo_events(12345), "  12.345K");
        assert_eq!(kilo_events(2_500_000), "  2500.0K");
    }

    #[test]
    fn file_list() {
        let runs = vec![
            (accepted(378236, 5000), vec!["/store/a.root".to_owned(), "/store/b.root".to_owned()]),
            (accepted(378240, 12345), vec!["/store/c.root".to_owned()]),
        ];

        assert_eq!(
            render_file_list(&runs, 17345),
            "import FWCore.ParameterSet.Config as cms
calibTreeList = cms.untracked.vstring()
#Total number of events considered is: 17345
# run = 378236 --> n_events =      5.0K
# run = 378240 --> n_events =   12.345K
calibTreeList.extend(['/store/a.root'])
calibTreeList.extend(['/store/b.root'])
calibTreeList.extend(['/store/c.root'])
"
        );
    }

    #[test]
    fn placeholders() {
        let placeholders = Placeholders {
            first_run: 378236,
            last_run: 378240,
            global_tag: "GT".to_owned(),
            mode: "StdBunch".to_owned(),
            dqm_dir: "AlCaReco/SiStripGains".to_owned(),
        };

        assert_eq!(
            placeholders.substitute(
                "runs = (XXX_FIRSTRUN_XXX, XXX_LASTRUN_XXX)\ngt = 'XXX_GT_XXX'\npcl = XXX_PCL_XXX\nmode = 'XXX_CALMODE_XXX'\ndqm = 'XXX_DQMDIR_XXX'\nfirst again XXX_FIRSTRUN_XXX\n"
            ),
            "runs = (378236, 378240)\ngt = 'GT'\npcl = True\nmode = 'StdBunch'\ndqm = 'AlCaReco/SiStripGains'\nfirst again 378236\n"
        );
    }
}
