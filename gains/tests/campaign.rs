use calib_gains::{
    campaign::{prepare, CampaignError, CampaignRequest, CONDOR_DIR_NAME, FILE_LIST_NAME},
    config::GainsConfig,
};
use calib_submit::{
    bunch::Bunch,
    config::{CatalogConfig, SchedulerConfig},
    selector::LowStatisticsPolicy,
    submission::{DESCRIPTOR_NAME, LAUNCH_SCRIPT_NAME},
};
use std::{fs, io, path::Path};

const SNAPSHOT: &str = r#"
datasets:
  /StreamExpress/Run2024B-PromptCalibProdSiStripGains-Express-v1/ALCAPROMPT:
    runs:
      111111:
        events: 5000
        files: [/store/express/a.root, /store/express/b.root]
      111112:
        events: 100
        files: [/store/express/c.root]
      111113:
        events: 4000000
        files: [/store/express/d.root]
      111120:
        events: 9000
        files: [/store/express/e.root]
"#;

const COMPUTE_TEMPLATE: &str = "\
process.GlobalTag.globaltag = 'XXX_GT_XXX'
firstRun = XXX_FIRSTRUN_XXX
lastRun = XXX_LASTRUN_XXX
usePCL = XXX_PCL_XXX
calMode = 'XXX_CALMODE_XXX'
dqmDir = 'XXX_DQMDIR_XXX'
";

fn setup(dir: &Path, scheduler: SchedulerConfig) -> GainsConfig {
    fs::write(dir.join("snapshot.yml"), SNAPSHOT).unwrap();

    let templates = dir.join("RunGainCalibration");
    fs::create_dir_all(templates.join("nested")).unwrap();
    fs::write(templates.join("Gains_Compute_cfg.py"), COMPUTE_TEMPLATE).unwrap();
    fs::write(templates.join("KeepOnlyGain.C"), "// XXX_GT_XXX stays\n").unwrap();

    fs::create_dir_all(dir.join("data")).unwrap();

    GainsConfig {
        template_dir: templates,
        data_root: dir.join("data"),
        init_env: Some(String::new()),
        min_total_events: 1000,
        catalog: CatalogConfig::Snapshot {
            path: dir.join("snapshot.yml"),
        },
        scheduler,
        ..GainsConfig::default()
    }
}

fn condor() -> SchedulerConfig {
    SchedulerConfig::Condor {
        command: "false".to_owned(),
        job_flavour: "workday".to_owned(),
        batch_name: "GainCalibration__AAG__".to_owned(),
        transfer_input_files: Vec::new(),
    }
}

fn request(first_run: u32, last_run: u32) -> CampaignRequest {
    CampaignRequest {
        first_run,
        last_run,
        bunch: Bunch::Standard,
        policy: LowStatisticsPolicy::Abort,
        launcher: "calib-gains --config gains.yml".to_owned(),
        submit: false,
    }
}

#[test]
fn prepares_campaign_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), condor());

    let campaign = prepare(
        &config,
        &request(111111, 111119),
        &mut io::empty(),
        &mut io::sink(),
    )
    .unwrap();

    assert_eq!(campaign.tag, "Run_111111_111111_StdBunch_PCL");
    assert_eq!(campaign.total_events, 5000);
    assert!(!campaign.submitted);

    let work_dir = dir
        .path()
        .join("data/Data_Run_111111_111111_StdBunch_PCL")
        .canonicalize()
        .unwrap();
    assert_eq!(campaign.work_dir, work_dir);

    assert_eq!(
        fs::read_to_string(work_dir.join(FILE_LIST_NAME)).unwrap(),
        "import FWCore.ParameterSet.Config as cms
calibTreeList = cms.untracked.vstring()
#Total number of events considered is: 5000
# run = 111111 --> n_events =      5.0K
calibTreeList.extend(['/store/express/a.root'])
calibTreeList.extend(['/store/express/b.root'])
"
    );
    assert_eq!(
        fs::read_to_string(work_dir.join("Gains_Compute_cfg.py")).unwrap(),
        "process.GlobalTag.globaltag = '141X_dataRun3_Express_v2'
firstRun = 111111
lastRun = 111111
usePCL = True
calMode = 'StdBunch'
dqmDir = 'AlCaReco/SiStripGains'
"
    );
    assert_eq!(
        fs::read_to_string(work_dir.join("KeepOnlyGain.C")).unwrap(),
        "// XXX_GT_XXX stays\n"
    );
    assert!(!work_dir.join("nested").exists());

    let condor_dir = work_dir.join(CONDOR_DIR_NAME);
    let launch = fs::read_to_string(condor_dir.join(LAUNCH_SCRIPT_NAME)).unwrap();
    assert!(launch.ends_with(&format!(
        "calib-gains --config gains.yml run --first-run 111111 --last-run 111111 --mode std --work-dir {}\n",
        work_dir.display()
    )));

    let descriptor = fs::read_to_string(condor_dir.join(DESCRIPTOR_NAME)).unwrap();
    assert!(descriptor.contains(&format!(
        "Executable = {}/launch.sh\n",
        condor_dir.display()
    )));
    assert!(descriptor.ends_with("\nqueue\n"));
}

#[test]
fn no_runs_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), condor());

    assert!(matches!(
        prepare(&config, &request(200000, 200001), &mut io::empty(), &mut io::sink()),
        Err(CampaignError::NoRuns {
            first: 200000,
            last: 200001
        })
    ));
}

#[test]
fn low_statistics_policy() {
    let dir = tempfile::tempdir().unwrap();
    let config = GainsConfig {
        min_total_events: 2_000_000,
        ..setup(dir.path(), condor())
    };

    assert!(matches!(
        prepare(&config, &request(111111, 111120), &mut io::empty(), &mut io::sink()),
        Err(CampaignError::LowStatistics {
            total: 14000,
            floor: 2_000_000
        })
    ));
    assert!(!dir.path().join("data/Data_Run_111111_111120_StdBunch_PCL").exists());

    let campaign = prepare(
        &config,
        &CampaignRequest {
            policy: LowStatisticsPolicy::Prompt,
            ..request(111111, 111120)
        },
        &mut "y\n".as_bytes(),
        &mut io::sink(),
    )
    .unwrap();
    assert_eq!(campaign.tag, "Run_111111_111120_StdBunch_PCL");
}

#[test]
fn submits_to_local_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), SchedulerConfig::Local { timeout: 30 });

    let campaign = prepare(
        &config,
        &CampaignRequest {
            launcher: "echo".to_owned(),
            submit: true,
            ..request(111111, 111119)
        },
        &mut io::empty(),
        &mut io::sink(),
    )
    .unwrap();

    assert!(campaign.submitted);
    let output = fs::read_to_string(campaign.work_dir.join(CONDOR_DIR_NAME).join("job.out")).unwrap();
    assert!(output.starts_with("run --first-run 111111 --last-run 111111 --mode std --work-dir "));
}

#[test]
fn rejected_submission() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), condor());

    let result = prepare(
        &config,
        &CampaignRequest {
            submit: true,
            ..request(111111, 111119)
        },
        &mut io::empty(),
        &mut io::sink(),
    );

    assert!(matches!(result, Err(CampaignError::Scheduler(_))));
}
