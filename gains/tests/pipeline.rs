use calib_gains::{
    config::{GainsConfig, StageConfig},
    pipeline::{run_pipeline, PipelineError, Stage},
};
use calib_submit::bunch::Bunch;
use std::fs;

fn config(stages: StageConfig) -> GainsConfig {
    GainsConfig {
        init_env: Some(String::new()),
        stages,
        ..GainsConfig::default()
    }
}

#[test]
fn runs_all_stages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("PlotMacro.sh"),
        "printf '%s|' \"$@\" >> stages.log\necho >> stages.log\n",
    )
    .unwrap();

    let config = config(StageConfig {
        compute: "echo compute >> stages.log".to_owned(),
        post_process: "echo post >> stages.log".to_owned(),
        plots: "sh PlotMacro.sh".to_owned(),
    });

    run_pipeline(&config, 378236, 378240, Bunch::Alternate, dir.path()).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("stages.log")).unwrap(),
        "compute\npost\n\"AagBunch\"|\"CMS Preliminary  -  Run 378236 to 378240\"|\n"
    );
}

#[test]
fn first_failure_stops_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();

    let config = config(StageConfig {
        compute: "echo compute >> stages.log".to_owned(),
        post_process: "exit 4".to_owned(),
        plots: "echo plots >> stages.log".to_owned(),
    });

    let result = run_pipeline(&config, 1, 2, Bunch::Standard, dir.path());

    assert!(matches!(
        result,
        Err(PipelineError::StageFailed {
            stage: Stage::PostProcess,
            status: Some(4)
        })
    ));
    assert_eq!(
        fs::read_to_string(dir.path().join("stages.log")).unwrap(),
        "compute\n"
    );
}
