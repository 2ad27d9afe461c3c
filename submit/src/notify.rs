use crate::{
    bunch::Bunch,
    shell::{quote, Shell},
    submission::LaunchedRun,
    RunNumber,
};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const SUBJECT: &str = "CalibTree production status";
const TIMESTAMP_FORMAT: &str = "%D %H:%M";

/// Runs handed to the scheduler during one invocation, per bunch
#[derive(Debug, Clone)]
pub struct Report {
    started: DateTime<Local>,
    sections: BTreeMap<Bunch, BTreeMap<RunNumber, LaunchedRun>>,
}

impl Report {
    pub fn new(started: DateTime<Local>) -> Self {
        Self {
            started,
            sections: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, bunch: Bunch, runs: BTreeMap<RunNumber, LaunchedRun>) {
        self.sections.entry(bunch).or_default().extend(runs);
    }

    pub fn render(&self, ended: DateTime<Local>) -> String {
        let mut message = format!(
            "Job production started at {}\nJob production ended at {}\n\n\n\n",
            self.started.format(TIMESTAMP_FORMAT),
            ended.format(TIMESTAMP_FORMAT)
        );

        let sections = Bunch::ALL
            .iter()
            .map(|bunch| {
                let mut section = format!(
                    "{} bunch: The following runs will be processed:\n",
                    match bunch {
                        Bunch::Standard => "Std",
                        Bunch::Alternate => "AAG",
                    }
                );
                for (run, launched) in self.sections.get(bunch).into_iter().flatten() {
                    section.push_str(&format!(
                        "Run {run} ({} files, {} jobs)\n",
                        launched.files, launched.jobs
                    ));
                }
                section
            })
            .collect::<Vec<_>>();
        message.push_str(&sections.join("\n"));

        message
    }
}

/// Sends reports through the local mail transport
#[derive(Debug, Clone)]
pub struct Notifier {
    address: Option<String>,
    command: String,
    shell: Shell,
}

impl Notifier {
    pub fn new(address: Option<String>) -> Self {
        Self::with_command(address, "mail")
    }

    pub fn with_command(address: Option<String>, command: &str) -> Self {
        Self {
            address,
            command: command.to_owned(),
            shell: Shell::default(),
        }
    }

    /// Mail the report. Delivery problems are only logged at debug level,
    /// the jobs are already submitted when this runs.
    pub fn send(&self, report: &Report) {
        let Some(ref address) = self.address else {
            info!("No email address specified, not sending a report");
            return;
        };

        let command = format!("{} -s {} {}", self.command, quote(SUBJECT), quote(address));
        match self.shell.run_with_input(&command, &report.render(Local::now())) {
            Ok(output) => {
                debug!(status = ?output.status, output = %output.combined(), "Mail command finished")
            }
            Err(error) => debug!(error = %error, "Failed to run the mail command"),
        }
    }
}
