use super::CatalogError;
use crate::{
    shell::{quote, Shell},
    RunNumber,
};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, error};

/// Client for the `dasgoclient` command line tool
#[derive(Debug, Clone)]
pub struct DasClient {
    command: String,
    limit: i64,
    shell: Shell,
}

/// the part of a `summary` answer we care about
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub nevents: Option<u64>,
    pub nfiles: Option<u64>,
}

impl DasClient {
    pub fn new(command: String, limit: i64, shell: Shell) -> Self {
        Self {
            command,
            limit,
            shell,
        }
    }

    pub fn command_line(&self, query: &str) -> String {
        format!(
            "{} --limit={} --query={}",
            self.command,
            self.limit,
            quote(query)
        )
    }

    fn query(&self, query: &str) -> Result<Vec<String>, CatalogError> {
        let command = self.command_line(query);
        debug!(command = %command, "Querying catalog");

        let output = self.shell.run(&command)?;
        if !output.success() {
            let combined = output.combined();
            error!(status = ?output.status, output = %combined, "Catalog query failed");

            return Err(CatalogError::QueryFailed {
                status: output.status,
                output: combined,
            });
        }

        Ok(parse_lines(&output.stdout))
    }

    pub fn list_datasets(&self, pattern: &str) -> Result<Vec<String>, CatalogError> {
        self.query(&format!("dataset dataset={pattern}"))
    }

    pub fn list_runs(&self, dataset: &str) -> Result<Vec<RunNumber>, CatalogError> {
        self.query(&format!("run dataset={dataset}"))
            .map(|lines| parse_runs(&lines))
    }

    pub fn list_files(&self, dataset: &str, run: RunNumber) -> Result<Vec<String>, CatalogError> {
        self.query(&format!("file dataset={dataset} run={run}"))
    }

    pub fn summary(&self, dataset: &str, run: RunNumber) -> Result<RunSummary, CatalogError> {
        let lines = self.query(&format!("summary dataset={dataset} run={run}"))?;

        parse_summary(&lines.join("\n"))
    }

    pub fn count_events(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        self.summary(dataset, run)?.nevents.ok_or_else(|| {
            CatalogError::Parse(format!("summary of run {run} carries no event count"))
        })
    }

    pub fn count_files(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        self.summary(dataset, run)?.nfiles.ok_or_else(|| {
            CatalogError::Parse(format!("summary of run {run} carries no file count"))
        })
    }
}

pub fn parse_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// run numbers are exactly six digits, everything else is chatter
pub fn parse_runs(lines: &[String]) -> Vec<RunNumber> {
    lines
        .iter()
        .filter(|line| line.len() == 6 && line.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|line| line.parse().ok())
        .sorted()
        .collect()
}

pub fn parse_summary(output: &str) -> Result<RunSummary, CatalogError> {
    let summaries = serde_json::from_str::<Vec<RunSummary>>(output.trim())
        .map_err(|error| CatalogError::Parse(format!("invalid summary ({error}): {output}")))?;

    summaries
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::Parse("empty summary".to_owned()))
}
