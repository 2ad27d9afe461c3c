use super::CatalogError;
use crate::RunNumber;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, path::Path};
use tracing::info;

/// Catalog content frozen into a YAML file, used to replay a submission
/// without access to the catalog service
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SnapshotCatalog {
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetSnapshot>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub runs: BTreeMap<RunNumber, RunSnapshot>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RunSnapshot {
    pub events: u64,
    // number of files the catalog reports, defaults to the listed files
    #[serde(default)]
    pub nfiles: Option<u64>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl SnapshotCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let snapshot: Self = serde_yaml::from_reader(File::open(path)?)?;
        info!(
            path = %path.display(),
            datasets = snapshot.datasets.len(),
            "Loaded catalog snapshot"
        );

        Ok(snapshot)
    }

    pub fn list_datasets(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    fn dataset(&self, dataset: &str) -> Result<&DatasetSnapshot, CatalogError> {
        self.datasets
            .get(dataset)
            .ok_or_else(|| CatalogError::UnknownDataset(dataset.to_owned()))
    }

    fn run(&self, dataset: &str, run: RunNumber) -> Result<&RunSnapshot, CatalogError> {
        self.dataset(dataset)?
            .runs
            .get(&run)
            .ok_or_else(|| CatalogError::UnknownRun {
                dataset: dataset.to_owned(),
                run,
            })
    }

    pub fn list_runs(&self, dataset: &str) -> Result<Vec<RunNumber>, CatalogError> {
        Ok(self.dataset(dataset)?.runs.keys().copied().collect())
    }

    pub fn count_events(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        Ok(self.run(dataset, run)?.events)
    }

    pub fn count_files(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        let run = self.run(dataset, run)?;

        Ok(run.nfiles.unwrap_or(run.files.len() as u64))
    }

    pub fn list_files(&self, dataset: &str, run: RunNumber) -> Result<Vec<String>, CatalogError> {
        Ok(self.run(dataset, run)?.files.clone())
    }
}
