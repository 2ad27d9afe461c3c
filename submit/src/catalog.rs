pub mod das;
pub mod snapshot;

use crate::{config::CatalogConfig, shell::Shell, shell::ShellError, RunNumber};
use globset::{GlobBuilder, GlobMatcher};
use std::{path::Path, time::Duration};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Bad dataset pattern {pattern}: {reason}")]
    BadPattern { pattern: String, reason: String },
    #[error("Catalog query failed with status {status:?}: {output}")]
    QueryFailed { status: Option<i32>, output: String },
    #[error("Failed to run catalog query: {0}")]
    Shell(#[from] ShellError),
    #[error("Failed to parse catalog output: {0}")]
    Parse(String),
    #[error("Dataset {0} is not known to the catalog")]
    UnknownDataset(String),
    #[error("Run {run} is not part of dataset {dataset}")]
    UnknownRun { dataset: String, run: RunNumber },
    #[error("Failed to read catalog snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize catalog snapshot: {0}")]
    Snapshot(#[from] serde_yaml::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatasetPathError {
    #[error("expected four slash separated segments, found {0}")]
    SegmentCount(usize),
    #[error("expected no characters before the first slash")]
    LeadingCharacters,
    #[error("expected text between slashes")]
    EmptySegment,
    #[error("dataset path cannot be an existing directory")]
    LocalDirectory,
}

/// Structural check for `/primary/processed/tier` dataset names and patterns
pub fn validate_dataset_path(dataset: &str) -> Result<(), DatasetPathError> {
    let segments = dataset.split('/').collect::<Vec<_>>();

    if segments.len() != 4 {
        return Err(DatasetPathError::SegmentCount(segments.len()));
    }
    if !segments[0].is_empty() {
        return Err(DatasetPathError::LeadingCharacters);
    }
    if segments[1..].iter().any(|segment| segment.is_empty()) {
        return Err(DatasetPathError::EmptySegment);
    }
    if Path::new(dataset).is_dir() {
        return Err(DatasetPathError::LocalDirectory);
    }

    Ok(())
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher, CatalogError> {
    if let Err(reason) = validate_dataset_path(pattern) {
        error!(pattern = pattern, "Bad dataset pattern: {reason}");

        return Err(CatalogError::BadPattern {
            pattern: pattern.to_owned(),
            reason: reason.to_string(),
        });
    }

    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|error| CatalogError::BadPattern {
            pattern: pattern.to_owned(),
            reason: error.to_string(),
        })
}

#[derive(Debug)]
/// All catalog back-ends, created through `Catalogs::load`
pub enum Catalogs {
    Das(das::DasClient),
    Snapshot(snapshot::SnapshotCatalog),
}

impl Catalogs {
    pub fn load(config: &CatalogConfig, shell: Shell) -> Result<Self, CatalogError> {
        match config {
            CatalogConfig::Das {
                command,
                limit,
                timeout,
            } => Ok(Self::Das(das::DasClient::new(
                command.clone(),
                *limit,
                shell.with_timeout(Duration::from_secs(*timeout)),
            ))),
            CatalogConfig::Snapshot { path } => {
                Ok(Self::Snapshot(snapshot::SnapshotCatalog::load(path)?))
            }
        }
    }

    /// datasets matching `pattern`, malformed or non matching answers are dropped
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn list_datasets(&self, pattern: &str) -> Result<Vec<String>, CatalogError> {
        let matcher = compile_pattern(pattern)?;
        let candidates = match self {
            Self::Das(client) => client.list_datasets(pattern)?,
            Self::Snapshot(snapshot) => snapshot.list_datasets(),
        };

        Ok(candidates
            .into_iter()
            .filter(|dataset| match validate_dataset_path(dataset) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(dataset = %dataset, "Dropped catalog answer: {reason}");
                    false
                }
            })
            .filter(|dataset| {
                let matches = matcher.is_match(dataset.as_str());
                if !matches {
                    warn!(dataset = %dataset, pattern = pattern, "Catalog returned a dataset outside of the pattern");
                }
                matches
            })
            .collect())
    }

    pub fn list_runs(&self, dataset: &str) -> Result<Vec<RunNumber>, CatalogError> {
        match self {
            Self::Das(client) => client.list_runs(dataset),
            Self::Snapshot(snapshot) => snapshot.list_runs(dataset),
        }
    }

    pub fn count_events(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        match self {
            Self::Das(client) => client.count_events(dataset, run),
            Self::Snapshot(snapshot) => snapshot.count_events(dataset, run),
        }
    }

    pub fn count_files(&self, dataset: &str, run: RunNumber) -> Result<u64, CatalogError> {
        match self {
            Self::Das(client) => client.count_files(dataset, run),
            Self::Snapshot(snapshot) => snapshot.count_files(dataset, run),
        }
    }

    pub fn list_files(&self, dataset: &str, run: RunNumber) -> Result<Vec<String>, CatalogError> {
        match self {
            Self::Das(client) => client.list_files(dataset, run),
            Self::Snapshot(snapshot) => snapshot.list_files(dataset, run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_structure() {
        assert_eq!(
            validate_dataset_path("/A/B"),
            Err(DatasetPathError::SegmentCount(3))
        );
        assert_eq!(validate_dataset_path("/A/B/C"), Ok(()));
        assert_eq!(
            validate_dataset_path("/A/B/C/D"),
            Err(DatasetPathError::SegmentCount(5))
        );
        assert_eq!(
            validate_dataset_path("x/A/B/C"),
            Err(DatasetPathError::LeadingCharacters)
        );
        assert_eq!(
            validate_dataset_path("/A//C"),
            Err(DatasetPathError::EmptySegment)
        );
        assert_eq!(
            validate_dataset_path("/StreamExpress/Run2024*-SiStripCalMinBias-Express-v*/ALCARECO"),
            Ok(())
        );
    }

    #[test]
    fn dataset_cannot_be_local_directory() {
        // /tmp/<name>/tier has exactly the shape of a dataset path
        let local = tempfile::Builder::new()
            .prefix("calib")
            .tempdir_in("/tmp")
            .unwrap();
        let nested = local.path().join("tier");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            validate_dataset_path(&nested.to_string_lossy()),
            Err(DatasetPathError::LocalDirectory)
        );
    }

    #[test]
    fn bad_pattern_is_rejected_before_querying() {
        let catalog = Catalogs::Snapshot(snapshot::SnapshotCatalog::default());

        assert!(matches!(
            catalog.list_datasets("/A/B"),
            Err(CatalogError::BadPattern { .. })
        ));
    }

    #[test]
    fn glob_does_not_cross_segments() {
        let matcher = compile_pattern("/Stream*/Run2024*-Express-v*/ALCARECO").unwrap();

        assert!(matcher.is_match("/StreamExpress/Run2024B-Express-v1/ALCARECO"));
        assert!(!matcher.is_match("/StreamExpress/Run2023B-Express-v1/ALCARECO"));
        assert!(!matcher.is_match("/StreamExpress/Run2024B-Express-v1/ALCAPROMPT"));
    }
}
