use crate::RunNumber;
use std::num::NonZeroUsize;
use tracing::debug;

/// The files a single job of a run processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    pub run: RunNumber,
    // 1-based, unique within a run
    pub index: usize,
    pub files: Vec<String>,
}

/// Keep only catalog entries that are logical file names below `prefix`
pub fn filter_files(files: Vec<String>, prefix: &str) -> Vec<String> {
    files
        .into_iter()
        .filter(|file| {
            let keep = file.starts_with(prefix);
            if !keep {
                debug!(file = %file, prefix = prefix, "Dropped catalog file");
            }
            keep
        })
        .collect()
}

pub fn partition(run: RunNumber, files: &[String], per_job: NonZeroUsize) -> Vec<JobBatch> {
    partition_from(run, files, per_job, 1)
}

/// Split `files` into batches of at most `per_job` files in catalog order,
/// numbering them from `first_index`. A run without files still yields one
/// empty batch.
pub fn partition_from(
    run: RunNumber,
    files: &[String],
    per_job: NonZeroUsize,
    first_index: usize,
) -> Vec<JobBatch> {
    if files.is_empty() {
        return vec![JobBatch {
            run,
            index: first_index,
            files: Vec::new(),
        }];
    }

    files
        .chunks(per_job.get())
        .enumerate()
        .map(|(offset, chunk)| JobBatch {
            run,
            index: first_index + offset,
            files: chunk.to_vec(),
        })
        .collect()
}
