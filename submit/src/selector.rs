use crate::{
    catalog::{CatalogError, Catalogs},
    RunNumber,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    io::{self, BufRead, Write},
};
use tracing::{debug, info, warn};

/// Which runs are wanted before looking at their event counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFilter {
    /// inclusive bounds
    Range { first: RunNumber, last: RunNumber },
    AllowList(BTreeSet<RunNumber>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub filter: RunFilter,
    // failed runs to relaunch, wanted regardless of the filter
    pub relaunch: BTreeSet<RunNumber>,
    pub min_events: u64,
    pub max_events: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Included,
    OutOfRange,
    TooFewEvents,
    TooManyEvents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRun {
    pub dataset: String,
    pub run: RunNumber,
    pub events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub runs: Vec<AcceptedRun>,
    pub total_events: u64,
}

impl SelectionCriteria {
    pub fn wants(&self, run: RunNumber) -> bool {
        if self.relaunch.contains(&run) {
            return true;
        }

        match self.filter {
            RunFilter::Range { first, last } => (first..=last).contains(&run),
            RunFilter::AllowList(ref runs) => runs.contains(&run),
        }
    }

    pub fn evaluate(&self, run: RunNumber, events: u64) -> Decision {
        if !self.wants(run) {
            Decision::OutOfRange
        } else if events < self.min_events {
            Decision::TooFewEvents
        } else if self.max_events.is_some_and(|max| events > max) {
            Decision::TooManyEvents
        } else {
            Decision::Included
        }
    }
}

impl Selection {
    pub fn first_run(&self) -> Option<RunNumber> {
        self.runs.iter().map(|run| run.run).min()
    }

    pub fn last_run(&self) -> Option<RunNumber> {
        self.runs.iter().map(|run| run.run).max()
    }

    fn accept(&mut self, run: AcceptedRun) {
        self.total_events += run.events;
        self.runs.push(run);
    }
}

/// Walk every dataset matching `pattern` and keep the runs `criteria` accepts.
/// Event counts are only queried for wanted runs.
#[tracing::instrument(level = "debug", skip(catalog, criteria))]
pub fn select_runs(
    catalog: &Catalogs,
    pattern: &str,
    criteria: &SelectionCriteria,
) -> Result<Selection, CatalogError> {
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    let datasets = catalog.list_datasets(pattern)?;
    if datasets.is_empty() {
        warn!(pattern = pattern, "No dataset matches the pattern");
    }

    for dataset in datasets {
        info!(dataset = %dataset, "Processing dataset");

        for run in catalog.list_runs(&dataset)? {
            if !criteria.wants(run) {
                debug!(run = run, "Skipping run: out of range");
                continue;
            }

            let events = catalog.count_events(&dataset, run)?;
            match criteria.evaluate(run, events) {
                Decision::Included => {
                    if !seen.insert(run) {
                        warn!(run = run, dataset = %dataset, "Run was already selected from another dataset");
                    }
                    selection.accept(AcceptedRun {
                        dataset: dataset.clone(),
                        run,
                        events,
                    });
                    info!(
                        run = run,
                        events = events,
                        total = selection.total_events,
                        "Selected run"
                    );
                }
                Decision::TooFewEvents => {
                    info!(run = run, events = events, min = criteria.min_events, "Skipping run: too few events")
                }
                Decision::TooManyEvents => {
                    info!(run = run, events = events, max = ?criteria.max_events, "Skipping run: too many events")
                }
                Decision::OutOfRange => debug!(run = run, "Skipping run: out of range"),
            }
        }
    }

    info!(
        runs = selection.runs.len(),
        total_events = selection.total_events,
        "Run selection finished"
    );

    Ok(selection)
}

/// What to do when the accepted runs add up to fewer events than wanted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LowStatisticsPolicy {
    #[default]
    Abort,
    Continue,
    /// ask on the terminal
    Prompt,
}

impl LowStatisticsPolicy {
    /// `true` when processing goes on with `total` events
    pub fn confirm<R: BufRead, W: Write>(
        self,
        total: u64,
        floor: u64,
        input: &mut R,
        output: &mut W,
    ) -> io::Result<bool> {
        if total >= floor {
            return Ok(true);
        }

        warn!(total = total, floor = floor, "Not enough events collected");
        match self {
            Self::Abort => Ok(false),
            Self::Continue => Ok(true),
            Self::Prompt => loop {
                write!(
                    output,
                    "Only {total} events were found, fewer than {floor}. Continue anyway? (y/n) "
                )?;
                output.flush()?;

                let mut answer = String::new();
                if input.read_line(&mut answer)? == 0 {
                    // closed terminal counts as no
                    return Ok(false);
                }
                match answer.trim() {
                    "y" | "Y" => return Ok(true),
                    "n" | "N" => return Ok(false),
                    _ => continue,
                }
            },
        }
    }
}
