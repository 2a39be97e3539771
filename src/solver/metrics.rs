use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;

/// Counters for the most recent `add_tuples` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub evaluation_time: Option<Duration>,
    /// Semi-naive iterations summed over all recursive strata.
    pub fixpoint_iterations: usize,
    /// Body groundings that reached the head action.
    pub groundings: usize,
    /// Groundings whose product was already on record.
    pub redundant_groundings: usize,
    /// Groundings dropped because an expression could not be evaluated.
    pub skipped_groundings: usize,
    /// Aggregate results replaced by a new sum.
    pub superseded_results: usize,
    /// Tuples that left the extension because they were derived from a
    /// superseded result.
    pub withdrawn_tuples: usize,
    pub derived_per_predicate: BTreeMap<String, usize>,
}

impl Metrics {
    pub fn total_derived(&self) -> usize {
        self.derived_per_predicate.values().sum()
    }
}
