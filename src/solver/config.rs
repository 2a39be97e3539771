use serde::{Deserialize, Serialize};

/// Evaluation bounds and checks for an `Engine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Maximum semi-naive iterations per stratum per `add_tuples` call.
    pub max_fixpoint_iterations: Option<usize>,
    /// Maximum nesting depth of functor terms placed in derived tuples.
    pub max_term_depth: Option<usize>,
    /// Run `sanity_check` at the end of every `add_tuples` call.
    pub sanity_check: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_fixpoint_iterations: None,
            max_term_depth: None,
            sanity_check: cfg!(debug_assertions),
        }
    }
}

impl Params {
    pub fn bounded(max_fixpoint_iterations: usize, max_term_depth: usize) -> Self {
        Self {
            max_fixpoint_iterations: Some(max_fixpoint_iterations),
            max_term_depth: Some(max_term_depth),
            ..Default::default()
        }
    }
}
