//! Incremental evaluation of stratified programs.
//!
//! `compile` plans every rule of an analysed program and returns an `Engine`
//! that accepts batches of facts through `add_tuples`.

pub mod config;
pub mod debug;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod planner;
pub mod provenance;
pub mod store;
pub mod value;

#[cfg(test)]
mod tests;

pub use config::Params;
pub use engine::Engine;
pub use error::{ArithmeticError, CompileError, EngineError};
pub use metrics::Metrics;
pub use store::TupleId;
pub use value::{Fact, Value};

use crate::analysis::AnalysisResult;

/// Builds an executable engine for `analysis`.
pub fn compile(analysis: AnalysisResult, params: Params) -> Result<Engine, CompileError> {
    let plans = planner::plan_program(&analysis)?;
    log::debug!(
        "Compiled {} rules over {} strata",
        plans.len(),
        analysis.strata().len()
    );
    Ok(Engine::new(analysis, plans, params))
}
