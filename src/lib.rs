//! A stratified, incrementally evaluated Datalog engine with negation and
//! sum aggregation.
//!
//! A parsed `lang::Program` is analysed with `analysis::stratify`, compiled
//! into an `solver::Engine` with `solver::compile`, and then fed batches of
//! facts through `Engine::add_tuples`.

pub mod analysis;
mod error;
pub use error::{Error, Result};
pub mod lang;
pub mod solver;

/// Analyses and compiles `program` in one step.
pub fn load(program: &lang::Program, params: solver::Params) -> Result<solver::Engine> {
    let analysis = analysis::stratify(program)?;
    Ok(solver::compile(analysis, params)?)
}
