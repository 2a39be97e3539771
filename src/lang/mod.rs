//! Rule programs in the form produced by the rule-language parser.
//!
//! Parsing the textual language is the parser's job; this module only
//! defines the abstract program it hands over and the JSON interchange used
//! to move a parsed program (and asserted facts) across process boundaries.

pub mod ast;
pub mod error;

pub use ast::{
    Aggregator, App, Assign, Atom, BinOp, Const, Literal, Program, Rule, RuleId, Term,
};
pub use error::LangError;

/// Loads a parsed program from its JSON interchange form.
pub fn program_from_json(src: &str) -> Result<Program, LangError> {
    let program: Program = serde_json::from_str(src)?;
    log::debug!("Loaded program with {} rules", program.rules.len());
    Ok(program)
}
