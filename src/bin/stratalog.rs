use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use log::info;
use stratalog::{
    lang,
    solver::{self, Fact, Params},
};

/// Evaluate a stratified rule program over a batch of facts.
#[derive(Parser)]
#[command(name = "stratalog", version, about)]
struct Args {
    /// Path to the program, as AST JSON
    program: PathBuf,
    /// Path to a JSON array of facts to assert
    facts: Option<PathBuf>,
    /// Print the lineage graph in DOT format
    #[arg(long)]
    dot: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    let src = fs::read_to_string(&args.program)
        .with_context(|| format!("reading program {}", args.program.display()))?;
    let program = lang::program_from_json(&src)?;
    let analysis = stratalog::analysis::stratify(&program)?;
    println!("{}", analysis);

    let mut engine = solver::compile(analysis, Params::default())?;
    let facts: Vec<Fact> = match &args.facts {
        Some(path) => {
            let src = fs::read_to_string(path)
                .with_context(|| format!("reading facts {}", path.display()))?;
            serde_json::from_str(&src)
                .with_context(|| format!("parsing facts {}", path.display()))?
        }
        None => Vec::new(),
    };
    info!("Asserting {} facts", facts.len());
    engine.add_tuples(&facts)?;

    let mut out = String::new();
    engine.write_tuples(&mut out)?;
    print!("{}", out);
    info!(
        "{} tuples, {} groundings ({} redundant) in {:?}",
        engine.tuples().len(),
        engine.metrics().groundings,
        engine.metrics().redundant_groundings,
        engine.metrics().evaluation_time.unwrap_or_default()
    );

    if args.dot {
        println!("{}", engine.to_dot());
    }
    Ok(())
}
