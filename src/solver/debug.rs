//! Lineage export: renders the tuple universe and its provenance records as
//! a Graphviz digraph.

use std::fmt::{self, Write};

use itertools::Itertools;

use crate::solver::{engine::Engine, store::TupleId};

/// Graphviz view of an engine's provenance graph.
///
/// Tuples are boxes (asserted facts filled, tuples no longer in the extension
/// dashed), products are ellipses, group-by keys are diamonds and
/// aggregation products are small ellipses feeding their group.
pub struct LineageGraph<'a> {
    engine: &'a Engine,
}

impl<'a> LineageGraph<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
}

impl fmt::Display for LineageGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = self.engine;
        let store = engine.tuple_store();
        let provenance = engine.provenance();

        writeln!(f, "digraph Lineage {{")?;
        writeln!(f, "  rankdir=LR;")?;
        writeln!(f, "  node [shape=box];")?;

        writeln!(f, "\n  // Tuples")?;
        for i in 0..store.len() {
            let tuple = TupleId(i);
            let style = if engine.edb_tuples().contains(&tuple) {
                ", style=filled, fillcolor=lightblue"
            } else if !store.is_live(tuple) {
                ", style=dashed, color=gray"
            } else {
                ""
            };
            writeln!(
                f,
                "  t{} [label=\"{}\"{}];",
                i,
                escape(&engine.display_tuple(tuple)),
                style
            )?;
        }

        writeln!(f, "\n  // Products")?;
        for (id, product) in provenance.products() {
            writeln!(f, "  p{} [label=\"{}\", shape=ellipse];", id.0, product.rule)?;
            for input in &product.inputs {
                writeln!(f, "  t{} -> p{};", input.0, id.0)?;
            }
            if let Some(output) = product.output {
                writeln!(f, "  p{} -> t{};", id.0, output.0)?;
            }
        }

        writeln!(f, "\n  // Group-by keys")?;
        for (id, group) in provenance.groups() {
            let key = group
                .key
                .iter()
                .map(|d| engine.datum_to_value(d))
                .join(", ");
            writeln!(
                f,
                "  g{} [label=\"{} [{}] = {}\", shape=diamond];",
                id.0,
                group.rule,
                escape(&key),
                group.value
            )?;
            if let Some(output) = group.output {
                writeln!(f, "  g{} -> t{};", id.0, output.0)?;
            }
            for old in &group.superseded {
                writeln!(f, "  g{} -> t{} [style=dashed];", id.0, old.0)?;
            }
        }

        writeln!(f, "\n  // Aggregation products")?;
        for (id, product) in provenance.products_gb() {
            writeln!(
                f,
                "  pg{} [label=\"{} +{}\", shape=ellipse, fontsize=10];",
                id.0, product.rule, product.value
            )?;
            for input in &product.inputs {
                writeln!(f, "  t{} -> pg{};", input.0, id.0)?;
            }
            writeln!(f, "  pg{} -> g{};", id.0, product.group.0)?;
        }

        writeln!(f, "}}")
    }
}

impl Engine {
    /// The provenance graph in DOT format. Read-only.
    pub fn to_dot(&self) -> String {
        LineageGraph::new(self).to_string()
    }

    /// Writes one line per live tuple, sorted, for diagnostics.
    pub fn write_tuples(&self, out: &mut impl Write) -> fmt::Result {
        let lines = self
            .tuples()
            .into_iter()
            .map(|t| self.display_tuple(t))
            .sorted();
        for line in lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }
}
