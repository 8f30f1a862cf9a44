use crate::graph::{Op, OpId, Subgraph};

use itertools::Itertools;
use prettytable::{self, format, row, Cell};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum SubgraphPrintStyle {
    Full,
    Compact,
}

/// Pretty-print a [Subgraph] to stdout.
pub fn pprint<E>(sg: &Subgraph<E>, style: SubgraphPrintStyle) {
    pprint_table(sg, style).printstd()
}

/// Pretty-print a [Subgraph] to a given [fmt::Write].
pub fn pprint_write<E, W>(out: &mut W, sg: &Subgraph<E>, style: SubgraphPrintStyle) -> fmt::Result
where
    W: fmt::Write,
{
    write!(out, "{}", pprint_table(sg, style))
}

pub fn pprint_string<E>(sg: &Subgraph<E>, style: SubgraphPrintStyle) -> String {
    format!("{}", pprint_table(sg, style))
}

fn pprint_table<E>(sg: &Subgraph<E>, style: SubgraphPrintStyle) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    let titles = match style {
        SubgraphPrintStyle::Full => row!["Op", "Inputs", "Outputs", "Descriptor"],
        SubgraphPrintStyle::Compact => row!["Op"],
    };
    table.set_titles(titles);

    for id in sg.topo_order() {
        let op = sg.op(id);
        let line = format!("{id} = {}", op.kind);
        let r = match style {
            SubgraphPrintStyle::Full => {
                let mut r = row![line];
                r.add_cell(Cell::new(&tensors(sg, &op.inputs).join("\n")));
                r.add_cell(Cell::new(&outputs(sg, op).join("\n")));
                let cached = if sg.pd_cache.contains(id) { "cached" } else { "" };
                r.add_cell(Cell::new(cached));
                r
            }
            SubgraphPrintStyle::Compact => row![format!(
                "{line}({}) -> ({})",
                tensors(sg, &op.inputs).join(", "),
                outputs(sg, op).join(", ")
            )],
        };
        table.add_row(r);
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}

fn tensors<E>(sg: &Subgraph<E>, values: &[crate::graph::ValueId]) -> Vec<String> {
    values.iter().map(|&v| sg.tensor(v).to_string()).collect()
}

/// Output tensors, with derived buffers marked.
fn outputs<E>(sg: &Subgraph<E>, op: &Op) -> Vec<String> {
    op.outputs
        .iter()
        .enumerate()
        .map(|(slot, &v)| {
            let t = sg.tensor(v);
            if op.scratchpad_slot == Some(slot) {
                format!("scratchpad {t}")
            } else if op.workspace_slot == Some(slot) {
                format!("workspace {t}")
            } else {
                t.to_string()
            }
        })
        .collect_vec()
}

/// One-line summary of the ops in `ids`.
pub fn summarize<E>(sg: &Subgraph<E>, ids: &[OpId]) -> String {
    ids.iter()
        .map(|&id| format!("{id}:{}", sg.op(id).kind))
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attributes;
    use crate::common::Dtype;
    use crate::graph::{OpKind, SubgraphBuilder};
    use crate::passes::layout_propagation;
    use crate::shape;
    use crate::testing::{engine, rm, t};
    use proptest::prelude::*;

    fn relu_graph() -> Subgraph<crate::testing::TestEngine> {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![2, 3])],
            vec![t(1, Dtype::Float32, &shape![2, 3])],
        );
        b.build(engine()).unwrap()
    }

    #[test]
    fn test_full_table_marks_scratchpads() {
        let mut sg = relu_graph();
        layout_propagation(&mut sg).unwrap();
        let s = pprint_string(&sg, SubgraphPrintStyle::Full);
        assert!(s.contains("op0 = Eltwise"), "{s}");
        assert!(s.contains("scratchpad t2:u8[1]"), "{s}");
        assert!(s.contains("cached"), "{s}");
    }

    proptest! {
        #[test]
        fn test_can_pprint_in_every_style(style in any::<SubgraphPrintStyle>()) {
            let sg = relu_graph();
            let mut out = String::new();
            pprint_write(&mut out, &sg, style).unwrap();
            prop_assert!(out.contains("t0:f32[2×3]:strided(3,1)"));
        }
    }
}
