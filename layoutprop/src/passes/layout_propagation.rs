use super::rules::{rule_for, LayoutRuleT, SweepContext};
use super::{PassConfig, PassError, PropagationStats};
use crate::graph::edit::SubgraphRewriter;
use crate::graph::Subgraph;
use crate::oracle::Engine;
use crate::pprint::{pprint_string, summarize, SubgraphPrintStyle};

use log::{debug, error, trace};

pub(super) fn run<E: Engine>(
    sg: &mut Subgraph<E>,
    config: &PassConfig,
) -> Result<PropagationStats, PassError> {
    let creations_before = sg.pd_cache.creations();
    let mut stats = PropagationStats::default();

    loop {
        if stats.sweeps == config.max_sweeps {
            error!(
                "{} edges still undecided after {} sweeps",
                unresolved(sg),
                stats.sweeps
            );
            return Err(PassError::NonConvergence {
                sweeps: stats.sweeps,
            });
        }
        stats.sweeps += 1;

        let mut cx = SweepContext {
            rewriter: SubgraphRewriter::new(),
            config,
        };
        sg.topo_visit(|sg, op| {
            let kind = sg.op(op).kind;
            let Some(rule) = rule_for(kind) else {
                error!("No layout rule for {kind} {op}");
                return Err(PassError::UnsupportedOpKind { op, kind });
            };
            rule.propagate(sg, op, &mut cx)
        })?;

        let inserted = cx.rewriter.inserted().to_vec();
        stats.reorders_inserted += inserted.len();
        cx.rewriter.commit(sg);

        let remaining = unresolved(sg);
        debug!(
            "Sweep {}: inserted [{}], {remaining} edges undecided",
            stats.sweeps,
            summarize(sg, &inserted)
        );
        if config.diagnostics {
            sg.check_links()?;
            debug!("\n{}", pprint_string(sg, SubgraphPrintStyle::Full));
        }
        if remaining == 0 {
            break;
        }
    }

    stats.outputs_trimmed = eliminate_optional_outputs(sg);
    write_back_boundary(sg);
    stats.descriptors_created = sg.pd_cache.creations() - creations_before;
    Ok(stats)
}

/// Counts edges whose layout is still undecided, plus reorders still missing their scratchpad.
/// Optional outputs are not counted.
fn unresolved<E>(sg: &Subgraph<E>) -> usize {
    sg.ops()
        .map(|(_, op)| {
            let inputs = op
                .inputs
                .iter()
                .filter(|&&v| sg.tensor(v).layout.is_any())
                .count();
            let outputs = op
                .outputs
                .iter()
                .enumerate()
                .filter(|&(slot, &v)| {
                    !op.is_optional_output(slot) && sg.tensor(v).layout.is_any()
                })
                .count();
            let scratchpad =
                usize::from(op.kind.is_reorder_like() && op.scratchpad_slot.is_none());
            inputs + outputs + scratchpad
        })
        .sum()
}

/// Replaces every op whose optional output nothing reads with a copy lacking that output.
/// Returns the number of ops replaced.
fn eliminate_optional_outputs<E>(sg: &mut Subgraph<E>) -> usize {
    let mut rewriter = SubgraphRewriter::new();
    let mut trimmed = 0;
    for (id, op) in sg.ops() {
        let unread = op
            .outputs
            .iter()
            .enumerate()
            .filter(|&(slot, &v)| {
                op.is_optional_output(slot)
                    && sg.value(v).consumers.is_empty()
                    && !sg.outputs().iter().any(|t| t.id == sg.tensor(v).id)
            })
            .map(|(slot, _)| slot)
            .collect::<Vec<_>>();
        if unread.is_empty() {
            continue;
        }
        let keep = (0..op.outputs.len())
            .filter(|slot| !unread.contains(slot))
            .collect();
        trace!("Dropping outputs {unread:?} of {id}");
        rewriter.replace_with_trimmed_outputs(id, keep);
        trimmed += 1;
    }
    rewriter.commit(sg);
    trimmed
}

/// Copies what was decided about boundary values onto the boundary records.
fn write_back_boundary<E>(sg: &mut Subgraph<E>) {
    let resolved = sg
        .inputs()
        .iter()
        .chain(sg.outputs())
        .filter_map(|t| sg.value_by_tensor_id(t.id))
        .map(|v| sg.tensor(v).clone())
        .collect::<Vec<_>>();
    let (inputs, outputs) = sg.boundary_mut();
    for record in inputs.iter_mut().chain(outputs.iter_mut()) {
        if let Some(t) = resolved.iter().find(|t| t.id == record.id) {
            record.layout = t.layout.clone();
            if record.dtype.is_none() {
                record.dtype = t.dtype;
            }
            if record.dims.is_none() {
                record.dims = t.dims.clone();
            }
        }
    }
}
