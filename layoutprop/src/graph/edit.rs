//! Structural edits that splice ops into live edges.
//!
//! Slot indices are trusted: callers validate them against [super::schema], and an out-of-range
//! slot panics.

use super::{OpId, OpKind, Subgraph, ValueId};
use crate::attrs::Attributes;
use crate::tensor::{LayoutType, LogicalTensor};

use log::trace;

/// Makes a new, layout-less value with the dtype and dims of `like`.
fn fresh_value_like<E>(sg: &mut Subgraph<E>, like: ValueId) -> ValueId {
    let id = sg.fresh_tensor_id();
    let t = sg.tensor(like);
    let tensor = LogicalTensor::new(id, t.dtype, t.dims.clone(), LayoutType::Any);
    sg.push_value(tensor)
}

/// Redirects input `input_slot` of `existing` through `new_op`, which must have no inputs or
/// outputs yet.
///
/// `new_op` reads the value `existing` used to read and writes a fresh value (same dtype and dims,
/// [LayoutType::Any]) that `existing` now reads instead. Other consumers of the original value
/// are untouched. Returns the fresh value.
pub fn insert_op_before<E>(
    sg: &mut Subgraph<E>,
    new_op: OpId,
    existing: OpId,
    input_slot: usize,
) -> ValueId {
    assert!(
        sg.op(new_op).inputs.is_empty() && sg.op(new_op).outputs.is_empty(),
        "{new_op} is already linked"
    );
    let prev = sg.input(existing, input_slot);
    let fresh = fresh_value_like(sg, prev);

    sg.value_mut(prev)
        .consumers
        .retain(|&c| c != (existing, input_slot));
    sg.connect_input(new_op, prev);
    sg.connect_output(new_op, fresh);
    sg.op_mut(existing).inputs[input_slot] = fresh;
    sg.value_mut(fresh).consumers.push((existing, input_slot));
    fresh
}

/// Redirects output `output_slot` of `existing` through `new_op`, which must have no inputs or
/// outputs yet.
///
/// The original value, with its id and every consumer, becomes `new_op`'s output 0. `existing`
/// writes a fresh value (same dtype and dims, [LayoutType::Any]) that feeds `new_op`'s input 0.
/// Returns the fresh value.
pub fn insert_op_after<E>(
    sg: &mut Subgraph<E>,
    new_op: OpId,
    existing: OpId,
    output_slot: usize,
) -> ValueId {
    assert!(
        sg.op(new_op).inputs.is_empty() && sg.op(new_op).outputs.is_empty(),
        "{new_op} is already linked"
    );
    let orig = sg.output(existing, output_slot);
    let fresh = fresh_value_like(sg, orig);

    sg.op_mut(existing).outputs[output_slot] = fresh;
    sg.value_mut(fresh).producer = Some((existing, output_slot));
    sg.value_mut(orig).producer = None;
    sg.connect_input(new_op, fresh);
    sg.connect_output(new_op, orig);
    fresh
}

fn append_undefined_output<E>(sg: &mut Subgraph<E>, op: OpId) -> (usize, ValueId) {
    let id = sg.fresh_tensor_id();
    let value = sg.push_value(LogicalTensor::undefined(id));
    let slot = sg.connect_output(op, value);
    (slot, value)
}

/// Appends an empty scratchpad output to `op`.
pub fn insert_empty_scratchpad<E>(sg: &mut Subgraph<E>, op: OpId) -> ValueId {
    assert!(
        sg.op(op).scratchpad_slot.is_none(),
        "{op} already has a scratchpad"
    );
    let (slot, value) = append_undefined_output(sg, op);
    sg.op_mut(op).scratchpad_slot = Some(slot);
    value
}

/// Appends an empty workspace output to `op`.
pub fn insert_workspace<E>(sg: &mut Subgraph<E>, op: OpId) -> ValueId {
    assert!(
        sg.op(op).workspace_slot.is_none(),
        "{op} already has a workspace"
    );
    let (slot, value) = append_undefined_output(sg, op);
    sg.op_mut(op).workspace_slot = Some(slot);
    value
}

/// Replaces `old` with a detached copy that keeps only the outputs listed in `keep`, in that
/// order. Inputs move over unchanged and the cached primitive descriptor of `old` moves with them.
/// Returns the copy, which takes `old`'s place in the op order.
pub fn replace_with_trimmed_outputs<E>(
    sg: &mut Subgraph<E>,
    old: OpId,
    keep: &[usize],
) -> OpId {
    let old_op = sg.op(old).clone();
    let new = sg.create_op(old_op.kind, old_op.attrs.clone());

    for (slot, &v) in old_op.inputs.iter().enumerate() {
        for c in sg.value_mut(v).consumers.iter_mut() {
            if *c == (old, slot) {
                *c = (new, slot);
            }
        }
        sg.op_mut(new).inputs.push(v);
    }

    for (old_slot, &v) in old_op.outputs.iter().enumerate() {
        match keep.iter().position(|&k| k == old_slot) {
            Some(new_slot) => {
                sg.op_mut(new).outputs.push(v);
                sg.value_mut(v).producer = Some((new, new_slot));
                if old_op.scratchpad_slot == Some(old_slot) {
                    sg.op_mut(new).scratchpad_slot = Some(new_slot);
                }
                if old_op.workspace_slot == Some(old_slot) {
                    sg.op_mut(new).workspace_slot = Some(new_slot);
                }
            }
            None => {
                assert!(
                    sg.value(v).consumers.is_empty(),
                    "dropped output {old_slot} of {old} is still consumed"
                );
                sg.value_mut(v).producer = None;
            }
        }
    }
    debug_assert_eq!(sg.op(new).outputs.len(), keep.len());

    sg.pd_cache.transfer(old, new);
    sg.retire(old, new);
    new
}

/// Collects structural edits made during a sweep and joins them to the op order afterwards.
///
/// Ops inserted through the rewriter are linked into the data flow immediately, so rules running
/// later in the same sweep observe the new values, but they are not visited until the next sweep.
#[derive(Debug, Default)]
pub struct SubgraphRewriter {
    to_insert: Vec<OpId>,
    to_replace: Vec<(OpId, Vec<usize>)>,
}

impl SubgraphRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an op of `kind` and splices it before input `input_slot` of `existing`. See
    /// [insert_op_before].
    pub fn insert_before<E>(
        &mut self,
        sg: &mut Subgraph<E>,
        kind: OpKind,
        attrs: Attributes,
        existing: OpId,
        input_slot: usize,
    ) -> (OpId, ValueId) {
        let new_op = sg.create_op(kind, attrs);
        let value = insert_op_before(sg, new_op, existing, input_slot);
        trace!("Inserted {kind} {new_op} before input {input_slot} of {existing}");
        self.to_insert.push(new_op);
        (new_op, value)
    }

    /// Creates an op of `kind` and splices it after output `output_slot` of `existing`. See
    /// [insert_op_after].
    pub fn insert_after<E>(
        &mut self,
        sg: &mut Subgraph<E>,
        kind: OpKind,
        attrs: Attributes,
        existing: OpId,
        output_slot: usize,
    ) -> (OpId, ValueId) {
        let new_op = sg.create_op(kind, attrs);
        let value = insert_op_after(sg, new_op, existing, output_slot);
        trace!("Inserted {kind} {new_op} after output {output_slot} of {existing}");
        self.to_insert.push(new_op);
        (new_op, value)
    }

    /// Schedules replacement of `op` by a copy with only the outputs in `keep`. See
    /// [replace_with_trimmed_outputs].
    pub fn replace_with_trimmed_outputs(&mut self, op: OpId, keep: Vec<usize>) {
        self.to_replace.push((op, keep));
    }

    pub fn inserted(&self) -> &[OpId] {
        &self.to_insert
    }

    /// Applies every collected edit.
    pub fn commit<E>(self, sg: &mut Subgraph<E>) {
        for op in self.to_insert {
            sg.attach(op);
        }
        for (op, keep) in self.to_replace {
            let new = replace_with_trimmed_outputs(sg, op, &keep);
            trace!("Replaced {op} with {new}");
        }
    }
}
