//! Per-kind layout rules, grouped into families.

mod bookkeeping;
mod compute;
mod reorder;
mod structural;

pub(crate) use bookkeeping::BookkeepingRule;
pub(crate) use compute::ComputeRule;
pub(crate) use reorder::ReorderRule;
pub(crate) use structural::StructuralRule;

use super::{PassConfig, PassError};
use crate::attrs::Attributes;
use crate::common::{Dtype, Shape};
use crate::graph::edit::{insert_empty_scratchpad, SubgraphRewriter};
use crate::graph::{OpId, OpKind, Subgraph, ValueId};
use crate::oracle::{get_or_create_descriptor, Engine, MemoryDesc, PrimitiveDesc};
use crate::tensor::LayoutType;

use enum_dispatch::enum_dispatch;
use log::{error, trace};
use std::rc::Rc;

/// State shared by every rule during one sweep.
pub(crate) struct SweepContext<'c> {
    pub rewriter: SubgraphRewriter,
    pub config: &'c PassConfig,
}

#[enum_dispatch]
pub(crate) trait LayoutRuleT {
    /// Resolves what it can of `op`'s layouts. New ops go through `cx.rewriter`.
    fn propagate<E: Engine>(
        &self,
        sg: &mut Subgraph<E>,
        op: OpId,
        cx: &mut SweepContext,
    ) -> Result<(), PassError>;
}

#[enum_dispatch(LayoutRuleT)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LayoutRule {
    /// Layouts chosen by the engine.
    Compute(ComputeRule),
    /// Layouts derived algebraically across a shape reinterpretation.
    Structural(StructuralRule),
    Reorder(ReorderRule),
    Bookkeeping(BookkeepingRule),
}

/// Returns the rule for `kind`, or `None` for kinds that must be lowered before layout
/// propagation runs.
pub(crate) fn rule_for(kind: OpKind) -> Option<LayoutRule> {
    if kind.is_structural() {
        return Some(StructuralRule.into());
    }
    if kind.is_reorder_like() {
        return Some(ReorderRule.into());
    }
    match kind {
        OpKind::ConstantScales | OpKind::ConstantZps => Some(BookkeepingRule.into()),
        OpKind::Quantize | OpKind::Dequantize | OpKind::Wildcard | OpKind::End => None,
        _ => Some(ComputeRule.into()),
    }
}

fn descriptor<E: Engine>(
    sg: &mut Subgraph<E>,
    op: OpId,
) -> Result<(Rc<PrimitiveDesc>, bool), PassError> {
    get_or_create_descriptor(sg, op).map_err(|source| {
        error!("{} {op}: {source}", sg.op(op).kind);
        PassError::Descriptor { op, source }
    })
}

fn concrete_shape<E>(sg: &Subgraph<E>, value: ValueId) -> Result<Shape, PassError> {
    let t = sg.tensor(value);
    t.concrete_shape().ok_or(PassError::MissingShape(t.id))
}

/// Sets whatever `value` does not know yet from `md`. Dimensions are only filled when
/// `with_dims` is set.
fn fill_from_md<E>(
    sg: &mut Subgraph<E>,
    value: ValueId,
    md: &MemoryDesc,
    with_dims: bool,
) -> Result<(), PassError> {
    let layout = if sg.tensor(value).layout.is_any() {
        Some(sg.layout_ids.layout_type(&md.layout, &md.shape)?)
    } else {
        None
    };
    let t = sg.tensor_mut(value);
    if t.dtype.is_none() {
        t.set_dtype(md.dtype);
    }
    if with_dims && t.dims.is_none() {
        t.dims = Some(md.shape.iter().copied().map(Some).collect());
    }
    if let Some(layout) = layout {
        t.set_layout(layout);
    }
    Ok(())
}

/// Appends `op`'s scratchpad output and fills it from `pd`.
fn attach_scratchpad<E>(
    sg: &mut Subgraph<E>,
    op: OpId,
    pd: &PrimitiveDesc,
) -> Result<(), PassError> {
    let md = pd.scratchpad();
    debug_assert_eq!(md.dtype, Dtype::Uint8);
    let value = insert_empty_scratchpad(sg, op);
    fill_from_md(sg, value, md, true)?;
    trace!("Attached scratchpad {} to {op}", sg.tensor(value));
    Ok(())
}

/// Inserts a reorder whose output, read by input `slot` of `op`, has `layout`.
fn reorder_before<E: Engine>(
    sg: &mut Subgraph<E>,
    cx: &mut SweepContext,
    op: OpId,
    slot: usize,
    layout: LayoutType,
) -> Result<OpId, PassError> {
    let (reorder, fresh) = cx
        .rewriter
        .insert_before(sg, OpKind::Reorder, Attributes::new(), op, slot);
    sg.tensor_mut(fresh).set_layout(layout);
    finish_inserted_reorder(sg, reorder)?;
    Ok(reorder)
}

/// Inserts a reorder after output `slot` of `op`, which will write `layout` instead.
fn reorder_after<E: Engine>(
    sg: &mut Subgraph<E>,
    cx: &mut SweepContext,
    op: OpId,
    slot: usize,
    layout: LayoutType,
) -> Result<OpId, PassError> {
    let (reorder, fresh) = cx
        .rewriter
        .insert_after(sg, OpKind::Reorder, Attributes::new(), op, slot);
    sg.tensor_mut(fresh).set_layout(layout);
    finish_inserted_reorder(sg, reorder)?;
    Ok(reorder)
}

/// Both sides of a freshly inserted reorder are concrete, so its scratchpad can be attached
/// right away.
fn finish_inserted_reorder<E: Engine>(
    sg: &mut Subgraph<E>,
    reorder: OpId,
) -> Result<(), PassError> {
    let (pd, _) = descriptor(sg, reorder)?;
    attach_scratchpad(sg, reorder, &pd)
}
