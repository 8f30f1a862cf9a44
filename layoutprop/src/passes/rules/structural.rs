use super::{concrete_shape, reorder_after, reorder_before, LayoutRuleT, SweepContext};
use crate::attrs::{keys, Attributes};
use crate::common::{DimSize, Shape};
use crate::graph::{OpId, OpKind, Subgraph};
use crate::layout::{row_major, Layout, LayoutError};
use crate::oracle::Engine;
use crate::passes::PassError;
use crate::tensor::LayoutType;

use log::{error, trace};
use smallvec::SmallVec;

/// Ops that reinterpret the shape of their input without moving data. The undecided side is
/// derived from the decided one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StructuralRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

impl LayoutRuleT for StructuralRule {
    fn propagate<E: Engine>(
        &self,
        sg: &mut Subgraph<E>,
        op: OpId,
        cx: &mut SweepContext,
    ) -> Result<(), PassError> {
        let (src, dst) = (sg.input(op, 0), sg.output(op, 0));
        let src_shape = concrete_shape(sg, src)?;
        let dst_shape = concrete_shape(sg, dst)?;
        let src_layout = sg.tensor(src).layout.clone();
        let dst_layout = sg.tensor(dst).layout.clone();

        match (src_layout.is_any(), dst_layout.is_any()) {
            (true, true) => {}
            (false, true) => {
                let derived = derive_or_reorder(
                    sg,
                    cx,
                    op,
                    &src_layout,
                    (&src_shape[..], &dst_shape[..]),
                    Direction::Forward,
                )?;
                trace!("Derived {derived} for output of {op}");
                sg.tensor_mut(dst).set_layout(derived);
            }
            (true, false) => {
                let derived = derive_or_reorder(
                    sg,
                    cx,
                    op,
                    &dst_layout,
                    (&dst_shape[..], &src_shape[..]),
                    Direction::Inverse,
                )?;
                trace!("Derived {derived} for input of {op}");
                sg.tensor_mut(src).set_layout(derived);
            }
            (false, false) => {
                let expected = derive_or_reorder(
                    sg,
                    cx,
                    op,
                    &src_layout,
                    (&src_shape[..], &dst_shape[..]),
                    Direction::Forward,
                )?;
                if !expected.equivalent(&dst_layout, &dst_shape) {
                    reorder_after(sg, cx, op, 0, expected)?;
                }
            }
        }
        Ok(())
    }
}

/// Like [derive], but if `layout` cannot be carried across `op`, the known side is first
/// reordered to plain row-major and the derivation retried from there.
fn derive_or_reorder<E: Engine>(
    sg: &mut Subgraph<E>,
    cx: &mut SweepContext,
    op: OpId,
    layout: &LayoutType,
    (from, to): (&[DimSize], &[DimSize]),
    direction: Direction,
) -> Result<LayoutType, PassError> {
    let err = match derive(sg, op, layout, from, to, direction) {
        Ok(derived) => return Ok(derived),
        Err(err) => err,
    };
    trace!("{op} cannot carry {layout} ({err}); reordering to plain");
    let plain = plain(from)?;
    match direction {
        Direction::Forward => reorder_before(sg, cx, op, 0, plain.clone())?,
        Direction::Inverse => reorder_after(sg, cx, op, 0, plain.clone())?,
    };
    derive(sg, op, &plain, from, to, direction).map_err(|source| unrepresentable(sg, op, source))
}

fn unrepresentable<E>(sg: &Subgraph<E>, op: OpId, source: LayoutError) -> PassError {
    let kind = sg.op(op).kind;
    error!("{kind} {op}: {source}");
    PassError::UnrepresentableLayoutTransform { op, kind, source }
}

fn plain(shape: &[DimSize]) -> Result<LayoutType, LayoutError> {
    Ok(LayoutType::Strided(row_major(shape).strides(shape)?))
}

/// Carries `layout`, known for the side of `op` shaped `from`, to the other side, shaped `to`.
fn derive<E>(
    sg: &mut Subgraph<E>,
    op: OpId,
    layout: &LayoutType,
    from: &[DimSize],
    to: &[DimSize],
    direction: Direction,
) -> Result<LayoutType, LayoutError> {
    let Some(known) = sg.layout_ids.layout_of(layout, from)? else {
        return Err(LayoutError::Unrepresentable("layout is undecided"));
    };
    let o = sg.op(op);
    let derived = transform(o.kind, &o.attrs, &known, from, to, direction)?;
    sg.layout_ids.layout_type(&derived, to)
}

fn transform(
    kind: OpKind,
    attrs: &Attributes,
    layout: &Layout,
    from: &[DimSize],
    to: &[DimSize],
    direction: Direction,
) -> Result<Layout, LayoutError> {
    let transposed = attrs.get_bool(keys::IS_CONVTRANSPOSE);
    match (kind, direction) {
        (OpKind::Permute | OpKind::Transpose, _) => {
            let perm = permutation(attrs, from.len())?;
            if to.len() != perm.len() {
                return Err(LayoutError::RankMismatch {
                    expected: perm.len(),
                    actual: to.len(),
                });
            }
            match direction {
                Direction::Forward => Ok(layout.permute(&perm)),
                Direction::Inverse => Ok(layout.permute(&invert(&perm))),
            }
        }
        (OpKind::Reshape | OpKind::Expand | OpKind::Squeeze, _) => layout.reshape(from, to),
        (OpKind::ToGroup, Direction::Forward) | (OpKind::FromGroup, Direction::Inverse) => {
            group(layout, from, to, transposed)
        }
        (OpKind::ToGroup, Direction::Inverse) | (OpKind::FromGroup, Direction::Forward) => {
            ungroup(layout, from, to, transposed)
        }
        _ => unreachable!("{kind} is not structural"),
    }
}

/// The permutation of a permute or transpose: output dimension `j` is input dimension
/// `perm[j]`. Without an explicit order, dimensions are reversed.
fn permutation(attrs: &Attributes, rank: usize) -> Result<SmallVec<[u8; 5]>, LayoutError> {
    let perm: SmallVec<[u8; 5]> = match attrs.get_ints(keys::ORDER) {
        Some(order) => order
            .iter()
            .map(|&d| {
                let d = if d < 0 { d + rank as i64 } else { d };
                u8::try_from(d).map_err(|_| LayoutError::Unrepresentable("bad permutation"))
            })
            .collect::<Result<_, _>>()?,
        None => (0..rank)
            .rev()
            .map(|d| u8::try_from(d).map_err(|_| LayoutError::Unrepresentable("rank too large")))
            .collect::<Result<_, _>>()?,
    };
    if perm.len() != rank {
        return Err(LayoutError::RankMismatch {
            expected: rank,
            actual: perm.len(),
        });
    }
    let mut seen: SmallVec<[bool; 5]> = SmallVec::from_elem(false, rank);
    for &d in &perm {
        match seen.get_mut(usize::from(d)) {
            Some(s) if !*s => *s = true,
            _ => return Err(LayoutError::Unrepresentable("bad permutation")),
        }
    }
    Ok(perm)
}

fn invert(perm: &[u8]) -> SmallVec<[u8; 5]> {
    let mut inverse: SmallVec<[u8; 5]> = SmallVec::from_elem(0, perm.len());
    for (j, &p) in perm.iter().enumerate() {
        inverse[usize::from(p)] = u8::try_from(j).unwrap();
    }
    inverse
}

fn swapped(shape: &[DimSize], a: usize, b: usize) -> Result<Shape, LayoutError> {
    let rank = shape.len();
    if a.max(b) >= rank {
        return Err(LayoutError::RankMismatch {
            expected: a.max(b) + 1,
            actual: rank,
        });
    }
    let mut s = shape.to_vec();
    s.swap(a, b);
    Ok(s)
}

/// `[O, I, ...]` to `[G, O/G, I, ...]`. Transposed-convolution weights are `[I, O, ...]` and
/// group to `[G, I, O/G, ...]`, so their axes are swapped around the split.
fn group(
    layout: &Layout,
    ungrouped: &[DimSize],
    grouped: &[DimSize],
    transposed: bool,
) -> Result<Layout, LayoutError> {
    if !transposed {
        return layout.reshape(ungrouped, grouped);
    }
    let from = swapped(ungrouped, 0, 1)?;
    let to = swapped(grouped, 1, 2)?;
    Ok(layout
        .swap_dims((0, 1))
        .reshape(&from, &to)?
        .swap_dims((1, 2)))
}

/// The inverse of [group].
fn ungroup(
    layout: &Layout,
    grouped: &[DimSize],
    ungrouped: &[DimSize],
    transposed: bool,
) -> Result<Layout, LayoutError> {
    if !transposed {
        return layout.reshape(grouped, ungrouped);
    }
    let from = swapped(grouped, 1, 2)?;
    let to = swapped(ungrouped, 0, 1)?;
    Ok(layout
        .swap_dims((1, 2))
        .reshape(&from, &to)?
        .swap_dims((0, 1)))
}
