use crate::common::{volume, DimSize, Shape};
use crate::layout;

use itertools::Itertools;
use nonzero::nonzero as nz;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::fmt::Display;

/// Element strides, one per logical dimension.
pub type Strides = SmallVec<[u64; 5]>;

/// Maps a tensor's logical dimensions to a physical, outermost-to-innermost order of (possibly
/// blocked) dimensions.
///
/// Each entry names the logical dimension it iterates over. A [PhysDim::Dynamic] entry covers
/// whatever extent of its logical dimension remains after the inner [PhysDim::Packed] entries for
/// the same logical dimension, so `layout![0, 1, 2, 3, 1 p(8)]` is the familiar `nChw8c` format.
///
/// Layouts are not defined for all shapes. Packed dimensions require their logical dimension to be
/// a multiple of the packing size. Logical dimensions of size one need not appear at all.
///
/// Layouts have canonical forms with respect to concrete shapes. The canonical form is logically
/// equivalent for that shape, but not necessarily other shapes.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub struct Layout {
    pub(crate) dims: Vec<(u8, PhysDim)>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub enum PhysDim {
    Dynamic,
    Packed(DimSize),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Layout does not apply to shape {0:?}")]
    InvalidShape(Shape),
    #[error("Layout is blocked and has no strided form")]
    NotStrided,
    #[error("Strides {0:?} do not describe a dense tensor")]
    NonDenseStrides(Strides),
    #[error("Expected rank {expected} but got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("Cannot reshape {from:?} to {to:?}: volumes differ")]
    VolumeMismatch { from: Shape, to: Shape },
    #[error("Layout cannot follow the transform: {0}")]
    Unrepresentable(&'static str),
    #[error("Unknown opaque layout id {0}")]
    UnknownOpaque(u32),
}

impl Layout {
    pub fn new(dims: Vec<(u8, PhysDim)>) -> Layout {
        let mut l = Layout { dims };
        l.assert_no_size_1_packings();
        l.merge_consecutive_dimensions();
        l
    }

    pub fn dims(&self) -> &[(u8, PhysDim)] {
        &self.dims
    }

    /// Returns `true` if no physical dimension is blocked, i.e., the layout is a permutation of
    /// logical dimensions and has a strided form.
    pub fn is_plain(&self) -> bool {
        self.dims.iter().all(|(_, p)| matches!(p, PhysDim::Dynamic))
    }

    pub fn is_row_major(&self) -> bool {
        self.is_plain() && self.dims.iter().map(|(d, _)| *d).is_sorted()
    }

    pub fn applies_to_shape(&self, shape: &[DimSize]) -> bool {
        self.expand_physical_shape(shape).is_ok()
    }

    /// Returns the canonical form of this layout for `shape`.
    ///
    /// Entries for size-one logical dimensions are dropped and a logical dimension covered
    /// entirely by its packings loses its outer [PhysDim::Dynamic], so that, for example,
    /// `nChw8c` with eight channels canonicalizes to plain NHWC.
    pub fn canonicalize(&self, shape: &[DimSize]) -> Result<Layout, LayoutError> {
        self.expand_physical_shape(shape)?;

        let rank = shape.len();
        let mut packed_volume: SmallVec<[u32; 5]> = smallvec![1; rank];
        for (d, pd) in &self.dims {
            if let PhysDim::Packed(s) = pd {
                packed_volume[usize::from(*d)] *= s.get();
            }
        }

        let mut promoted: SmallVec<[bool; 5]> = smallvec![false; rank];
        let mut dims = Vec::with_capacity(self.dims.len());
        for &(d, pd) in &self.dims {
            let d_us = usize::from(d);
            if shape[d_us].get() == 1 {
                continue;
            }
            let fully_packed = packed_volume[d_us] == shape[d_us].get();
            match pd {
                PhysDim::Dynamic if fully_packed => {}
                PhysDim::Packed(_) if fully_packed && !promoted[d_us] => {
                    promoted[d_us] = true;
                    dims.push((d, PhysDim::Dynamic));
                }
                _ => dims.push((d, pd)),
            }
        }
        Ok(Layout::new(dims))
    }

    /// Computes the element strides of a plain layout for `shape`.
    ///
    /// Size-one dimensions absent from the layout get the stride they would have in row-major
    /// position; they never affect addressing.
    pub fn strides(&self, shape: &[DimSize]) -> Result<Strides, LayoutError> {
        self.expand_physical_shape(shape)?;

        let rank = shape.len();
        let mut strides: Strides = smallvec![0; rank];
        let mut seen: SmallVec<[bool; 5]> = smallvec![false; rank];
        let mut acc = 1u64;
        for &(d, pd) in self.dims.iter().rev() {
            if let PhysDim::Packed(_) = pd {
                return Err(LayoutError::NotStrided);
            }
            let d = usize::from(d);
            strides[d] = acc;
            seen[d] = true;
            acc *= u64::from(shape[d].get());
        }
        for d in (0..rank).rev() {
            if !seen[d] {
                strides[d] = if d + 1 < rank {
                    strides[d + 1] * u64::from(shape[d + 1].get())
                } else {
                    1
                };
            }
        }
        Ok(strides)
    }

    /// Builds the plain [Layout] described by dense `strides`.
    pub fn from_strides(shape: &[DimSize], strides: &[u64]) -> Result<Layout, LayoutError> {
        if shape.len() != strides.len() {
            return Err(LayoutError::RankMismatch {
                expected: shape.len(),
                actual: strides.len(),
            });
        }

        let mut order = (0..shape.len())
            .filter(|&d| shape[d].get() != 1)
            .collect::<Vec<_>>();
        order.sort_by(|&a, &b| strides[b].cmp(&strides[a]).then(a.cmp(&b)));

        let mut expected = 1u64;
        for &d in order.iter().rev() {
            if strides[d] != expected {
                return Err(LayoutError::NonDenseStrides(strides.into()));
            }
            expected *= u64::from(shape[d].get());
        }

        Ok(Layout::new(
            order
                .into_iter()
                .map(|d| (u8::try_from(d).unwrap(), PhysDim::Dynamic))
                .collect(),
        ))
    }

    /// Reorders logical dimensions: dimension `j` of the result is dimension `perm[j]` of the
    /// source. The physical order is unchanged.
    pub fn permute(&self, perm: &[u8]) -> Layout {
        let mut inverse: SmallVec<[u8; 5]> = smallvec![0; perm.len()];
        for (j, &p) in perm.iter().enumerate() {
            inverse[usize::from(p)] = u8::try_from(j).unwrap();
        }
        Layout {
            dims: self
                .dims
                .iter()
                .map(|&(d, pd)| (inverse[usize::from(d)], pd))
                .collect(),
        }
    }

    pub fn swap_dims(&self, dims: (u8, u8)) -> Layout {
        Layout {
            dims: self
                .dims
                .iter()
                .copied()
                .map(|(orig_dim, orig_size)| {
                    if orig_dim == dims.0 {
                        (dims.1, orig_size)
                    } else if orig_dim == dims.1 {
                        (dims.0, orig_size)
                    } else {
                        (orig_dim, orig_size)
                    }
                })
                .collect(),
        }
    }

    /// Derives the layout of the same buffer viewed with logical shape `to` instead of `from`.
    ///
    /// Dimensions are grouped into runs whose volumes match in both shapes. A run of source
    /// dimensions can only be merged if its [PhysDim::Dynamic] entries are adjacent and in
    /// logical order, and only the innermost source dimension of a run may be packed. Packings
    /// move to the innermost destination dimension of the run, which must be divisible by them.
    pub fn reshape(&self, from: &[DimSize], to: &[DimSize]) -> Result<Layout, LayoutError> {
        if volume(from) != volume(to) {
            return Err(LayoutError::VolumeMismatch {
                from: from.into(),
                to: to.into(),
            });
        }
        let canon = self.canonicalize(from)?;

        let non_unit = |s: &[DimSize]| -> SmallVec<[u8; 5]> {
            (0..s.len())
                .filter(|&d| s[d].get() != 1)
                .map(|d| u8::try_from(d).unwrap())
                .collect()
        };
        let from_nz = non_unit(from);
        let to_nz = non_unit(to);

        let mut group_of: SmallVec<[usize; 5]> = smallvec![usize::MAX; from.len()];
        let mut groups: Vec<(SmallVec<[u8; 5]>, SmallVec<[u8; 5]>)> = vec![];
        let (mut i, mut j) = (0, 0);
        while i < from_nz.len() {
            let mut ins: SmallVec<[u8; 5]> = smallvec![from_nz[i]];
            let mut outs: SmallVec<[u8; 5]> = smallvec![to_nz[j]];
            let mut pa = u64::from(from[usize::from(from_nz[i])].get());
            let mut pb = u64::from(to[usize::from(to_nz[j])].get());
            i += 1;
            j += 1;
            while pa != pb {
                if pa < pb {
                    ins.push(from_nz[i]);
                    pa *= u64::from(from[usize::from(from_nz[i])].get());
                    i += 1;
                } else {
                    outs.push(to_nz[j]);
                    pb *= u64::from(to[usize::from(to_nz[j])].get());
                    j += 1;
                }
            }
            for &d in &ins {
                group_of[usize::from(d)] = groups.len();
            }
            groups.push((ins, outs));
        }

        let entries = &canon.dims;
        let mut packed_in_group = vec![1u64; groups.len()];
        let mut new_dims = Vec::with_capacity(entries.len() + to_nz.len());
        let mut idx = 0;
        while idx < entries.len() {
            let (d, pd) = entries[idx];
            let g = group_of[usize::from(d)];
            let (ins, outs) = &groups[g];
            match pd {
                PhysDim::Dynamic => {
                    if d != ins[0] {
                        return Err(LayoutError::Unrepresentable(
                            "merged dimensions are not adjacent in physical order",
                        ));
                    }
                    for (k, &expected) in ins.iter().enumerate().skip(1) {
                        match entries.get(idx + k) {
                            Some(&(e, PhysDim::Dynamic)) if e == expected => {}
                            _ => {
                                return Err(LayoutError::Unrepresentable(
                                    "merged dimensions are not adjacent in physical order",
                                ))
                            }
                        }
                    }
                    new_dims.extend(outs.iter().map(|&o| (o, PhysDim::Dynamic)));
                    idx += ins.len();
                }
                PhysDim::Packed(s) => {
                    if Some(&d) != ins.last() {
                        return Err(LayoutError::Unrepresentable(
                            "an outer merged dimension is blocked",
                        ));
                    }
                    let last_out = *outs.last().unwrap();
                    packed_in_group[g] *= u64::from(s.get());
                    if u64::from(to[usize::from(last_out)].get()) % packed_in_group[g] != 0 {
                        return Err(LayoutError::Unrepresentable(
                            "blocking does not divide the innermost split dimension",
                        ));
                    }
                    new_dims.push((last_out, PhysDim::Packed(s)));
                    idx += 1;
                }
            }
        }
        Ok(Layout::new(new_dims))
    }

    /// Merge matching, consecutive dimensions.
    fn merge_consecutive_dimensions(&mut self) {
        if self.dims.is_empty() {
            return;
        }

        let mut new_dims: Vec<(u8, PhysDim)> = Vec::with_capacity(self.dims.len());
        new_dims.push(self.dims[0]);

        for &(dim, phys_dim) in &self.dims[1..] {
            let (last_dim, last_phys_dim) = new_dims.last_mut().unwrap();
            if dim != *last_dim {
                new_dims.push((dim, phys_dim));
                continue;
            }

            match (last_phys_dim, phys_dim) {
                (PhysDim::Packed(l), PhysDim::Packed(n)) => {
                    *l = l.checked_mul(n).unwrap();
                }
                (PhysDim::Dynamic, PhysDim::Packed(_)) => {}
                (PhysDim::Packed(_), PhysDim::Dynamic) => {
                    unreachable!("Dynamic followed Packed same logical dimension");
                }
                (PhysDim::Dynamic, PhysDim::Dynamic) => {
                    unreachable!("Repeating non-packed dimensions");
                }
            }
        }

        self.dims = new_dims;
    }

    fn expand_physical_shape(&self, logical_shape: &[DimSize]) -> Result<Shape, LayoutError> {
        let Layout { dims } = self;
        let mut physical_shape = Shape::with_capacity(dims.len());
        let mut logical_shape_remaining: SmallVec<[_; 5]> =
            logical_shape.iter().map(|x| x.get()).collect();
        for (dim, phys_dim) in dims.iter().rev() {
            let Some(remaining_size) = logical_shape_remaining.get_mut(usize::from(*dim)) else {
                return Err(LayoutError::InvalidShape(logical_shape.into()));
            };
            // Zero marks a logical dimension whose Dynamic entry was already seen.
            if *remaining_size == 0 {
                return Err(LayoutError::InvalidShape(logical_shape.into()));
            }
            match phys_dim {
                PhysDim::Packed(pack_size) => {
                    if *remaining_size % pack_size.get() != 0 {
                        return Err(LayoutError::InvalidShape(logical_shape.into()));
                    }
                    physical_shape.push(*pack_size);
                    *remaining_size /= pack_size.get();
                }
                PhysDim::Dynamic => {
                    physical_shape.push(DimSize::new(*remaining_size).unwrap());
                    *remaining_size = 0;
                }
            }
        }
        if logical_shape_remaining.iter().any(|&d| d > 1) {
            return Err(LayoutError::InvalidShape(logical_shape.into()));
        }
        physical_shape.reverse();
        Ok(physical_shape)
    }

    fn assert_no_size_1_packings(&self) {
        #[cfg(debug_assertions)]
        {
            for (_, size) in &self.dims {
                debug_assert_ne!(
                    size,
                    &PhysDim::Packed(nz!(1u32)),
                    "Size-1 packings are disallowed"
                );
            }
        }
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Layout { dims } = self;

        if dims[..]
            == [
                (0, PhysDim::Dynamic),
                (2, PhysDim::Dynamic),
                (3, PhysDim::Dynamic),
                (1, PhysDim::Dynamic),
            ]
        {
            write!(f, "NHWC")
        } else if self.is_plain() {
            write!(f, "[{}]", dims.iter().map(|(d, _)| d).join(","))
        } else {
            write!(
                f,
                "[{}]",
                dims.iter()
                    .map(|(d, s)| match s {
                        PhysDim::Dynamic => d.to_string(),
                        PhysDim::Packed(p) => format!("{d}p{p}"),
                    })
                    .join(",")
            )
        }
    }
}

pub fn row_major(shape: &[DimSize]) -> Layout {
    let rank = u8::try_from(shape.len()).unwrap();
    Layout::new(
        (0..rank)
            .filter_map(|d| {
                if shape[usize::from(d)].get() == 1 {
                    None
                } else {
                    Some((d, PhysDim::Dynamic))
                }
            })
            .collect(),
    )
}

#[cfg(test)]
pub fn col_major(shape: &[DimSize]) -> Layout {
    let mut layout = row_major(shape);
    layout.dims.reverse();
    layout
}

#[cfg(test)]
pub fn nhwc(shape: &[DimSize]) -> Layout {
    assert_eq!(shape.len(), 4, "NHWC layout is for 4D tensors");
    let mut l = layout![0, 2, 3, 1];
    l.dims.retain(|(d, _)| shape[usize::from(*d)].get() != 1);
    l
}

pub mod macros {
    #[macro_export]
    macro_rules! layout {
        ( @inner [ $( $out:expr, )* ] , ) => {
            $crate::layout::Layout::new(vec![ $( $out, )* ])
        };
        ( @inner [ $( $out:expr, )* ] , , $( $rest:tt )* ) => {
            $crate::layout!{ @inner [ $( $out, )* ] , $( $rest )* }
        };
        ( @inner [ $( $out:expr, )* ] , $dim:tt p ( $ds:expr ) , $( $rest:tt )* ) => {
            $crate::layout!{ @inner [ $( $out, )* (($dim), $crate::layout::PhysDim::Packed($crate::common::macros::internal::IntoDimSize::into_dim_size($ds))), ] , $( $rest )* }
        };
        ( @inner [ $( $out:expr, )* ] , $dim:expr , $( $rest:tt )* ) => {
            $crate::layout!{ @inner [ $( $out, )* ($dim, $crate::layout::PhysDim::Dynamic), ] , $( $rest )* }
        };
        ( $( $t:tt )* ) => {
            $crate::layout!{ @inner [ ] , $( $t )* , }
        };
    }
}
