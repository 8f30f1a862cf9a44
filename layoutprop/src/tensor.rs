use crate::common::{known_shape, DimSize, Dims, Dtype, Shape};
use crate::layout::{row_major, Strides};
use crate::oracle::layout_id::LayoutId;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A tensor identifier, unique within a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct TensorId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum LayoutType {
    /// Not yet decided.
    Any,
    /// Dense, with explicit element strides.
    Strided(Strides),
    /// A blocked or otherwise engine-specific layout, interned in a
    /// [crate::oracle::layout_id::LayoutIdManager].
    Opaque(LayoutId),
}

impl LayoutType {
    pub fn is_any(&self) -> bool {
        matches!(self, LayoutType::Any)
    }

    /// Returns `true` if both layouts address the same bytes for `shape`.
    ///
    /// Strides of size-one dimensions are never consulted. An [LayoutType::Any] is never
    /// equivalent to anything, including itself.
    pub fn equivalent(&self, other: &LayoutType, shape: &[DimSize]) -> bool {
        match (self, other) {
            (LayoutType::Strided(a), LayoutType::Strided(b)) => {
                a.len() == b.len()
                    && a.len() == shape.len()
                    && a.iter()
                        .zip(b)
                        .zip(shape)
                        .all(|((x, y), d)| d.get() == 1 || x == y)
            }
            (LayoutType::Opaque(a), LayoutType::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutType::Any => write!(f, "any"),
            LayoutType::Strided(s) => {
                write!(f, "strided(")?;
                for (i, x) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
            LayoutType::Opaque(id) => write!(f, "opaque#{}", id.0),
        }
    }
}

/// The descriptor carried by every value flowing between ops.
///
/// `dtype` and `dims` may be unknown (`None`) before type inference. Once a dtype is known it never
/// changes, and once `layout` is concrete it never returns to [LayoutType::Any].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LogicalTensor {
    pub id: TensorId,
    pub dtype: Option<Dtype>,
    pub dims: Option<Dims>,
    pub layout: LayoutType,
}

impl LogicalTensor {
    pub fn new(id: TensorId, dtype: Option<Dtype>, dims: Option<Dims>, layout: LayoutType) -> Self {
        LogicalTensor {
            id,
            dtype,
            dims,
            layout,
        }
    }

    /// A tensor with nothing known about it yet.
    pub fn undefined(id: TensorId) -> Self {
        Self::new(id, None, None, LayoutType::Any)
    }

    pub fn any(id: TensorId, dtype: Dtype, shape: &[DimSize]) -> Self {
        Self::new(
            id,
            Some(dtype),
            Some(shape.iter().copied().map(Some).collect()),
            LayoutType::Any,
        )
    }

    /// A dense, row-major tensor.
    pub fn row_major(id: TensorId, dtype: Dtype, shape: &[DimSize]) -> Self {
        let strides = row_major(shape)
            .strides(shape)
            .expect("row-major layouts always have strides");
        Self::new(
            id,
            Some(dtype),
            Some(shape.iter().copied().map(Some).collect()),
            LayoutType::Strided(strides),
        )
    }

    pub fn with_layout(mut self, layout: LayoutType) -> Self {
        self.layout = layout;
        self
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    /// The fully-known shape, if every extent is known.
    pub fn concrete_shape(&self) -> Option<Shape> {
        self.dims.as_deref().and_then(known_shape)
    }

    pub fn set_dtype(&mut self, dtype: Dtype) {
        debug_assert!(
            self.dtype.is_none() || self.dtype == Some(dtype),
            "dtype of {:?} changed from {:?} to {dtype}",
            self.id,
            self.dtype
        );
        self.dtype = Some(dtype);
    }

    pub fn set_layout(&mut self, layout: LayoutType) {
        debug_assert!(
            self.layout.is_any() || !layout.is_any(),
            "layout of {:?} reset to any",
            self.id
        );
        self.layout = layout;
    }
}

impl Display for LogicalTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}:", self.id.0)?;
        match self.dtype {
            Some(dt) => write!(f, "{dt}")?,
            None => write!(f, "?")?,
        }
        write!(f, "[")?;
        if let Some(dims) = &self.dims {
            for (i, d) in dims.iter().enumerate() {
                if i > 0 {
                    write!(f, "×")?;
                }
                match d {
                    Some(d) => write!(f, "{d}")?,
                    None => write!(f, "?")?,
                }
            }
        } else {
            write!(f, "..")?;
        }
        write!(f, "]:{}", self.layout)
    }
}
