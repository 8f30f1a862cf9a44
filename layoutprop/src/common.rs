use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::Display;
use std::num::NonZeroU32;

pub type DimSize = NonZeroU32;
/// A fully-known shape.
pub type Shape = Vec<DimSize>;
/// A shape whose extents may be individually unknown.
pub type Dims = SmallVec<[Option<DimSize>; 5]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Dtype {
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Sint32,
    Float16,
    Bfloat16,
    Float32,
}

impl Dtype {
    /// The bytes required to represent a value of this Dtype.
    pub fn size(&self) -> u8 {
        match self {
            Dtype::Uint8 | Dtype::Sint8 => 1,
            Dtype::Uint16 | Dtype::Sint16 | Dtype::Float16 | Dtype::Bfloat16 => 2,
            Dtype::Sint32 | Dtype::Float32 => 4,
        }
    }

    pub fn is_8bit(&self) -> bool {
        self.size() == 1
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dtype::Uint8 => write!(f, "u8"),
            Dtype::Sint8 => write!(f, "s8"),
            Dtype::Uint16 => write!(f, "u16"),
            Dtype::Sint16 => write!(f, "s16"),
            Dtype::Sint32 => write!(f, "s32"),
            Dtype::Float16 => write!(f, "f16"),
            Dtype::Bfloat16 => write!(f, "bf16"),
            Dtype::Float32 => write!(f, "f32"),
        }
    }
}

/// Returns the number of elements in a shape.
pub fn volume(shape: &[DimSize]) -> u64 {
    shape.iter().map(|d| u64::from(d.get())).product()
}

/// Converts known [Dims] to a [Shape], returning `None` if any extent is unknown.
pub fn known_shape(dims: &[Option<DimSize>]) -> Option<Shape> {
    dims.iter().copied().collect()
}

pub mod macros {
    pub mod internal {
        use crate::common::DimSize;
        pub trait IntoDimSize {
            fn into_dim_size(self) -> DimSize;
        }
        impl IntoDimSize for DimSize {
            fn into_dim_size(self) -> DimSize {
                self
            }
        }
        impl IntoDimSize for u32 {
            fn into_dim_size(self) -> DimSize {
                DimSize::new(self).unwrap()
            }
        }
    }

    #[macro_export]
    macro_rules! shape {
        ($dim:expr; $n:expr) => {{
            use $crate::common::macros::internal::IntoDimSize;
            // Bind to a variable with an explicit type to help out type inference.
            let sv: $crate::common::Shape = vec![ ($dim).into_dim_size(); $n ];
            sv
        }};
        ($($dim:expr),*$(,)*) => {{
            use $crate::common::macros::internal::IntoDimSize;
            // Bind to a variable with an explicit type to help out type inference.
            let sv: $crate::common::Shape = vec![ $( ($dim).into_dim_size() ),* ];
            sv
        }};
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;
    use smallvec::smallvec;

    #[test]
    fn test_known_shape_requires_every_extent() {
        let full: Dims = smallvec![DimSize::new(2), DimSize::new(3)];
        assert_eq!(known_shape(&full), Some(shape![2, 3]));
        let partial: Dims = smallvec![DimSize::new(2), None];
        assert_eq!(known_shape(&partial), None);
    }

    #[test]
    fn test_volume() {
        assert_eq!(volume(&shape![2, 3, 4]), 24);
        assert_eq!(volume(&[]), 1);
    }
}
