use crate::common::Dtype;
use crate::graph::OpKind;
use crate::target::{Target, TargetId};

use serde::Serialize;

/// An AVX2 machine.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Default, Debug, Serialize)]
pub struct X86Target;

#[derive(Clone, Copy, Hash, Eq, PartialEq, Default, Debug, Serialize)]
pub struct X86Avx512Target;

impl Target for X86Target {
    fn target_id() -> TargetId {
        TargetId::X86
    }

    fn line_size() -> u32 {
        32
    }

    fn vector_bytes() -> &'static [u32] {
        &[32, 16]
    }

    fn supports(_kind: OpKind, _dtype: Dtype) -> bool {
        true
    }
}

impl Target for X86Avx512Target {
    fn target_id() -> TargetId {
        TargetId::X86Avx512
    }

    fn line_size() -> u32 {
        64
    }

    fn vector_bytes() -> &'static [u32] {
        &[64, 32, 16]
    }

    fn supports(_kind: OpKind, _dtype: Dtype) -> bool {
        true
    }
}
