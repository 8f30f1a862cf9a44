mod arm;
mod cpu;
mod x86;

pub use arm::ArmTarget;
pub use cpu::CpuEngine;
pub use x86::{X86Avx512Target, X86Target};

use crate::common::Dtype;
use crate::graph::OpKind;

use std::fmt::Debug;

pub trait Target: Clone + Copy + std::hash::Hash + Eq + Default + Debug + 'static {
    /// Get corresponding [TargetId] enum
    fn target_id() -> TargetId;

    fn line_size() -> u32;

    /// Widths of the target's vector registers in bytes, widest first.
    fn vector_bytes() -> &'static [u32];

    /// Returns `false` if the target has no kernels for `kind` over `dtype`.
    fn supports(kind: OpKind, dtype: Dtype) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum TargetId {
    X86,
    X86Avx512,
    Arm,
}

impl TargetId {
    pub fn name(&self) -> &'static str {
        match self {
            TargetId::X86 => "x86",
            TargetId::X86Avx512 => "x86-avx512",
            TargetId::Arm => "arm",
        }
    }
}
