use crate::common::Dtype;
use crate::graph::OpKind;
use crate::target::{Target, TargetId};

use serde::Serialize;

#[derive(Clone, Copy, Hash, Eq, PartialEq, Default, Debug, Serialize)]
pub struct ArmTarget;

impl Target for ArmTarget {
    fn target_id() -> TargetId {
        TargetId::Arm
    }

    fn line_size() -> u32 {
        64
    }

    fn vector_bytes() -> &'static [u32] {
        &[16]
    }

    fn supports(kind: OpKind, dtype: Dtype) -> bool {
        // No half-precision convolution or matmul kernels.
        !(matches!(dtype, Dtype::Bfloat16 | Dtype::Float16)
            && (kind.is_conv_family() || kind == OpKind::MatMul))
    }
}

#[cfg(test)]
mod tests {
    use super::ArmTarget;
    use crate::common::Dtype;
    use crate::graph::OpKind;
    use crate::target::Target;

    #[test]
    fn test_arm_rejects_half_precision_convolution() {
        assert!(!ArmTarget::supports(OpKind::Convolution, Dtype::Bfloat16));
        assert!(ArmTarget::supports(OpKind::Convolution, Dtype::Float32));
        assert!(ArmTarget::supports(OpKind::Eltwise, Dtype::Bfloat16));
    }
}
