//! Fixed slot counts and slot roles for every [OpKind].

use super::OpKind;
use crate::attrs::{keys, Attributes};
use crate::oracle::ArgRole;

use std::ops::RangeInclusive;

/// Input and output slot counts an op of some kind may be built with. Outputs appended by layout
/// propagation (scratchpad, workspace) are not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arity {
    pub inputs: RangeInclusive<usize>,
    pub outputs: RangeInclusive<usize>,
}

const VARIADIC: usize = usize::MAX;

pub fn arity(kind: OpKind) -> Arity {
    let (inputs, outputs) = match kind {
        // Trailing inputs beyond the fixed ones feed post-ops.
        OpKind::Convolution | OpKind::ConvTranspose => (2..=VARIADIC, 1..=1),
        OpKind::ConvDepthwise => (3..=VARIADIC, 1..=2),
        OpKind::ConvBwdData | OpKind::ConvTransposeBwdData => (2..=2, 1..=1),
        OpKind::ConvBwdWeights | OpKind::ConvTransposeBwdWeights => (2..=2, 1..=2),
        OpKind::MatMul => (2..=VARIADIC, 1..=1),
        OpKind::Pool => (1..=1, 1..=1),
        OpKind::PoolBwd => (2..=2, 1..=1),
        OpKind::BatchNorm => (3..=5, 1..=3),
        OpKind::BatchNormBwd => (5..=5, 1..=3),
        OpKind::LayerNorm => (1..=3, 1..=3),
        OpKind::LayerNormBwd => (4..=6, 1..=3),
        OpKind::Softmax | OpKind::LogSoftmax => (1..=1, 1..=1),
        OpKind::SoftmaxBwd => (2..=2, 1..=1),
        OpKind::Eltwise => (1..=VARIADIC, 1..=1),
        OpKind::EltwiseBwd => (2..=2, 1..=1),
        OpKind::Binary => (2..=VARIADIC, 1..=1),
        OpKind::Prelu => (2..=2, 1..=1),
        OpKind::PreluBwd => (3..=3, 2..=2),
        OpKind::Reduction | OpKind::Shuffle | OpKind::Resampling => (1..=1, 1..=1),
        OpKind::ResamplingBwd => (1..=1, 1..=1),
        OpKind::Concat | OpKind::Sum => (1..=VARIADIC, 1..=1),
        OpKind::BnFolding => (5..=6, 2..=2),
        OpKind::Permute
        | OpKind::Transpose
        | OpKind::Reshape
        | OpKind::Expand
        | OpKind::Squeeze
        | OpKind::ToGroup
        | OpKind::FromGroup
        | OpKind::TypeCast
        | OpKind::Quantize
        | OpKind::Dequantize => (1..=1, 1..=1),
        OpKind::Reorder => (1..=3, 1..=1),
        OpKind::MulScales | OpKind::AddZps | OpKind::SubZps => (1..=2, 1..=1),
        OpKind::ConstantScales | OpKind::ConstantZps => (0..=0, 1..=1),
        OpKind::Wildcard => (0..=VARIADIC, 0..=VARIADIC),
        OpKind::End => (1..=1, 0..=0),
    };
    Arity { inputs, outputs }
}

/// Returns the role of input `slot`, or `None` if the slot carries no primitive argument.
pub fn input_role(kind: OpKind, attrs: &Attributes, slot: usize) -> Option<ArgRole> {
    let with_bias = attrs.get_bool(keys::WITH_BIAS);
    let fixed: &[ArgRole] = match kind {
        OpKind::Convolution | OpKind::ConvTranspose | OpKind::MatMul if with_bias => {
            &[ArgRole::Src, ArgRole::Weights, ArgRole::Bias]
        }
        OpKind::Convolution | OpKind::ConvTranspose | OpKind::MatMul => {
            &[ArgRole::Src, ArgRole::Weights]
        }
        OpKind::ConvDepthwise if with_bias => {
            &[ArgRole::Src, ArgRole::Weights, ArgRole::DwWeights, ArgRole::Bias]
        }
        OpKind::ConvDepthwise => &[ArgRole::Src, ArgRole::Weights, ArgRole::DwWeights],
        OpKind::ConvBwdData | OpKind::ConvTransposeBwdData => {
            &[ArgRole::DiffDst, ArgRole::Weights]
        }
        OpKind::ConvBwdWeights | OpKind::ConvTransposeBwdWeights => {
            &[ArgRole::Src, ArgRole::DiffDst]
        }
        OpKind::PoolBwd => &[ArgRole::Src, ArgRole::DiffDst],
        OpKind::BatchNorm if attrs.get_bool(keys::IS_TRAINING) => {
            &[ArgRole::Src, ArgRole::Scale, ArgRole::Shift]
        }
        OpKind::BatchNorm => &[
            ArgRole::Src,
            ArgRole::Scale,
            ArgRole::Shift,
            ArgRole::Mean,
            ArgRole::Variance,
        ],
        OpKind::BatchNormBwd => &[
            ArgRole::Src,
            ArgRole::DiffDst,
            ArgRole::Mean,
            ArgRole::Variance,
            ArgRole::Scale,
        ],
        OpKind::LayerNorm => &[ArgRole::Src, ArgRole::Scale, ArgRole::Shift],
        OpKind::LayerNormBwd => &[
            ArgRole::Src,
            ArgRole::DiffDst,
            ArgRole::Mean,
            ArgRole::Variance,
            ArgRole::Scale,
            ArgRole::Shift,
        ],
        OpKind::SoftmaxBwd => &[ArgRole::DiffDst, ArgRole::Dst],
        OpKind::EltwiseBwd if attrs.get_bool(keys::USE_DST) => &[ArgRole::Dst, ArgRole::DiffDst],
        OpKind::EltwiseBwd => &[ArgRole::Src, ArgRole::DiffDst],
        OpKind::Binary => &[ArgRole::Src, ArgRole::Src1],
        OpKind::Prelu => &[ArgRole::Src, ArgRole::Weights],
        OpKind::PreluBwd => &[ArgRole::Src, ArgRole::Weights, ArgRole::DiffDst],
        OpKind::ResamplingBwd => &[ArgRole::DiffDst],
        OpKind::Concat | OpKind::Sum => return u8::try_from(slot).ok().map(ArgRole::Multiple),
        OpKind::BnFolding if with_bias => &[
            ArgRole::Weights,
            ArgRole::Bias,
            ArgRole::Scale,
            ArgRole::Shift,
            ArgRole::Mean,
            ArgRole::Variance,
        ],
        OpKind::BnFolding => &[
            ArgRole::Weights,
            ArgRole::Scale,
            ArgRole::Shift,
            ArgRole::Mean,
            ArgRole::Variance,
        ],
        OpKind::Reorder => &[ArgRole::Src, ArgRole::Scales, ArgRole::ZeroPoints],
        OpKind::MulScales => &[ArgRole::Src, ArgRole::Scales],
        OpKind::AddZps | OpKind::SubZps => &[ArgRole::Src, ArgRole::ZeroPoints],
        OpKind::ConstantScales | OpKind::ConstantZps => &[],
        _ => &[ArgRole::Src],
    };
    match fixed.get(slot) {
        Some(role) => Some(*role),
        None if takes_post_op_inputs(kind) => {
            u8::try_from(slot - fixed.len()).ok().map(ArgRole::PostOpSrc)
        }
        None => None,
    }
}

/// Returns the role of output `slot`. Outputs with no role (such as the intermediate output of
/// [OpKind::ConvDepthwise]) are not described by primitive descriptors.
pub fn output_role(kind: OpKind, attrs: &Attributes, slot: usize) -> Option<ArgRole> {
    let fixed: &[ArgRole] = match kind {
        OpKind::ConvDepthwise => &[ArgRole::Dst],
        OpKind::ConvBwdData | OpKind::ConvTransposeBwdData | OpKind::ResamplingBwd => {
            &[ArgRole::DiffSrc]
        }
        OpKind::ConvBwdWeights | OpKind::ConvTransposeBwdWeights => {
            &[ArgRole::DiffWeights, ArgRole::DiffBias]
        }
        OpKind::PoolBwd | OpKind::SoftmaxBwd | OpKind::EltwiseBwd => &[ArgRole::DiffSrc],
        OpKind::BatchNorm if attrs.get_bool(keys::IS_TRAINING) => {
            &[ArgRole::Dst, ArgRole::Mean, ArgRole::Variance]
        }
        OpKind::LayerNorm if attrs.get_bool(keys::KEEP_STATS) => {
            &[ArgRole::Dst, ArgRole::Mean, ArgRole::Variance]
        }
        OpKind::BatchNormBwd | OpKind::LayerNormBwd => {
            &[ArgRole::DiffSrc, ArgRole::DiffScale, ArgRole::DiffShift]
        }
        OpKind::PreluBwd => &[ArgRole::DiffSrc, ArgRole::DiffWeights],
        OpKind::BnFolding => &[ArgRole::FoldedWeights, ArgRole::FoldedBias],
        OpKind::End => &[],
        _ => &[ArgRole::Dst],
    };
    fixed.get(slot).copied()
}

fn takes_post_op_inputs(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Convolution
            | OpKind::ConvDepthwise
            | OpKind::ConvTranspose
            | OpKind::MatMul
            | OpKind::Eltwise
            | OpKind::Binary
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_kind_has_a_consistent_arity() {
        for kind in OpKind::iter() {
            let Arity { inputs, outputs } = arity(kind);
            assert!(inputs.start() <= inputs.end(), "{kind}");
            assert!(outputs.start() <= outputs.end(), "{kind}");
        }
    }

    #[test]
    fn test_conv_post_op_inputs_follow_bias() {
        let attrs = Attributes::new().with(keys::WITH_BIAS, true);
        assert_eq!(input_role(OpKind::Convolution, &attrs, 2), Some(ArgRole::Bias));
        assert_eq!(
            input_role(OpKind::Convolution, &attrs, 3),
            Some(ArgRole::PostOpSrc(0))
        );
        assert_eq!(
            input_role(OpKind::Convolution, &Attributes::new(), 2),
            Some(ArgRole::PostOpSrc(0))
        );
    }

    #[test]
    fn test_depthwise_intermediate_output_has_no_role() {
        let attrs = Attributes::new();
        assert_eq!(output_role(OpKind::ConvDepthwise, &attrs, 0), Some(ArgRole::Dst));
        assert_eq!(output_role(OpKind::ConvDepthwise, &attrs, 1), None);
    }

    #[test]
    fn test_batch_norm_training_emits_statistics() {
        let training = Attributes::new().with(keys::IS_TRAINING, true);
        assert_eq!(output_role(OpKind::BatchNorm, &training, 1), Some(ArgRole::Mean));
        assert_eq!(output_role(OpKind::BatchNorm, &Attributes::new(), 1), None);
    }
}
