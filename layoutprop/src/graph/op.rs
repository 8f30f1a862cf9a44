use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum OpKind {
    Convolution,
    /// A convolution with a fused depthwise convolution. Output 1, when present, is the
    /// intermediate result of the first convolution.
    ConvDepthwise,
    ConvBwdData,
    ConvBwdWeights,
    ConvTranspose,
    ConvTransposeBwdData,
    ConvTransposeBwdWeights,
    MatMul,
    Pool,
    PoolBwd,
    BatchNorm,
    BatchNormBwd,
    LayerNorm,
    LayerNormBwd,
    Softmax,
    LogSoftmax,
    SoftmaxBwd,
    Eltwise,
    EltwiseBwd,
    Binary,
    Prelu,
    PreluBwd,
    Reduction,
    Shuffle,
    Concat,
    Sum,
    Resampling,
    ResamplingBwd,
    /// Folds batch-norm parameters into convolution weights and bias.
    BnFolding,

    Permute,
    Transpose,
    Reshape,
    Expand,
    Squeeze,
    ToGroup,
    FromGroup,

    Reorder,
    TypeCast,
    MulScales,
    AddZps,
    SubZps,

    ConstantScales,
    ConstantZps,

    Quantize,
    Dequantize,
    Wildcard,
    End,
}

impl OpKind {
    pub fn is_conv_family(&self) -> bool {
        matches!(
            self,
            OpKind::Convolution
                | OpKind::ConvDepthwise
                | OpKind::ConvBwdData
                | OpKind::ConvBwdWeights
                | OpKind::ConvTranspose
                | OpKind::ConvTransposeBwdData
                | OpKind::ConvTransposeBwdWeights
        )
    }

    /// Ops that reinterpret a tensor's shape without moving data.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            OpKind::Permute
                | OpKind::Transpose
                | OpKind::Reshape
                | OpKind::Expand
                | OpKind::Squeeze
                | OpKind::ToGroup
                | OpKind::FromGroup
        )
    }

    /// Ops that move data between layouts, possibly rescaling it on the way.
    pub fn is_reorder_like(&self) -> bool {
        matches!(
            self,
            OpKind::Reorder | OpKind::TypeCast | OpKind::MulScales | OpKind::AddZps | OpKind::SubZps
        )
    }
}
