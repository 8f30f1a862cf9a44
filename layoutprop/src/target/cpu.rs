use crate::attrs::keys;
use crate::common::{volume, DimSize, Dtype, Shape};
use crate::fusion::PostOp;
use crate::graph::OpKind;
use crate::layout::{row_major, Layout, PhysDim};
use crate::oracle::{
    ArgRole, DescriptorError, DescriptorRequest, Engine, MemoryDesc, OperandRequest, PrimitiveDesc,
};
use crate::shape;
use crate::target::Target;

use divrem::DivRem;
use indexmap::IndexMap;
use nonzero::nonzero as nz;
use std::marker::PhantomData;

/// The [Engine] of a CPU [Target]: prefers channel-blocked layouts for convolutions, VNNI-blocked
/// weights for 8-bit matmuls, and otherwise keeps whatever layout operands already have.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuEngine<Tgt: Target> {
    _target: PhantomData<Tgt>,
}

impl<Tgt: Target> CpuEngine<Tgt> {
    pub fn new() -> Self {
        CpuEngine {
            _target: PhantomData,
        }
    }
}

impl<Tgt: Target> Engine for CpuEngine<Tgt> {
    fn name(&self) -> &str {
        Tgt::target_id().name()
    }

    fn create_descriptor(
        &self,
        request: &DescriptorRequest,
    ) -> Result<PrimitiveDesc, DescriptorError> {
        let kind = request.kind;
        if !is_primitive(kind) {
            return Err(self.unsupported(kind, "not a primitive".to_string()));
        }
        if let Some(dtype) = request.inputs.first().and_then(|o| o.dtype) {
            if !Tgt::supports(kind, dtype) {
                return Err(self.unsupported(kind, format!("no {dtype} kernels")));
            }
        }

        let mut policy = Policy::<Tgt> {
            request,
            mds: IndexMap::new(),
            _target: PhantomData,
        };
        if kind.is_conv_family() {
            policy.conv()?;
        } else if kind == OpKind::MatMul {
            policy.matmul()?;
        } else {
            policy.follow_inputs()?;
        }
        policy.post_op_inputs()?;
        policy.workspace()?;
        policy.scratchpad()?;
        Ok(PrimitiveDesc::new(kind, policy.mds))
    }
}

impl<Tgt: Target> CpuEngine<Tgt> {
    fn unsupported(&self, kind: OpKind, reason: String) -> DescriptorError {
        DescriptorError::Unsupported {
            engine: self.name().to_string(),
            kind,
            reason,
        }
    }
}

fn is_primitive(kind: OpKind) -> bool {
    !kind.is_structural()
        && !matches!(
            kind,
            OpKind::ConstantScales
                | OpKind::ConstantZps
                | OpKind::Quantize
                | OpKind::Dequantize
                | OpKind::Wildcard
                | OpKind::End
        )
}

/// Kinds whose primary output has the shape of their leading input.
fn preserves_shape(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Eltwise
            | OpKind::EltwiseBwd
            | OpKind::Binary
            | OpKind::Softmax
            | OpKind::LogSoftmax
            | OpKind::SoftmaxBwd
            | OpKind::Shuffle
            | OpKind::LayerNorm
            | OpKind::LayerNormBwd
            | OpKind::BatchNorm
            | OpKind::BatchNormBwd
            | OpKind::Prelu
            | OpKind::PreluBwd
            | OpKind::Sum
            | OpKind::BnFolding
    ) || kind.is_reorder_like()
}

/// Kinds whose primary output has the dtype of their leading input.
fn preserves_dtype(kind: OpKind) -> bool {
    !(kind.is_conv_family() || kind == OpKind::MatMul || kind.is_reorder_like())
}

fn is_data_role(role: ArgRole) -> bool {
    matches!(
        role,
        ArgRole::Src
            | ArgRole::Src1
            | ArgRole::DiffDst
            | ArgRole::Dst
            | ArgRole::Weights
            | ArgRole::Multiple(_)
    )
}

/// Elements of `dtype` in the target's widest vector register.
fn vector_values<Tgt: Target>(dtype: Dtype) -> Option<DimSize> {
    match Tgt::vector_bytes()[0].div_rem(u32::from(dtype.size())) {
        (n, 0) if n > 1 => DimSize::new(n),
        _ => None,
    }
}

/// `nChw{v}c`: the channel dimension (1) blocked by `v`, innermost.
fn channel_blocked(shape: &[DimSize], v: DimSize) -> Option<Layout> {
    if shape.len() < 3 || shape[1].get() % v.get() != 0 {
        return None;
    }
    let rank = u8::try_from(shape.len()).unwrap();
    let mut dims = (0..rank).map(|d| (d, PhysDim::Dynamic)).collect::<Vec<_>>();
    dims.push((1, PhysDim::Packed(v)));
    Some(Layout::new(dims))
}

/// `OIhw{v}i{v}o`, preceded by a group dimension when `grouped`.
fn weights_blocked(shape: &[DimSize], v: DimSize, grouped: bool) -> Option<Layout> {
    let o = u8::from(grouped);
    let i = o + 1;
    if shape.len() < usize::from(i) + 2
        || shape[usize::from(o)].get() % v.get() != 0
        || shape[usize::from(i)].get() % v.get() != 0
    {
        return None;
    }
    let rank = u8::try_from(shape.len()).unwrap();
    let mut dims = (0..rank).map(|d| (d, PhysDim::Dynamic)).collect::<Vec<_>>();
    dims.push((i, PhysDim::Packed(v)));
    dims.push((o, PhysDim::Packed(v)));
    Some(Layout::new(dims))
}

/// `Goihw{v}g`: depthwise weights blocked over their leading dimension.
fn depthwise_blocked(shape: &[DimSize], v: DimSize) -> Option<Layout> {
    if shape.is_empty() || shape[0].get() % v.get() != 0 {
        return None;
    }
    let rank = u8::try_from(shape.len()).unwrap();
    let mut dims = (0..rank).map(|d| (d, PhysDim::Dynamic)).collect::<Vec<_>>();
    dims.push((0, PhysDim::Packed(v)));
    Some(Layout::new(dims))
}

/// The reduction dimension (`K`, second to last) blocked by 4, as VNNI instructions consume
/// 8-bit weights.
fn vnni_blocked(shape: &[DimSize]) -> Option<Layout> {
    if shape.len() < 2 || shape[shape.len() - 2].get() % 4 != 0 {
        return None;
    }
    let rank = u8::try_from(shape.len()).unwrap();
    let mut dims = (0..rank).map(|d| (d, PhysDim::Dynamic)).collect::<Vec<_>>();
    dims.push((rank - 2, PhysDim::Packed(nz!(4u32))));
    Some(Layout::new(dims))
}

struct Policy<'r, Tgt: Target> {
    request: &'r DescriptorRequest<'r>,
    mds: IndexMap<ArgRole, MemoryDesc>,
    _target: PhantomData<Tgt>,
}

impl<Tgt: Target> Policy<'_, Tgt> {
    fn shape_of(&self, o: &OperandRequest) -> Result<Shape, DescriptorError> {
        o.shape.clone().ok_or(DescriptorError::MissingShape {
            kind: self.request.kind,
            role: o.role,
        })
    }

    fn dtype_of(&self, o: &OperandRequest) -> Result<Dtype, DescriptorError> {
        o.dtype.ok_or(DescriptorError::MissingDtype {
            kind: self.request.kind,
            role: o.role,
        })
    }

    fn set(&mut self, role: ArgRole, shape: Shape, dtype: Dtype, layout: Layout) {
        debug_assert!(layout.applies_to_shape(&shape), "{layout} for {shape:?}");
        self.mds.insert(
            role,
            MemoryDesc {
                shape,
                dtype,
                layout,
            },
        );
    }

    /// Records an input in the layout it already has, or row-major if it has none.
    fn keep_input(&mut self, o: &OperandRequest) -> Result<(), DescriptorError> {
        let shape = self.shape_of(o)?;
        let layout = o.layout.clone().unwrap_or_else(|| row_major(&shape));
        let dtype = self.dtype_of(o)?;
        self.set(o.role, shape, dtype, layout);
        Ok(())
    }

    fn plain_input(&mut self, o: &OperandRequest) -> Result<(), DescriptorError> {
        let shape = self.shape_of(o)?;
        let dtype = self.dtype_of(o)?;
        self.set(o.role, shape.clone(), dtype, row_major(&shape));
        Ok(())
    }

    fn leading_input(&self) -> Option<&MemoryDesc> {
        self.request
            .inputs
            .iter()
            .find(|o| is_data_role(o.role))
            .and_then(|o| self.mds.get(&o.role))
    }

    fn output_shape(&self, o: &OperandRequest) -> Result<Shape, DescriptorError> {
        match (&o.shape, self.leading_input()) {
            (Some(shape), _) => Ok(shape.clone()),
            (None, Some(lead)) if preserves_shape(self.request.kind) => Ok(lead.shape.clone()),
            (None, _) => self.shape_of(o),
        }
    }

    fn output_dtype(&self, o: &OperandRequest) -> Result<Dtype, DescriptorError> {
        match (o.dtype, self.leading_input()) {
            (Some(dtype), _) => Ok(dtype),
            (None, Some(lead)) if preserves_dtype(self.request.kind) => Ok(lead.dtype),
            (None, _) => self.dtype_of(o),
        }
    }

    fn conv(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        let activation_rank = req
            .input(ArgRole::Src)
            .or_else(|| req.input(ArgRole::DiffDst))
            .and_then(|o| o.shape.as_ref())
            .map(|s| s.len());
        let grouped = |weights: &[DimSize]| Some(weights.len()) == activation_rank.map(|r| r + 1);

        for o in &req.inputs {
            if let ArgRole::PostOpSrc(_) = o.role {
                continue;
            }
            let shape = self.shape_of(o)?;
            let dtype = self.dtype_of(o)?;
            let blocked = vector_values::<Tgt>(dtype).and_then(|v| match o.role {
                ArgRole::Src | ArgRole::DiffDst => channel_blocked(&shape, v),
                ArgRole::Weights => weights_blocked(&shape, v, grouped(&shape)),
                ArgRole::DwWeights => depthwise_blocked(&shape, v),
                _ => None,
            });
            let layout = blocked.unwrap_or_else(|| row_major(&shape));
            self.set(o.role, shape, dtype, layout);
        }
        for o in &req.outputs {
            let shape = self.shape_of(o)?;
            let dtype = self.output_dtype(o)?;
            let blocked = vector_values::<Tgt>(dtype).and_then(|v| match o.role {
                ArgRole::Dst | ArgRole::DiffSrc => channel_blocked(&shape, v),
                ArgRole::DiffWeights => weights_blocked(&shape, v, grouped(&shape)),
                _ => None,
            });
            let layout = blocked.unwrap_or_else(|| row_major(&shape));
            self.set(o.role, shape, dtype, layout);
        }
        Ok(())
    }

    fn matmul(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        for o in &req.inputs {
            if let ArgRole::PostOpSrc(_) = o.role {
                continue;
            }
            let shape = self.shape_of(o)?;
            let dtype = self.dtype_of(o)?;
            let layout = match o.role {
                ArgRole::Weights if dtype.is_8bit() => vnni_blocked(&shape),
                _ => None,
            };
            let layout = layout.unwrap_or_else(|| row_major(&shape));
            self.set(o.role, shape, dtype, layout);
        }
        for o in &req.outputs {
            let shape = self.shape_of(o)?;
            let dtype = self.output_dtype(o)?;
            self.set(o.role, shape.clone(), dtype, row_major(&shape));
        }
        Ok(())
    }

    /// Data inputs keep their layouts and outputs follow the leading input where they can.
    fn follow_inputs(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        let kind = req.kind;
        for o in &req.inputs {
            match o.role {
                ArgRole::PostOpSrc(_) => {}
                role if is_data_role(role) => self.keep_input(o)?,
                _ => self.plain_input(o)?,
            }
        }

        for o in &req.outputs {
            match o.role {
                ArgRole::Mean | ArgRole::Variance => self.statistics(o)?,
                ArgRole::Dst | ArgRole::DiffSrc | ArgRole::FoldedWeights => {
                    let shape = self.output_shape(o)?;
                    let dtype = self.output_dtype(o)?;
                    let followed = match kind {
                        OpKind::Reduction => None,
                        OpKind::BnFolding => self.mds.get(&ArgRole::Weights),
                        _ => req
                            .inputs
                            .iter()
                            .filter(|i| is_data_role(i.role))
                            .filter_map(|i| self.mds.get(&i.role))
                            .find(|md| md.shape.len() == shape.len()),
                    };
                    let layout = followed
                        .map(|md| md.layout.clone())
                        .filter(|l| l.applies_to_shape(&shape))
                        .unwrap_or_else(|| row_major(&shape));
                    self.set(o.role, shape, dtype, layout);
                }
                _ => {
                    // Parameter gradients and folded bias: plain, shaped like the parameter.
                    let param = match o.role {
                        ArgRole::DiffScale => req.input(ArgRole::Scale),
                        ArgRole::DiffShift => req.input(ArgRole::Shift),
                        ArgRole::DiffWeights => req.input(ArgRole::Weights),
                        ArgRole::FoldedBias => {
                            req.input(ArgRole::Bias).or(req.input(ArgRole::Shift))
                        }
                        _ => None,
                    };
                    let shape = match (&o.shape, param.and_then(|p| p.shape.as_ref())) {
                        (Some(s), _) | (None, Some(s)) => s.clone(),
                        (None, None) => self.shape_of(o)?,
                    };
                    let dtype = match (o.dtype, param.and_then(|p| p.dtype)) {
                        (Some(d), _) | (None, Some(d)) => d,
                        (None, None) => self.dtype_of(o)?,
                    };
                    self.set(o.role, shape.clone(), dtype, row_major(&shape));
                }
            }
        }
        Ok(())
    }

    /// Per-channel statistics of batch normalization, or per-row statistics of layer
    /// normalization. Always `f32`.
    fn statistics(&mut self, o: &OperandRequest) -> Result<(), DescriptorError> {
        let src = self
            .request
            .input(ArgRole::Src)
            .ok_or(DescriptorError::MissingShape {
                kind: self.request.kind,
                role: ArgRole::Src,
            })?;
        let src_shape = self.shape_of(src)?;
        let shape = match (&o.shape, self.request.kind) {
            (Some(s), _) => s.clone(),
            (None, OpKind::BatchNorm) if src_shape.len() > 1 => shape![src_shape[1]],
            (None, OpKind::LayerNorm) if src_shape.len() > 1 => {
                src_shape[..src_shape.len() - 1].to_vec()
            }
            (None, _) => shape![1],
        };
        self.set(o.role, shape.clone(), Dtype::Float32, row_major(&shape));
        Ok(())
    }

    /// Inputs of fused post-ops. A sum accumulates into a tensor laid out like the
    /// destination; a binary post-op reads one laid out like the destination when shapes agree.
    fn post_op_inputs(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        let dst = req
            .outputs
            .first()
            .and_then(|o| self.mds.get(&o.role))
            .cloned();
        for o in &req.inputs {
            let ArgRole::PostOpSrc(k) = o.role else {
                continue;
            };
            let shape = self.shape_of(o)?;
            let post_op = req
                .post_ops
                .iter()
                .filter(|p| p.takes_input())
                .nth(usize::from(k));
            let like_dst = dst.as_ref().filter(|d| match post_op {
                Some(PostOp::Sum { .. }) => true,
                Some(PostOp::Binary { .. }) => d.shape == shape,
                _ => false,
            });
            let dtype = match (o.dtype, &dst) {
                (Some(d), _) => d,
                (None, Some(d)) => d.dtype,
                (None, None) => self.dtype_of(o)?,
            };
            let layout = like_dst
                .map(|d| d.layout.clone())
                .filter(|l| l.applies_to_shape(&shape))
                .unwrap_or_else(|| row_major(&shape));
            self.set(o.role, shape, dtype, layout);
        }
        Ok(())
    }

    fn workspace(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        if !req.attrs.get_bool(keys::IS_TRAINING) {
            return Ok(());
        }
        match req.kind {
            // Indices of the selected elements, laid out like the destination.
            OpKind::Pool => {
                if let Some(dst) = self.mds.get(&ArgRole::Dst).cloned() {
                    self.set(ArgRole::Workspace, dst.shape, Dtype::Uint8, dst.layout);
                }
            }
            // One bit per element for the fused ReLU.
            OpKind::BatchNorm if req.attrs.get_bool(keys::FUSE_RELU) => {
                if let Some(src) = self.mds.get(&ArgRole::Src) {
                    let bytes = divrem::DivCeil::div_ceil(volume(&src.shape), 8);
                    let shape = shape![u32::try_from(bytes).unwrap_or(u32::MAX)];
                    self.set(ArgRole::Workspace, shape.clone(), Dtype::Uint8, row_major(&shape));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn scratchpad(&mut self) -> Result<(), DescriptorError> {
        let req = self.request;
        let line = u64::from(Tgt::line_size());
        let lead = self.leading_input();
        let bytes = match req.kind {
            k if k.is_conv_family() || k == OpKind::MatMul => {
                let block = lead
                    .and_then(|md| vector_values::<Tgt>(md.dtype))
                    .map_or(1, |v| u64::from(v.get()));
                line * block
            }
            OpKind::Softmax
            | OpKind::LogSoftmax
            | OpKind::SoftmaxBwd
            | OpKind::LayerNorm
            | OpKind::LayerNormBwd
            | OpKind::Reduction => line,
            OpKind::BatchNorm if req.attrs.get_bool(keys::IS_TRAINING) => {
                lead.filter(|md| md.shape.len() > 1)
                    .map_or(0, |md| 2 * u64::from(md.shape[1].get()) * 4)
            }
            OpKind::BatchNormBwd => lead
                .filter(|md| md.shape.len() > 1)
                .map_or(0, |md| 2 * u64::from(md.shape[1].get()) * 4),
            k if k.is_reorder_like() => {
                let src = self.mds.get(&ArgRole::Src).map(|md| md.dtype);
                let dst = self.mds.get(&ArgRole::Dst).map(|md| md.dtype);
                if src != dst {
                    line
                } else {
                    0
                }
            }
            _ => 0,
        };
        let shape = shape![u32::try_from(bytes.max(1)).unwrap_or(u32::MAX)];
        self.set(ArgRole::Scratchpad, shape.clone(), Dtype::Uint8, row_major(&shape));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attributes;
    use crate::target::{ArmTarget, X86Avx512Target, X86Target};
    use crate::{layout, shape};

    fn operand(
        role: ArgRole,
        shape: Shape,
        dtype: Dtype,
        layout: Option<Layout>,
    ) -> OperandRequest {
        OperandRequest {
            role,
            shape: Some(shape),
            dtype: Some(dtype),
            layout,
        }
    }

    fn conv_request(attrs: &Attributes, channels: u32) -> DescriptorRequest<'_> {
        DescriptorRequest {
            kind: OpKind::Convolution,
            attrs,
            inputs: vec![
                operand(ArgRole::Src, shape![1, channels, 8, 8], Dtype::Float32, None),
                operand(ArgRole::Weights, shape![16, channels, 3, 3], Dtype::Float32, None),
            ],
            outputs: vec![operand(ArgRole::Dst, shape![1, 16, 6, 6], Dtype::Float32, None)],
            post_ops: &[],
        }
    }

    #[test]
    fn test_x86_conv_prefers_8_channel_blocking() {
        let attrs = Attributes::new();
        let pd = CpuEngine::<X86Target>::new()
            .create_descriptor(&conv_request(&attrs, 16))
            .unwrap();
        assert_eq!(pd.query_md(ArgRole::Src).unwrap().layout, layout![0, 1, 2, 3, 1 p(8)]);
        assert_eq!(
            pd.query_md(ArgRole::Weights).unwrap().layout,
            layout![0, 1, 2, 3, 1 p(8), 0 p(8)]
        );
        assert_eq!(pd.query_md(ArgRole::Dst).unwrap().layout, layout![0, 1, 2, 3, 1 p(8)]);
        assert_eq!(pd.scratchpad().dtype, Dtype::Uint8);
        assert_eq!(pd.scratchpad().shape, shape![32 * 8]);
    }

    #[test]
    fn test_avx512_conv_prefers_16_channel_blocking() {
        let attrs = Attributes::new();
        let pd = CpuEngine::<X86Avx512Target>::new()
            .create_descriptor(&conv_request(&attrs, 32))
            .unwrap();
        assert_eq!(pd.query_md(ArgRole::Src).unwrap().layout, layout![0, 1, 2, 3, 1 p(16)]);
    }

    #[test]
    fn test_conv_with_odd_channels_stays_plain() {
        let attrs = Attributes::new();
        let pd = CpuEngine::<X86Target>::new()
            .create_descriptor(&conv_request(&attrs, 3))
            .unwrap();
        assert!(pd.query_md(ArgRole::Src).unwrap().layout.is_row_major());
        assert!(pd.query_md(ArgRole::Weights).unwrap().layout.is_row_major());
    }

    #[test]
    fn test_arm_rejects_bf16_convolution() {
        let attrs = Attributes::new();
        let mut req = conv_request(&attrs, 16);
        for o in req.inputs.iter_mut().chain(req.outputs.iter_mut()) {
            o.dtype = Some(Dtype::Bfloat16);
        }
        assert!(matches!(
            CpuEngine::<ArmTarget>::new().create_descriptor(&req),
            Err(DescriptorError::Unsupported { kind: OpKind::Convolution, .. })
        ));
    }

    #[test]
    fn test_eltwise_dst_follows_src_and_fills_unknowns() {
        let attrs = Attributes::new();
        let s = shape![2, 3, 4];
        let req = DescriptorRequest {
            kind: OpKind::Eltwise,
            attrs: &attrs,
            inputs: vec![operand(
                ArgRole::Src,
                s.clone(),
                Dtype::Float32,
                Some(layout![2, 0, 1]),
            )],
            outputs: vec![OperandRequest {
                role: ArgRole::Dst,
                shape: None,
                dtype: None,
                layout: None,
            }],
            post_ops: &[],
        };
        let pd = CpuEngine::<X86Target>::new().create_descriptor(&req).unwrap();
        let dst = pd.query_md(ArgRole::Dst).unwrap();
        assert_eq!(dst.layout, layout![2, 0, 1]);
        assert_eq!(dst.shape, s);
        assert_eq!(dst.dtype, Dtype::Float32);
        assert_eq!(pd.scratchpad().shape, shape![1]);
    }

    #[test]
    fn test_int8_matmul_weights_are_vnni_blocked() {
        let attrs = Attributes::new();
        let req = DescriptorRequest {
            kind: OpKind::MatMul,
            attrs: &attrs,
            inputs: vec![
                operand(ArgRole::Src, shape![4, 64], Dtype::Uint8, None),
                operand(ArgRole::Weights, shape![64, 32], Dtype::Sint8, None),
            ],
            outputs: vec![operand(ArgRole::Dst, shape![4, 32], Dtype::Sint32, None)],
            post_ops: &[],
        };
        let pd = CpuEngine::<X86Target>::new().create_descriptor(&req).unwrap();
        assert_eq!(pd.query_md(ArgRole::Weights).unwrap().layout, layout![0, 1, 0 p(4)]);
        assert!(pd.query_md(ArgRole::Src).unwrap().layout.is_row_major());
    }

    #[test]
    fn test_training_pool_has_workspace_like_dst() {
        let attrs = Attributes::new().with(keys::IS_TRAINING, true);
        let req = DescriptorRequest {
            kind: OpKind::Pool,
            attrs: &attrs,
            inputs: vec![operand(ArgRole::Src, shape![1, 8, 4, 4], Dtype::Float32, None)],
            outputs: vec![operand(ArgRole::Dst, shape![1, 8, 2, 2], Dtype::Float32, None)],
            post_ops: &[],
        };
        let pd = CpuEngine::<X86Target>::new().create_descriptor(&req).unwrap();
        let ws = pd.workspace().unwrap();
        assert_eq!(ws.dtype, Dtype::Uint8);
        assert_eq!(ws.shape, shape![1, 8, 2, 2]);
        assert_eq!(ws.layout, pd.query_md(ArgRole::Dst).unwrap().layout);
    }

    #[test]
    fn test_batch_norm_training_statistics_are_per_channel() {
        let attrs = Attributes::new()
            .with(keys::IS_TRAINING, true)
            .with(keys::FUSE_RELU, true);
        let unknown = |role| OperandRequest {
            role,
            shape: None,
            dtype: None,
            layout: None,
        };
        let req = DescriptorRequest {
            kind: OpKind::BatchNorm,
            attrs: &attrs,
            inputs: vec![
                operand(ArgRole::Src, shape![2, 16, 3, 3], Dtype::Float32, None),
                operand(ArgRole::Scale, shape![16], Dtype::Float32, None),
                operand(ArgRole::Shift, shape![16], Dtype::Float32, None),
            ],
            outputs: vec![
                unknown(ArgRole::Dst),
                unknown(ArgRole::Mean),
                unknown(ArgRole::Variance),
            ],
            post_ops: &[],
        };
        let pd = CpuEngine::<X86Target>::new().create_descriptor(&req).unwrap();
        assert_eq!(pd.query_md(ArgRole::Mean).unwrap().shape, shape![16]);
        assert_eq!(pd.query_md(ArgRole::Variance).unwrap().dtype, Dtype::Float32);
        // 2 * 16 * 3 * 3 = 288 bits
        assert_eq!(pd.workspace().unwrap().shape, shape![36]);
    }

    #[test]
    fn test_structural_kinds_are_not_primitives() {
        let attrs = Attributes::new();
        let req = DescriptorRequest {
            kind: OpKind::Permute,
            attrs: &attrs,
            inputs: vec![],
            outputs: vec![],
            post_ops: &[],
        };
        assert!(CpuEngine::<X86Target>::new().create_descriptor(&req).is_err());
    }
}
