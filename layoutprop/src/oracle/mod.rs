//! The primitive-descriptor oracle: the interface to whatever engine picks physical layouts.

pub mod cache;
pub mod layout_id;

use crate::attrs::{keys, Attributes};
use crate::common::{Dtype, Shape};
use crate::fusion::PostOp;
use crate::graph::schema::{input_role, output_role};
use crate::graph::{OpId, OpKind, Subgraph, ValueId};
use crate::layout::{Layout, LayoutError};

use auto_impl::auto_impl;
use indexmap::IndexMap;
use log::trace;
use std::rc::Rc;

/// The part an operand plays in a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgRole {
    Src,
    Src1,
    Weights,
    DwWeights,
    Bias,
    Dst,
    DiffSrc,
    DiffWeights,
    DiffBias,
    DiffDst,
    DiffScale,
    DiffShift,
    Mean,
    Variance,
    Scale,
    Shift,
    Scales,
    ZeroPoints,
    FoldedWeights,
    FoldedBias,
    /// The `i`th input of a variadic op such as concat.
    Multiple(u8),
    /// The input of the `i`th post-op that takes one.
    PostOpSrc(u8),
    Scratchpad,
    Workspace,
}

/// A fully-decided memory descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDesc {
    pub shape: Shape,
    pub dtype: Dtype,
    pub layout: Layout,
}

/// One operand of a [DescriptorRequest]. `None` fields are left for the engine to decide: a
/// `None` layout requests the engine's preferred layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandRequest {
    pub role: ArgRole,
    pub shape: Option<Shape>,
    pub dtype: Option<Dtype>,
    pub layout: Option<Layout>,
}

#[derive(Debug, Clone)]
pub struct DescriptorRequest<'a> {
    pub kind: OpKind,
    pub attrs: &'a Attributes,
    pub inputs: Vec<OperandRequest>,
    pub outputs: Vec<OperandRequest>,
    pub post_ops: &'a [PostOp],
}

impl DescriptorRequest<'_> {
    pub fn input(&self, role: ArgRole) -> Option<&OperandRequest> {
        self.inputs.iter().find(|o| o.role == role)
    }
}

/// An engine's decision for one op: a memory descriptor per argument, plus the derived
/// scratchpad and (optional) workspace buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveDesc {
    pub kind: OpKind,
    mds: IndexMap<ArgRole, MemoryDesc>,
}

impl PrimitiveDesc {
    /// Creates a descriptor. `mds` must contain a [ArgRole::Scratchpad] entry.
    pub fn new(kind: OpKind, mds: IndexMap<ArgRole, MemoryDesc>) -> Self {
        debug_assert!(mds.contains_key(&ArgRole::Scratchpad));
        PrimitiveDesc { kind, mds }
    }

    pub fn query_md(&self, role: ArgRole) -> Option<&MemoryDesc> {
        self.mds.get(&role)
    }

    pub fn scratchpad(&self) -> &MemoryDesc {
        &self.mds[&ArgRole::Scratchpad]
    }

    pub fn workspace(&self) -> Option<&MemoryDesc> {
        self.mds.get(&ArgRole::Workspace)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("{engine} does not support {kind}: {reason}")]
    Unsupported {
        engine: String,
        kind: OpKind,
        reason: String,
    },
    #[error("{role:?} of {kind} has an unknown shape")]
    MissingShape { kind: OpKind, role: ArgRole },
    #[error("{role:?} of {kind} has an unknown dtype")]
    MissingDtype { kind: OpKind, role: ArgRole },
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),
}

#[auto_impl(&, Box, Rc)]
pub trait Engine {
    fn name(&self) -> &str;

    fn create_descriptor(
        &self,
        request: &DescriptorRequest,
    ) -> Result<PrimitiveDesc, DescriptorError>;
}

/// Kinds whose every operand is requested with the engine's preferred layout. All other kinds
/// pass the layouts their operands already have.
fn requests_preferred_layouts(kind: OpKind) -> bool {
    kind.is_conv_family() || kind == OpKind::MatMul
}

/// Returns the cached descriptor for `op`, or asks the engine for one and caches it.
///
/// The boolean is `true` only when the descriptor was created by this call.
pub fn get_or_create_descriptor<E: Engine>(
    sg: &mut Subgraph<E>,
    op: OpId,
) -> Result<(Rc<PrimitiveDesc>, bool), DescriptorError> {
    if let Some(pd) = sg.pd_cache.get(op) {
        return Ok((pd, false));
    }

    let pd = {
        let o = sg.op(op);
        let preferred = requests_preferred_layouts(o.kind);
        let operand = |value: ValueId, role: ArgRole| -> Result<_, DescriptorError> {
            let t = sg.tensor(value);
            let shape = t.concrete_shape();
            let layout = match (&shape, preferred) {
                // Padded strides have no [Layout]. The engine picks one and the op is fed
                // through a reorder.
                (Some(shape), false) => match sg.layout_ids.layout_of(&t.layout, shape) {
                    Err(LayoutError::NonDenseStrides(_)) => None,
                    layout => layout?,
                },
                _ => None,
            };
            Ok(OperandRequest {
                role,
                shape,
                dtype: t.dtype,
                layout,
            })
        };

        let mut inputs = Vec::with_capacity(o.inputs.len());
        for (slot, &v) in o.inputs.iter().enumerate() {
            if let Some(role) = input_role(o.kind, &o.attrs, slot) {
                inputs.push(operand(v, role)?);
            }
        }
        let mut outputs = Vec::with_capacity(o.outputs.len());
        for (slot, &v) in o.outputs.iter().enumerate() {
            if o.is_derived_output(slot) {
                continue;
            }
            if let Some(role) = output_role(o.kind, &o.attrs, slot) {
                let mut request = operand(v, role)?;
                request.layout = None;
                outputs.push(request);
            }
        }

        let post_ops = o
            .attrs
            .get_int(keys::FUSION_INFO_KEY)
            .and_then(|key| sg.fusion_info.get(key))
            .map(|info| &info.post_ops[..])
            .unwrap_or(&[]);
        let request = DescriptorRequest {
            kind: o.kind,
            attrs: &o.attrs,
            inputs,
            outputs,
            post_ops,
        };
        sg.engine.create_descriptor(&request)?
    };

    trace!("Created {} descriptor for {op}", pd.kind);
    let pd = sg.pd_cache.insert(op, pd);
    Ok((pd, true))
}
