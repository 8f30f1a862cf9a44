pub mod builder;
pub mod edit;
mod op;
pub mod schema;

pub use builder::SubgraphBuilder;
pub use op::OpKind;

use crate::attrs::Attributes;
use crate::fusion::FusionInfoManager;
use crate::oracle::cache::PdCache;
use crate::oracle::layout_id::LayoutIdManager;
use crate::tensor::{LogicalTensor, TensorId};

use std::collections::VecDeque;
use std::fmt;

/// Index of an [Op] in its [Subgraph]'s arena. Stable for the life of the subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub usize);

/// Index of a [Value] in its [Subgraph]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub usize);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An edge of the graph: one tensor plus its producer and consumers.
///
/// A value without a producer is a boundary input; one without consumers is a boundary output.
#[derive(Debug, Clone)]
pub struct Value {
    pub tensor: LogicalTensor,
    pub producer: Option<(OpId, usize)>,
    pub consumers: Vec<(OpId, usize)>,
}

impl Value {
    pub fn new(tensor: LogicalTensor) -> Self {
        Value {
            tensor,
            producer: None,
            consumers: vec![],
        }
    }

    fn is_linked(&self) -> bool {
        self.producer.is_some() || !self.consumers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub attrs: Attributes,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub scratchpad_slot: Option<usize>,
    pub workspace_slot: Option<usize>,
}

impl Op {
    fn new(kind: OpKind, attrs: Attributes) -> Self {
        Op {
            kind,
            attrs,
            inputs: vec![],
            outputs: vec![],
            scratchpad_slot: None,
            workspace_slot: None,
        }
    }

    /// Returns `true` if output `slot` is a buffer appended by layout propagation.
    pub fn is_derived_output(&self, slot: usize) -> bool {
        self.scratchpad_slot == Some(slot) || self.workspace_slot == Some(slot)
    }

    /// Returns `true` if output `slot` is the secondary output of a [OpKind::ConvDepthwise], which
    /// may be left undecided and is dropped when nothing reads it.
    pub fn is_optional_output(&self, slot: usize) -> bool {
        self.kind == OpKind::ConvDepthwise && slot == 1 && !self.is_derived_output(slot)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{op} input {slot} reads {value}, which does not list it as a consumer")]
    MissingConsumer { op: OpId, slot: usize, value: ValueId },
    #[error("{op} output {slot} writes {value}, whose producer is {actual:?}")]
    WrongProducer {
        op: OpId,
        slot: usize,
        value: ValueId,
        actual: Option<(OpId, usize)>,
    },
    #[error("{kind} cannot have {inputs} inputs and {outputs} outputs")]
    Arity {
        kind: OpKind,
        inputs: usize,
        outputs: usize,
    },
    #[error("{kind} {op} has no use for input {slot} with these attributes")]
    InputWithoutRole { op: OpId, kind: OpKind, slot: usize },
    #[error("{kind} {op} has no use for output {slot} with these attributes")]
    OutputWithoutRole { op: OpId, kind: OpKind, slot: usize },
    #[error("{tensor:?} is produced by both {first} and {second}")]
    MultipleProducers {
        tensor: TensorId,
        first: OpId,
        second: OpId,
    },
}

/// A fused subgraph of ops, owned exclusively while passes run over it.
///
/// Ops and values live in arenas addressed by [OpId] and [ValueId]. Removed ops leave a hole
/// in the arena so that ids stay valid. The subgraph also owns the per-compilation state the
/// passes need: the engine, fusion attributes, the primitive-descriptor cache, and the registry
/// of opaque layouts.
pub struct Subgraph<E> {
    ops: Vec<Option<Op>>,
    values: Vec<Value>,
    order: Vec<OpId>,
    inputs: Vec<LogicalTensor>,
    outputs: Vec<LogicalTensor>,
    pub engine: E,
    pub fusion_info: FusionInfoManager,
    pub pd_cache: PdCache,
    pub layout_ids: LayoutIdManager,
    next_tensor_id: u64,
}

impl<E> Subgraph<E> {
    pub(crate) fn new(engine: E, fusion_info: FusionInfoManager) -> Self {
        Subgraph {
            ops: vec![],
            values: vec![],
            order: vec![],
            inputs: vec![],
            outputs: vec![],
            engine,
            fusion_info,
            pd_cache: PdCache::default(),
            layout_ids: LayoutIdManager::default(),
            next_tensor_id: 0,
        }
    }

    pub fn op(&self, id: OpId) -> &Op {
        self.ops[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("{id} was removed"))
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Op {
        self.ops[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("{id} was removed"))
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0]
    }

    pub fn tensor(&self, id: ValueId) -> &LogicalTensor {
        &self.values[id.0].tensor
    }

    pub fn tensor_mut(&mut self, id: ValueId) -> &mut LogicalTensor {
        &mut self.values[id.0].tensor
    }

    pub fn input(&self, op: OpId, slot: usize) -> ValueId {
        self.op(op).inputs[slot]
    }

    pub fn output(&self, op: OpId, slot: usize) -> ValueId {
        self.op(op).outputs[slot]
    }

    /// Ops in insertion order.
    pub fn op_ids(&self) -> &[OpId] {
        &self.order
    }

    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Op)> + '_ {
        self.order.iter().map(|&id| (id, self.op(id)))
    }

    pub fn op_count(&self) -> usize {
        self.order.len()
    }

    pub fn count_kind(&self, kind: OpKind) -> usize {
        self.ops().filter(|(_, op)| op.kind == kind).count()
    }

    /// Boundary input records, as handed over by the caller.
    pub fn inputs(&self) -> &[LogicalTensor] {
        &self.inputs
    }

    /// Boundary output records, as handed over by the caller.
    pub fn outputs(&self) -> &[LogicalTensor] {
        &self.outputs
    }

    pub(crate) fn boundary_mut(&mut self) -> (&mut [LogicalTensor], &mut [LogicalTensor]) {
        (&mut self.inputs, &mut self.outputs)
    }

    pub(crate) fn set_boundary(
        &mut self,
        inputs: Vec<LogicalTensor>,
        outputs: Vec<LogicalTensor>,
    ) {
        self.inputs = inputs;
        self.outputs = outputs;
    }

    /// Finds the linked value carrying the tensor `id`.
    pub fn value_by_tensor_id(&self, id: TensorId) -> Option<ValueId> {
        self.values
            .iter()
            .position(|v| v.tensor.id == id && v.is_linked())
            .map(ValueId)
    }

    pub fn fresh_tensor_id(&mut self) -> TensorId {
        let id = TensorId(self.next_tensor_id);
        self.next_tensor_id += 1;
        id
    }

    pub(crate) fn reserve_tensor_id(&mut self, id: TensorId) {
        self.next_tensor_id = self.next_tensor_id.max(id.0 + 1);
    }

    pub fn push_value(&mut self, tensor: LogicalTensor) -> ValueId {
        self.values.push(Value::new(tensor));
        ValueId(self.values.len() - 1)
    }

    /// Allocates an op in the arena without joining it to the op order. See
    /// [edit::SubgraphRewriter] and [Subgraph::attach].
    pub fn create_op(&mut self, kind: OpKind, attrs: Attributes) -> OpId {
        self.ops.push(Some(Op::new(kind, attrs)));
        OpId(self.ops.len() - 1)
    }

    pub(crate) fn attach(&mut self, op: OpId) {
        debug_assert!(!self.order.contains(&op), "{op} attached twice");
        self.order.push(op);
    }

    /// Puts `new` at `old`'s position in the op order and frees `old`'s arena slot. The caller
    /// must already have moved every link.
    pub(crate) fn retire(&mut self, old: OpId, new: OpId) {
        let pos = self
            .order
            .iter()
            .position(|&o| o == old)
            .unwrap_or_else(|| panic!("{old} is not attached"));
        self.order[pos] = new;
        self.ops[old.0] = None;
    }

    pub fn is_attached(&self, op: OpId) -> bool {
        self.order.contains(&op)
    }

    /// Appends `value` to the inputs of `op`, returning its slot.
    pub fn connect_input(&mut self, op: OpId, value: ValueId) -> usize {
        let slot = self.op(op).inputs.len();
        self.op_mut(op).inputs.push(value);
        self.values[value.0].consumers.push((op, slot));
        slot
    }

    /// Appends `value` to the outputs of `op`, returning its slot.
    pub fn connect_output(&mut self, op: OpId, value: ValueId) -> usize {
        assert!(
            self.values[value.0].producer.is_none(),
            "{value} already has a producer"
        );
        let slot = self.op(op).outputs.len();
        self.op_mut(op).outputs.push(value);
        self.values[value.0].producer = Some((op, slot));
        slot
    }

    /// Unlinks and deletes `op`. Its values stay in the arena.
    pub fn remove_op(&mut self, id: OpId) {
        let op = self.ops[id.0]
            .take()
            .unwrap_or_else(|| panic!("{id} was removed"));
        for &v in &op.inputs {
            self.values[v.0].consumers.retain(|(c, _)| *c != id);
        }
        for &v in &op.outputs {
            if matches!(self.values[v.0].producer, Some((p, _)) if p == id) {
                self.values[v.0].producer = None;
            }
        }
        self.order.retain(|&o| o != id);
        self.pd_cache.remove(id);
    }

    /// Returns attached ops so that every producer precedes its consumers. Ties keep insertion
    /// order.
    pub fn topo_order(&self) -> Vec<OpId> {
        let mut position = vec![None; self.ops.len()];
        for (i, &id) in self.order.iter().enumerate() {
            position[id.0] = Some(i);
        }
        let mut in_degree = vec![0u32; self.order.len()];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); self.order.len()];
        for (i, &id) in self.order.iter().enumerate() {
            for &v in &self.op(id).inputs {
                if let Some((p, _)) = self.values[v.0].producer {
                    if let Some(pi) = position[p.0] {
                        adj[pi].push(i);
                        in_degree[i] += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.order.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(u) = queue.pop_front() {
            sorted.push(self.order[u]);
            for &w in &adj[u] {
                in_degree[w] -= 1;
                if in_degree[w] == 0 {
                    queue.push_back(w);
                }
            }
        }
        assert_eq!(sorted.len(), self.order.len(), "subgraph is not acyclic");
        sorted
    }

    /// Visits attached ops in topological order, stopping at the first error.
    pub fn topo_visit<Err>(
        &mut self,
        mut visitor: impl FnMut(&mut Self, OpId) -> Result<(), Err>,
    ) -> Result<(), Err> {
        for op in self.topo_order() {
            visitor(self, op)?;
        }
        Ok(())
    }

    /// Checks that producer and consumer links agree with every op's slot lists.
    pub fn check_links(&self) -> Result<(), GraphError> {
        for (id, op) in self.ops() {
            for (slot, &value) in op.inputs.iter().enumerate() {
                if !self.values[value.0].consumers.contains(&(id, slot)) {
                    return Err(GraphError::MissingConsumer { op: id, slot, value });
                }
            }
            for (slot, &value) in op.outputs.iter().enumerate() {
                let actual = self.values[value.0].producer;
                if actual != Some((id, slot)) {
                    return Err(GraphError::WrongProducer {
                        op: id,
                        slot,
                        value,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}
