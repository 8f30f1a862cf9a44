use super::schema::{arity, input_role, output_role};
use super::{GraphError, Op, OpId, OpKind, Subgraph, ValueId};
use crate::attrs::Attributes;
use crate::fusion::FusionInfoManager;
use crate::tensor::{LayoutType, LogicalTensor, TensorId};

use std::collections::HashMap;

/// Assembles a [Subgraph] from ops described by the tensors they read and write.
///
/// Tensors are linked by [TensorId]. When an id appears more than once, later records fill in
/// whatever earlier ones left unknown. Tensors that no op produces become boundary inputs and
/// tensors that no op consumes become boundary outputs, except the optional secondary outputs of
/// ops such as [OpKind::ConvDepthwise].
#[derive(Default)]
pub struct SubgraphBuilder {
    ops: Vec<(OpKind, Attributes, Vec<LogicalTensor>, Vec<LogicalTensor>)>,
    fusion_info: FusionInfoManager,
}

impl SubgraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an op, returning the [OpId] it will have in the built [Subgraph].
    pub fn add_op(
        &mut self,
        kind: OpKind,
        attrs: Attributes,
        inputs: Vec<LogicalTensor>,
        outputs: Vec<LogicalTensor>,
    ) -> OpId {
        self.ops.push((kind, attrs, inputs, outputs));
        OpId(self.ops.len() - 1)
    }

    pub fn fusion_info_mut(&mut self) -> &mut FusionInfoManager {
        &mut self.fusion_info
    }

    pub fn build<E>(self, engine: E) -> Result<Subgraph<E>, GraphError> {
        let mut sg = Subgraph::new(engine, self.fusion_info);
        let mut by_id: HashMap<TensorId, ValueId> = HashMap::new();

        let mut link = |sg: &mut Subgraph<E>, t: LogicalTensor| -> ValueId {
            sg.reserve_tensor_id(t.id);
            match by_id.get(&t.id) {
                Some(&v) => {
                    merge_record(sg.tensor_mut(v), t);
                    v
                }
                None => {
                    let id = t.id;
                    let v = sg.push_value(t);
                    by_id.insert(id, v);
                    v
                }
            }
        };

        for (kind, attrs, inputs, outputs) in self.ops {
            let expected = arity(kind);
            if !expected.inputs.contains(&inputs.len())
                || !expected.outputs.contains(&outputs.len())
            {
                return Err(GraphError::Arity {
                    kind,
                    inputs: inputs.len(),
                    outputs: outputs.len(),
                });
            }
            let op = sg.create_op(kind, attrs);
            check_roles(op, sg.op(op), inputs.len(), outputs.len())?;
            for t in inputs {
                let v = link(&mut sg, t);
                sg.connect_input(op, v);
            }
            for t in outputs {
                let v = link(&mut sg, t);
                if let Some((producer, _)) = sg.value(v).producer {
                    return Err(GraphError::MultipleProducers {
                        tensor: sg.tensor(v).id,
                        first: producer,
                        second: op,
                    });
                }
                sg.connect_output(op, v);
            }
            sg.attach(op);
        }

        let mut values: Vec<ValueId> = by_id.into_values().collect();
        values.sort();
        let inputs = values
            .iter()
            .filter(|&&v| sg.value(v).producer.is_none())
            .map(|&v| sg.tensor(v).clone())
            .collect();
        let outputs = values
            .iter()
            .filter(|&&v| {
                let value = sg.value(v);
                let optional = value
                    .producer
                    .is_some_and(|(op, slot)| sg.op(op).is_optional_output(slot));
                value.consumers.is_empty() && !optional
            })
            .map(|&v| sg.tensor(v).clone())
            .collect();
        sg.set_boundary(inputs, outputs);
        Ok(sg)
    }
}

/// Rejects slots the op's attributes give no role, such as statistics inputs of a training
/// [OpKind::BatchNorm]. [OpKind::Wildcard] slots are opaque and never checked.
fn check_roles(id: OpId, op: &Op, inputs: usize, outputs: usize) -> Result<(), GraphError> {
    if op.kind == OpKind::Wildcard {
        return Ok(());
    }
    let kind = op.kind;
    if let Some(slot) = (0..inputs).find(|&s| input_role(kind, &op.attrs, s).is_none()) {
        return Err(GraphError::InputWithoutRole { op: id, kind, slot });
    }
    if let Some(slot) = (0..outputs)
        .find(|&s| output_role(kind, &op.attrs, s).is_none() && !op.is_optional_output(s))
    {
        return Err(GraphError::OutputWithoutRole { op: id, kind, slot });
    }
    Ok(())
}

fn merge_record(existing: &mut LogicalTensor, other: LogicalTensor) {
    if existing.dtype.is_none() {
        existing.dtype = other.dtype;
    }
    if existing.dims.is_none() {
        existing.dims = other.dims;
    }
    if existing.layout == LayoutType::Any {
        existing.layout = other.layout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::keys;
    use crate::common::Dtype;
    use crate::shape;
    use crate::testing::{engine, rm, t};

    #[test]
    fn test_boundaries_are_unproduced_and_unconsumed_values() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![8])],
            vec![t(1, Dtype::Float32, &shape![8])],
        );
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![t(1, Dtype::Float32, &shape![8])],
            vec![t(2, Dtype::Float32, &shape![8])],
        );
        let mut sg = b.build(engine()).unwrap();
        assert_eq!(
            sg.inputs().iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![TensorId(0)]
        );
        assert_eq!(
            sg.outputs().iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![TensorId(2)]
        );
        assert_eq!(sg.fresh_tensor_id(), TensorId(3));
    }

    #[test]
    fn test_later_records_fill_unknown_fields() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![8])],
            vec![LogicalTensor::undefined(TensorId(1))],
        );
        b.add_op(
            OpKind::End,
            Attributes::new(),
            vec![t(1, Dtype::Float32, &shape![8])],
            vec![],
        );
        let sg = b.build(engine()).unwrap();
        let v = sg.value_by_tensor_id(TensorId(1)).unwrap();
        assert_eq!(sg.tensor(v).dtype, Some(Dtype::Float32));
        assert_eq!(sg.tensor(v).concrete_shape(), Some(shape![8]));
    }

    #[test]
    fn test_arity_is_checked() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Pool,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![8]), rm(1, Dtype::Float32, &shape![8])],
            vec![t(2, Dtype::Float32, &shape![8])],
        );
        assert!(matches!(
            b.build(engine()),
            Err(GraphError::Arity { kind: OpKind::Pool, inputs: 2, outputs: 1 })
        ));
    }

    fn batch_norm(attrs: Attributes, inputs: usize, outputs: usize) -> Result<(), GraphError> {
        let mut b = SubgraphBuilder::new();
        let src = rm(0, Dtype::Float32, &shape![2, 16, 3, 3]);
        let params = (1..inputs as u64).map(|id| rm(id, Dtype::Float32, &shape![16]));
        let dst = t(10, Dtype::Float32, &shape![2, 16, 3, 3]);
        let stats = (11..10 + outputs as u64).map(|id| t(id, Dtype::Float32, &shape![16]));
        b.add_op(
            OpKind::BatchNorm,
            attrs,
            std::iter::once(src).chain(params).collect(),
            std::iter::once(dst).chain(stats).collect(),
        );
        b.build(engine()).map(|_| ())
    }

    #[test]
    fn test_slots_are_checked_against_attributes() {
        let training = Attributes::new().with(keys::IS_TRAINING, true);
        assert_eq!(batch_norm(training.clone(), 3, 3), Ok(()));
        assert_eq!(batch_norm(Attributes::new(), 5, 1), Ok(()));
        assert_eq!(
            batch_norm(training, 4, 3),
            Err(GraphError::InputWithoutRole {
                op: OpId(0),
                kind: OpKind::BatchNorm,
                slot: 3
            })
        );
        assert_eq!(
            batch_norm(Attributes::new(), 5, 3),
            Err(GraphError::OutputWithoutRole {
                op: OpId(0),
                kind: OpKind::BatchNorm,
                slot: 1
            })
        );
    }

    #[test]
    fn test_layer_norm_statistics_need_keep_stats() {
        let build = |attrs: Attributes| {
            let mut b = SubgraphBuilder::new();
            b.add_op(
                OpKind::LayerNorm,
                attrs,
                vec![rm(0, Dtype::Float32, &shape![4, 32])],
                vec![
                    t(1, Dtype::Float32, &shape![4, 32]),
                    t(2, Dtype::Float32, &shape![4]),
                    t(3, Dtype::Float32, &shape![4]),
                ],
            );
            b.build(engine()).map(|_| ())
        };
        assert_eq!(build(Attributes::new().with(keys::KEEP_STATS, true)), Ok(()));
        assert!(matches!(
            build(Attributes::new()),
            Err(GraphError::OutputWithoutRole { slot: 1, .. })
        ));
    }
}
