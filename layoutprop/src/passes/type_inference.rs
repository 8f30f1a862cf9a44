use super::{PassConfig, PassError};
use crate::common::Dtype;
use crate::graph::{OpId, OpKind, Subgraph};

use log::{debug, trace};

pub(super) fn run<E>(sg: &mut Subgraph<E>, config: &PassConfig) -> Result<usize, PassError> {
    if let Some(t) = sg
        .inputs()
        .iter()
        .chain(sg.outputs())
        .find(|t| t.dtype.is_none())
    {
        return Err(PassError::InvalidType(t.id));
    }

    let mut sweeps = 0;
    loop {
        sweeps += 1;
        let mut changed = 0usize;
        sg.topo_visit(|sg, op| {
            changed += infer_op(sg, op);
            Ok::<_, PassError>(())
        })?;
        debug!("Type inference sweep {sweeps}: {changed} dtypes inferred");
        if config.diagnostics {
            sg.check_links()?;
        }
        if changed == 0 {
            break;
        }
    }

    refresh_boundary(sg);
    Ok(sweeps)
}

/// Applies the rule for `op`'s kind, returning the number of dtypes it set.
fn infer_op<E>(sg: &mut Subgraph<E>, op: OpId) -> usize {
    match sg.op(op).kind {
        OpKind::ConstantScales => generate(sg, op, Dtype::Float32),
        OpKind::ConstantZps => generate(sg, op, Dtype::Sint32),
        OpKind::Permute
        | OpKind::Transpose
        | OpKind::Reorder
        | OpKind::Reshape
        | OpKind::Expand
        | OpKind::Squeeze
        | OpKind::ToGroup
        | OpKind::FromGroup
        | OpKind::Eltwise
        | OpKind::Binary
        | OpKind::Softmax
        | OpKind::LogSoftmax
        | OpKind::Shuffle => usize::from(pass_through(sg, op, 0, 0)),
        OpKind::BnFolding => {
            let o = sg.op(op);
            let pairs = o.inputs.len().min(o.outputs.len());
            let skip = o.scratchpad_slot;
            (0..pairs)
                .filter(|&slot| Some(slot) != skip)
                .map(|slot| usize::from(pass_through(sg, op, slot, slot)))
                .sum()
        }
        // The output type of the rest is a policy choice, not a consequence of their inputs.
        _ => 0,
    }
}

fn generate<E>(sg: &mut Subgraph<E>, op: OpId, dtype: Dtype) -> usize {
    let out = sg.output(op, 0);
    if sg.tensor(out).dtype.is_some() {
        return 0;
    }
    trace!("{op} generates {dtype}");
    sg.tensor_mut(out).set_dtype(dtype);
    1
}

fn pass_through<E>(sg: &mut Subgraph<E>, op: OpId, in_slot: usize, out_slot: usize) -> bool {
    let (i, o) = (sg.input(op, in_slot), sg.output(op, out_slot));
    match (sg.tensor(i).dtype, sg.tensor(o).dtype) {
        (Some(dtype), None) => {
            trace!("{op} passes {dtype} forward to output {out_slot}");
            sg.tensor_mut(o).set_dtype(dtype);
            true
        }
        (None, Some(dtype)) => {
            trace!("{op} passes {dtype} back to input {in_slot}");
            sg.tensor_mut(i).set_dtype(dtype);
            true
        }
        _ => false,
    }
}

fn refresh_boundary<E>(sg: &mut Subgraph<E>) {
    let updates = sg
        .inputs()
        .iter()
        .chain(sg.outputs())
        .filter_map(|t| {
            sg.value_by_tensor_id(t.id)
                .and_then(|v| sg.tensor(v).dtype)
                .map(|dtype| (t.id, dtype))
        })
        .collect::<Vec<_>>();
    let (inputs, outputs) = sg.boundary_mut();
    for t in inputs.iter_mut().chain(outputs.iter_mut()) {
        if let Some(&(_, dtype)) = updates.iter().find(|(id, _)| *id == t.id) {
            t.dtype = Some(dtype);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attributes;
    use crate::graph::SubgraphBuilder;
    use crate::passes::{infer_type, infer_type_with};
    use crate::shape;
    use crate::tensor::{LogicalTensor, TensorId};
    use crate::testing::{engine, rm, t, TestEngine};

    fn dtype_of(sg: &Subgraph<TestEngine>, id: u64) -> Option<Dtype> {
        let v = sg.value_by_tensor_id(TensorId(id)).unwrap();
        sg.tensor(v).dtype
    }

    #[test]
    fn test_undefined_boundary_is_rejected() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(0))],
            vec![t(1, Dtype::Float32, &shape![4])],
        );
        let mut sg = b.build(engine()).unwrap();
        assert_eq!(infer_type(&mut sg), Err(PassError::InvalidType(TensorId(0))));
    }

    #[test]
    fn test_pass_through_runs_forward_and_backward() {
        // x(f32) -> relu -> [?] -> permute -> [?] -> tanh -> y(f32), plus a reshape chain pinned
        // only at its output.
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![2, 4])],
            vec![LogicalTensor::undefined(TensorId(1))],
        );
        b.add_op(
            OpKind::Permute,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(1))],
            vec![LogicalTensor::undefined(TensorId(2))],
        );
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(2))],
            vec![t(3, Dtype::Float32, &shape![4, 2])],
        );
        // Pool's output is unknowable from its input, so the reshape must learn its dtype from
        // the boundary output.
        b.add_op(
            OpKind::Pool,
            Attributes::new(),
            vec![rm(4, Dtype::Sint8, &shape![1, 8, 4, 4])],
            vec![LogicalTensor::undefined(TensorId(5))],
        );
        b.add_op(
            OpKind::Reshape,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(5))],
            vec![t(6, Dtype::Sint8, &shape![8, 4])],
        );
        let mut sg = b.build(engine()).unwrap();
        let sweeps = infer_type_with(&mut sg, &PassConfig::default()).unwrap();

        assert_eq!(dtype_of(&sg, 1), Some(Dtype::Float32));
        assert_eq!(dtype_of(&sg, 2), Some(Dtype::Float32));
        assert_eq!(dtype_of(&sg, 5), Some(Dtype::Sint8));
        // One sweep to infer, one to observe that nothing changed.
        assert_eq!(sweeps, 2);
    }

    #[test]
    fn test_constants_generate_their_types() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::ConstantScales,
            Attributes::new(),
            vec![],
            vec![LogicalTensor::undefined(TensorId(0))],
        );
        b.add_op(
            OpKind::ConstantZps,
            Attributes::new(),
            vec![],
            vec![LogicalTensor::undefined(TensorId(1))],
        );
        b.add_op(
            OpKind::MulScales,
            Attributes::new(),
            vec![
                rm(2, Dtype::Sint32, &shape![8]),
                LogicalTensor::undefined(TensorId(0)),
            ],
            vec![t(3, Dtype::Float32, &shape![8])],
        );
        b.add_op(
            OpKind::AddZps,
            Attributes::new(),
            vec![
                t(3, Dtype::Float32, &shape![8]),
                LogicalTensor::undefined(TensorId(1)),
            ],
            vec![t(4, Dtype::Float32, &shape![8])],
        );
        let mut sg = b.build(engine()).unwrap();
        infer_type(&mut sg).unwrap();
        assert_eq!(dtype_of(&sg, 0), Some(Dtype::Float32));
        assert_eq!(dtype_of(&sg, 1), Some(Dtype::Sint32));
    }

    #[test]
    fn test_bn_folding_pairs_inputs_with_outputs() {
        let mut b = SubgraphBuilder::new();
        let attrs = Attributes::new().with(crate::attrs::keys::WITH_BIAS, true);
        b.add_op(
            OpKind::BnFolding,
            attrs,
            vec![
                rm(0, Dtype::Float32, &shape![8, 4, 3, 3]),
                rm(1, Dtype::Float32, &shape![8]),
                rm(2, Dtype::Float32, &shape![8]),
                rm(3, Dtype::Float32, &shape![8]),
                rm(4, Dtype::Float32, &shape![8]),
                rm(5, Dtype::Float32, &shape![8]),
            ],
            vec![
                LogicalTensor::undefined(TensorId(6)),
                LogicalTensor::undefined(TensorId(7)),
            ],
        );
        b.add_op(
            OpKind::End,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(6))],
            vec![],
        );
        b.add_op(
            OpKind::End,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(7))],
            vec![],
        );
        let mut sg = b.build(engine()).unwrap();
        infer_type(&mut sg).unwrap();
        assert_eq!(dtype_of(&sg, 6), Some(Dtype::Float32));
        assert_eq!(dtype_of(&sg, 7), Some(Dtype::Float32));
    }

    #[test]
    fn test_compute_output_is_not_inferred_through_type_cast() {
        // u8 -> dequantize -> conv -> [?] -> typecast -> u8. Neither conv nor the typecast can
        // decide the intermediate type.
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Dequantize,
            Attributes::new(),
            vec![rm(0, Dtype::Uint8, &shape![1, 8, 6, 6])],
            vec![t(1, Dtype::Float32, &shape![1, 8, 6, 6])],
        );
        b.add_op(
            OpKind::Convolution,
            Attributes::new(),
            vec![
                t(1, Dtype::Float32, &shape![1, 8, 6, 6]),
                rm(2, Dtype::Float32, &shape![8, 8, 3, 3]),
            ],
            vec![LogicalTensor::undefined(TensorId(3))],
        );
        b.add_op(
            OpKind::TypeCast,
            Attributes::new(),
            vec![LogicalTensor::undefined(TensorId(3))],
            vec![t(4, Dtype::Uint8, &shape![1, 8, 4, 4])],
        );
        let mut sg = b.build(engine()).unwrap();
        infer_type(&mut sg).unwrap();
        assert_eq!(dtype_of(&sg, 3), None);
        assert_eq!(dtype_of(&sg, 4), Some(Dtype::Uint8));
    }

    #[test]
    fn test_boundary_records_are_refreshed() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Eltwise,
            Attributes::new(),
            vec![rm(0, Dtype::Bfloat16, &shape![4])],
            vec![t(1, Dtype::Bfloat16, &shape![4])],
        );
        let mut sg = b.build(engine()).unwrap();
        infer_type(&mut sg).unwrap();
        assert_eq!(sg.outputs()[0].dtype, Some(Dtype::Bfloat16));
    }
}
