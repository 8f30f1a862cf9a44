use super::{attach_scratchpad, descriptor, fill_from_md, LayoutRuleT, SweepContext};
use crate::graph::schema::input_role;
use crate::graph::{OpId, Subgraph};
use crate::oracle::Engine;
use crate::passes::PassError;

use log::trace;

/// Layout conversions and rescales. The concrete side's layout is copied to the undecided side;
/// element types may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReorderRule;

impl LayoutRuleT for ReorderRule {
    fn propagate<E: Engine>(
        &self,
        sg: &mut Subgraph<E>,
        op: OpId,
        _cx: &mut SweepContext,
    ) -> Result<(), PassError> {
        let (src, dst) = (sg.input(op, 0), sg.output(op, 0));
        let src_layout = sg.tensor(src).layout.clone();
        let dst_layout = sg.tensor(dst).layout.clone();
        match (src_layout.is_any(), dst_layout.is_any()) {
            (false, true) => {
                trace!("{op} copies {src_layout} to its output");
                sg.tensor_mut(dst).set_layout(src_layout);
            }
            (true, false) => {
                trace!("{op} copies {dst_layout} to its input");
                sg.tensor_mut(src).set_layout(dst_layout);
            }
            (true, true) => return Ok(()),
            (false, false) => {}
        }

        if sg.op(op).scratchpad_slot.is_some() {
            return Ok(());
        }
        let (pd, _) = descriptor(sg, op)?;
        let kind = sg.op(op).kind;
        let attrs = sg.op(op).attrs.clone();
        // Scales and zero points are resolved along with the scratchpad.
        for slot in 1..sg.op(op).inputs.len() {
            let value = sg.input(op, slot);
            if !sg.tensor(value).layout.is_any() {
                continue;
            }
            if let Some(md) = input_role(kind, &attrs, slot).and_then(|r| pd.query_md(r)) {
                fill_from_md(sg, value, md, true)?;
            }
        }
        attach_scratchpad(sg, op, &pd)
    }
}

#[cfg(test)]
mod tests {
    use crate::attrs::Attributes;
    use crate::common::Dtype;
    use crate::graph::{OpKind, SubgraphBuilder};
    use crate::passes::layout_propagation;
    use crate::shape;
    use crate::tensor::TensorId;
    use crate::testing::{engine, rm, t};

    #[test]
    fn test_type_cast_copies_layout_across_dtypes() {
        let mut b = SubgraphBuilder::new();
        let cast = b.add_op(
            OpKind::TypeCast,
            Attributes::new(),
            vec![rm(0, Dtype::Float32, &shape![4, 8])],
            vec![t(1, Dtype::Bfloat16, &shape![4, 8])],
        );
        let mut sg = b.build(engine()).unwrap();
        layout_propagation(&mut sg).unwrap();

        let (src, dst) = (sg.input(cast, 0), sg.output(cast, 0));
        assert_eq!(sg.tensor(dst).layout, sg.tensor(src).layout);
        assert_eq!(sg.tensor(dst).dtype, Some(Dtype::Bfloat16));
        let scratchpad = sg.tensor(sg.output(cast, 1));
        assert_eq!(scratchpad.dtype, Some(Dtype::Uint8));
        assert_eq!(sg.op(cast).scratchpad_slot, Some(1));
    }

    #[test]
    fn test_scales_from_constant_are_stamped() {
        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::ConstantScales,
            Attributes::new(),
            vec![],
            vec![t(0, Dtype::Float32, &shape![1])],
        );
        let mul = b.add_op(
            OpKind::MulScales,
            Attributes::new(),
            vec![
                t(1, Dtype::Sint32, &shape![2, 8]),
                t(0, Dtype::Float32, &shape![1]),
            ],
            vec![rm(2, Dtype::Float32, &shape![2, 8])],
        );
        let mut sg = b.build(engine()).unwrap();
        layout_propagation(&mut sg).unwrap();
        assert!(!sg.tensor(sg.input(mul, 1)).layout.is_any());
        assert_eq!(sg.tensor(sg.input(mul, 0)).layout, sg.tensor(sg.output(mul, 0)).layout);
        assert_eq!(sg.value_by_tensor_id(TensorId(0)), Some(sg.input(mul, 1)));
        assert_eq!(sg.inputs()[0].id, TensorId(1));
        assert_eq!(sg.inputs()[0].layout, sg.tensor(sg.input(mul, 0)).layout);
    }
}
