use super::{
    attach_scratchpad, descriptor, fill_from_md, reorder_after, reorder_before, LayoutRuleT,
    SweepContext,
};
use crate::graph::edit::insert_workspace;
use crate::graph::schema::{input_role, output_role};
use crate::graph::{OpId, Subgraph};
use crate::oracle::Engine;
use crate::passes::PassError;

use log::trace;

/// Ops whose layouts the engine decides.
///
/// The first time an op gets its descriptor, each operand is either stamped with the engine's
/// preferred layout (if still undecided) or, if it already has a different concrete layout,
/// routed through a reorder. Derived buffers are then appended. Later visits do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ComputeRule;

impl LayoutRuleT for ComputeRule {
    fn propagate<E: Engine>(
        &self,
        sg: &mut Subgraph<E>,
        op: OpId,
        cx: &mut SweepContext,
    ) -> Result<(), PassError> {
        let (pd, first_time) = descriptor(sg, op)?;
        if !first_time {
            return Ok(());
        }
        let kind = sg.op(op).kind;
        let attrs = sg.op(op).attrs.clone();

        for slot in 0..sg.op(op).inputs.len() {
            let Some(md) = input_role(kind, &attrs, slot).and_then(|r| pd.query_md(r)) else {
                continue;
            };
            let value = sg.input(op, slot);
            let current = sg.tensor(value).layout.clone();
            if current.is_any() {
                fill_from_md(sg, value, md, true)?;
                trace!("Stamped {} on input {slot} of {op}", sg.tensor(value).layout);
                continue;
            }
            let preferred = sg.layout_ids.layout_type(&md.layout, &md.shape)?;
            if !current.equivalent(&preferred, &md.shape) {
                let reorder = reorder_before(sg, cx, op, slot, preferred)?;
                trace!("{reorder} converts input {slot} of {op} from {current}");
            }
        }

        for slot in 0..sg.op(op).outputs.len() {
            if sg.op(op).is_derived_output(slot) {
                continue;
            }
            let Some(md) = output_role(kind, &attrs, slot).and_then(|r| pd.query_md(r)) else {
                continue;
            };
            let value = sg.output(op, slot);
            let current = sg.tensor(value).layout.clone();
            // Unknown dtype and dims are filled in either case, so that a reorder inserted below
            // copies them.
            fill_from_md(sg, value, md, true)?;
            if current.is_any() {
                trace!("Stamped {} on output {slot} of {op}", sg.tensor(value).layout);
                continue;
            }
            let preferred = sg.layout_ids.layout_type(&md.layout, &md.shape)?;
            if !current.equivalent(&preferred, &md.shape) {
                let reorder = reorder_after(sg, cx, op, slot, preferred)?;
                trace!("{reorder} converts output {slot} of {op} to {current}");
            }
        }

        attach_scratchpad(sg, op, &pd)?;
        if let Some(md) = pd.workspace() {
            let value = insert_workspace(sg, op);
            fill_from_md(sg, value, md, cx.config.diagnostics)?;
            trace!("Attached workspace {} to {op}", sg.tensor(value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::attrs::{keys, Attributes};
    use crate::common::Dtype;
    use crate::graph::{OpKind, SubgraphBuilder};
    use crate::layout::row_major;
    use crate::passes::{layout_propagation, layout_propagation_with, PassConfig};
    use crate::shape;
    use crate::tensor::{LayoutType, TensorId};
    use crate::testing::{engine, rm, t};
    use smallvec::smallvec;

    #[test]
    fn test_output_pinned_to_other_layout_gets_reorder_after() {
        // The boundary output is pinned row-major but the convolution prefers nChw8c.
        let mut b = SubgraphBuilder::new();
        let conv = b.add_op(
            OpKind::Convolution,
            Attributes::new(),
            vec![
                t(0, Dtype::Float32, &shape![1, 16, 8, 8]),
                t(1, Dtype::Float32, &shape![16, 16, 3, 3]),
            ],
            vec![rm(2, Dtype::Float32, &shape![1, 16, 6, 6])],
        );
        let mut sg = b.build(engine()).unwrap();
        layout_propagation(&mut sg).unwrap();

        let y = sg.value_by_tensor_id(TensorId(2)).unwrap();
        let (reorder, _) = sg.value(y).producer.unwrap();
        assert_eq!(sg.op(reorder).kind, OpKind::Reorder);
        assert!(matches!(sg.tensor(y).layout, LayoutType::Strided(_)));
        let conv_dst = sg.output(conv, 0);
        assert_eq!(sg.input(reorder, 0), conv_dst);
        assert!(matches!(sg.tensor(conv_dst).layout, LayoutType::Opaque(_)));
        assert_eq!(sg.tensor(conv_dst).dtype, Some(Dtype::Float32));
    }

    #[test]
    fn test_padded_input_gets_reorder_to_dense() {
        let padded = LayoutType::Strided(smallvec![16, 1]);
        let mut b = SubgraphBuilder::new();
        let relu = b.add_op(
            OpKind::Eltwise,
            Attributes::new().with(keys::ALG_KIND, "relu"),
            vec![rm(0, Dtype::Float32, &shape![2, 8]).with_layout(padded.clone())],
            vec![t(1, Dtype::Float32, &shape![2, 8])],
        );
        let mut sg = b.build(engine()).unwrap();
        layout_propagation(&mut sg).unwrap();

        let dense = LayoutType::Strided(smallvec![8, 1]);
        let src = sg.input(relu, 0);
        let (reorder, _) = sg.value(src).producer.unwrap();
        assert_eq!(sg.op(reorder).kind, OpKind::Reorder);
        assert_eq!(sg.tensor(src).layout, dense);
        assert_eq!(sg.tensor(sg.input(reorder, 0)).layout, padded);
        assert_eq!(sg.tensor(sg.output(relu, 0)).layout, dense);
        assert_eq!(sg.inputs()[0].layout, padded);
    }

    #[test]
    fn test_post_op_sum_input_follows_destination() {
        let mut b = SubgraphBuilder::new();
        let key = b.fusion_info_mut().register(crate::fusion::FusionInfo {
            post_ops: vec![crate::fusion::PostOp::Sum { scale: 1.0 }],
        });
        let conv = b.add_op(
            OpKind::Convolution,
            Attributes::new().with(keys::FUSION_INFO_KEY, key),
            vec![
                t(0, Dtype::Float32, &shape![1, 16, 8, 8]),
                t(1, Dtype::Float32, &shape![16, 16, 3, 3]),
                t(2, Dtype::Float32, &shape![1, 16, 6, 6]),
            ],
            vec![t(3, Dtype::Float32, &shape![1, 16, 6, 6])],
        );
        let mut sg = b.build(engine()).unwrap();
        layout_propagation(&mut sg).unwrap();
        let dst = sg.tensor(sg.output(conv, 0)).layout.clone();
        assert!(matches!(dst, LayoutType::Opaque(_)));
        assert_eq!(sg.tensor(sg.input(conv, 2)).layout, dst);
        assert_eq!(sg.count_kind(OpKind::Reorder), 0);
    }

    #[test]
    fn test_batch_norm_training_fills_statistics_and_workspace() {
        let attrs = Attributes::new()
            .with(keys::IS_TRAINING, true)
            .with(keys::FUSE_RELU, true);
        let build = || {
            let mut b = SubgraphBuilder::new();
            let bn = b.add_op(
                OpKind::BatchNorm,
                attrs.clone(),
                vec![
                    rm(0, Dtype::Float32, &shape![2, 16, 3, 3]),
                    rm(1, Dtype::Float32, &shape![16]),
                    rm(2, Dtype::Float32, &shape![16]),
                ],
                vec![
                    t(3, Dtype::Float32, &shape![2, 16, 3, 3]),
                    t(4, Dtype::Float32, &shape![16]),
                    t(5, Dtype::Float32, &shape![16]),
                ],
            );
            (b.build(engine()).unwrap(), bn)
        };

        let (mut sg, bn) = build();
        layout_propagation(&mut sg).unwrap();
        let op = sg.op(bn);
        assert_eq!(op.scratchpad_slot, Some(3));
        assert_eq!(op.workspace_slot, Some(4));
        let mean = sg.tensor(op.outputs[1]);
        assert_eq!(
            mean.layout,
            LayoutType::Strided(row_major(&shape![16]).strides(&shape![16]).unwrap())
        );
        let workspace = sg.tensor(op.outputs[4]);
        assert_eq!(workspace.dtype, Some(Dtype::Uint8));
        assert!(!workspace.layout.is_any());
        assert_eq!(workspace.dims, None);

        let (mut sg, bn) = build();
        let config = PassConfig {
            diagnostics: true,
            ..PassConfig::default()
        };
        layout_propagation_with(&mut sg, &config).unwrap();
        let workspace = sg.tensor(sg.output(bn, 4));
        assert_eq!(workspace.concrete_shape(), Some(shape![36]));
    }

    #[test]
    fn test_unsupported_configuration_is_a_descriptor_error() {
        use crate::passes::PassError;
        use crate::target::{ArmTarget, CpuEngine};

        let mut b = SubgraphBuilder::new();
        b.add_op(
            OpKind::Convolution,
            Attributes::new(),
            vec![
                t(0, Dtype::Bfloat16, &shape![1, 16, 8, 8]),
                t(1, Dtype::Bfloat16, &shape![16, 16, 3, 3]),
            ],
            vec![t(2, Dtype::Bfloat16, &shape![1, 16, 6, 6])],
        );
        let mut sg = b.build(CpuEngine::<ArmTarget>::new()).unwrap();
        assert!(matches!(
            layout_propagation(&mut sg),
            Err(PassError::Descriptor { .. })
        ));
    }
}
