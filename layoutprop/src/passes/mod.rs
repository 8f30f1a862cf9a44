//! The type inference and layout propagation passes.
//!
//! Callers run [infer_type] to completion, then [layout_propagation], then read the subgraph's
//! boundary records and op list.

mod layout_propagation;
mod rules;
mod type_inference;

use crate::graph::{GraphError, OpId, OpKind, Subgraph};
use crate::layout::LayoutError;
use crate::oracle::{DescriptorError, Engine};
use crate::tensor::TensorId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// Sweeps [layout_propagation] may run before giving up with [PassError::NonConvergence].
    pub max_sweeps: usize,
    /// Populates workspace dimensions, checks graph links, and logs the subgraph after every
    /// sweep.
    pub diagnostics: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig {
            max_sweeps: 64,
            diagnostics: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationStats {
    pub sweeps: usize,
    pub reorders_inserted: usize,
    pub descriptors_created: usize,
    pub outputs_trimmed: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    #[error("Boundary tensor {0:?} has an undefined dtype")]
    InvalidType(TensorId),
    #[error("No layout rule for {kind} ({op})")]
    UnsupportedOpKind { op: OpId, kind: OpKind },
    #[error("{kind} {op} cannot carry a layout across its shape transform: {source}")]
    UnrepresentableLayoutTransform {
        op: OpId,
        kind: OpKind,
        source: LayoutError,
    },
    #[error("Could not create a descriptor for {op}: {source}")]
    Descriptor { op: OpId, source: DescriptorError },
    #[error("Layout propagation did not converge after {sweeps} sweeps")]
    NonConvergence { sweeps: usize },
    #[error("{0:?} has an unknown shape")]
    MissingShape(TensorId),
    #[error("{0:?} has an unknown dtype")]
    MissingDtype(TensorId),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Infers undefined element types from the subgraph's boundary inward.
pub fn infer_type<E>(sg: &mut Subgraph<E>) -> Result<(), PassError> {
    infer_type_with(sg, &PassConfig::default()).map(|_| ())
}

/// Like [infer_type], returning the number of sweeps run.
pub fn infer_type_with<E>(sg: &mut Subgraph<E>, config: &PassConfig) -> Result<usize, PassError> {
    type_inference::run(sg, config)
}

/// Decides a concrete layout for every edge, inserting reorders where neighbouring ops disagree.
pub fn layout_propagation<E: Engine>(sg: &mut Subgraph<E>) -> Result<(), PassError> {
    layout_propagation_with(sg, &PassConfig::default()).map(|_| ())
}

pub fn layout_propagation_with<E: Engine>(
    sg: &mut Subgraph<E>,
    config: &PassConfig,
) -> Result<PropagationStats, PassError> {
    layout_propagation::run(sg, config)
}
