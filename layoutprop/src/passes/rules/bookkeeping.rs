use super::{LayoutRuleT, SweepContext};
use crate::graph::{OpId, Subgraph};
use crate::oracle::Engine;
use crate::passes::PassError;

/// Constant producers have no physical form of their own. Their outputs are decided by the ops
/// that read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BookkeepingRule;

impl LayoutRuleT for BookkeepingRule {
    fn propagate<E: Engine>(
        &self,
        _sg: &mut Subgraph<E>,
        _op: OpId,
        _cx: &mut SweepContext,
    ) -> Result<(), PassError> {
        Ok(())
    }
}
