//! Post-op attributes attached to fused ops by the fusion stage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum PostOp {
    Eltwise { alg: String },
    /// Binary operation with an extra input tensor.
    Binary { alg: String },
    /// Accumulation into an extra input tensor.
    Sum { scale: f32 },
}

impl PostOp {
    pub fn takes_input(&self) -> bool {
        matches!(self, PostOp::Binary { .. } | PostOp::Sum { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FusionInfo {
    pub post_ops: Vec<PostOp>,
}

impl FusionInfo {
    /// Returns the `index`th post-op that takes an input, i.e., the one fed by
    /// [crate::oracle::ArgRole::PostOpSrc] `index`.
    pub fn input_post_op(&self, index: u8) -> Option<&PostOp> {
        self.post_ops
            .iter()
            .filter(|p| p.takes_input())
            .nth(usize::from(index))
    }
}

/// Owns the [FusionInfo] of a subgraph's ops. Ops refer to theirs by the key stored in
/// [crate::attrs::keys::FUSION_INFO_KEY].
#[derive(Debug, Clone, Default)]
pub struct FusionInfoManager {
    infos: Vec<FusionInfo>,
}

impl FusionInfoManager {
    pub fn register(&mut self, info: FusionInfo) -> i64 {
        let key = self.infos.len() as i64;
        self.infos.push(info);
        key
    }

    pub fn get(&self, key: i64) -> Option<&FusionInfo> {
        usize::try_from(key).ok().and_then(|k| self.infos.get(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_post_ops_skip_eltwise() {
        let mut mgr = FusionInfoManager::default();
        let key = mgr.register(FusionInfo {
            post_ops: vec![
                PostOp::Eltwise { alg: "relu".into() },
                PostOp::Sum { scale: 1.0 },
                PostOp::Binary { alg: "add".into() },
            ],
        });
        let info = mgr.get(key).unwrap();
        assert_eq!(info.input_post_op(0), Some(&PostOp::Sum { scale: 1.0 }));
        assert_eq!(
            info.input_post_op(1),
            Some(&PostOp::Binary { alg: "add".into() })
        );
        assert_eq!(info.input_post_op(2), None);
        assert!(mgr.get(-1).is_none());
    }
}
