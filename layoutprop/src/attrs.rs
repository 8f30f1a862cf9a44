use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Well-known attribute names.
pub mod keys {
    pub const GROUPS: &str = "groups";
    pub const IS_TRAINING: &str = "is_training";
    pub const IS_CONVTRANSPOSE: &str = "is_convtranspose";
    pub const WITH_BIAS: &str = "with_bias";
    pub const FUSE_RELU: &str = "fuse_relu";
    pub const KEEP_STATS: &str = "keep_stats";
    pub const USE_DST: &str = "use_dst";
    /// A permutation for Permute and Transpose, or target dims for Reshape, Expand and Squeeze.
    pub const ORDER: &str = "order";
    pub const SHAPE: &str = "shape";
    pub const KIND: &str = "kind";
    pub const FUSION_INFO_KEY: &str = "fusion_info_key";
    pub const WITH_SECONDARY_OUTPUT: &str = "with_secondary_output";
    pub const ALG_KIND: &str = "alg_kind";
    pub const AXIS: &str = "axis";
    pub const SCALES: &str = "scales";
    pub const ZPS: &str = "zps";
    pub const DATA_TYPE: &str = "data_type";
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        AttrValue::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::Ints(value)
    }
}

impl From<Vec<f32>> for AttrValue {
    fn from(value: Vec<f32>) -> Self {
        AttrValue::Floats(value)
    }
}

/// Named op attributes. Iteration order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Attributes(IndexMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a boolean attribute, treating a missing one as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(AttrValue::Bool(true)))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_ints(&self, key: &str) -> Option<&[i64]> {
        match self.0.get(key) {
            Some(AttrValue::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bool_is_false() {
        let attrs = Attributes::new().with(keys::WITH_BIAS, true);
        assert!(attrs.get_bool(keys::WITH_BIAS));
        assert!(!attrs.get_bool(keys::IS_TRAINING));
    }

    #[test]
    fn test_typed_getters_reject_other_types() {
        let attrs = Attributes::new()
            .with(keys::GROUPS, 4i64)
            .with(keys::ORDER, vec![0i64, 2, 1]);
        assert_eq!(attrs.get_int(keys::GROUPS), Some(4));
        assert_eq!(attrs.get_ints(keys::ORDER), Some(&[0i64, 2, 1][..]));
        assert_eq!(attrs.get_int(keys::ORDER), None);
        assert_eq!(
            attrs.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec![keys::GROUPS, keys::ORDER]
        );
    }
}
