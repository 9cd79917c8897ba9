//! Slot metadata.
//!
//! Every slot carries a [`MetaDict`] describing what it produces: shape,
//! element type, axis semantics and any operator-specific keys. Metadata is
//! copied from upstream to downstream on connect and whenever the upstream
//! changes, so consumers can configure themselves in `setup_outputs` without
//! touching data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value description of a slot's data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaDict {
    /// Array shape, if known
    #[serde(default)]
    pub shape: Option<Vec<usize>>,

    /// Element type name
    #[serde(default)]
    pub dtype: Option<String>,

    /// Axis labels, e.g. "yx" or "tzyxc"
    #[serde(default)]
    pub axistags: Option<String>,

    /// Set once the producing operator finished configuring this slot
    #[serde(default)]
    pub ready: bool,

    /// Operator-specific keys
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MetaDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style shape setter.
    pub fn with_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    /// Builder-style dtype setter.
    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }

    /// Overwrite every field with `other`'s.
    pub fn assign_from(&mut self, other: &MetaDict) {
        self.clone_from(other);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }

    /// Number of elements described by `shape`, if known.
    pub fn volume(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.iter().product())
    }

    pub fn ndim(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_from_copies_everything() {
        let mut src = MetaDict::new().with_shape(vec![10, 20]).with_dtype("f64");
        src.insert("drange", serde_json::json!([0, 255]));
        src.ready = true;

        let mut dst = MetaDict::new().with_dtype("u8");
        dst.insert("stale", serde_json::json!(1));
        dst.assign_from(&src);

        assert_eq!(dst, src);
        assert!(dst.get("stale").is_none());
        assert_eq!(dst.volume(), Some(200));
        assert_eq!(dst.ndim(), Some(2));
    }

    #[test]
    fn test_serialization_flattens_extra_keys() {
        let mut meta = MetaDict::new().with_shape(vec![4]);
        meta.insert("channel_names", serde_json::json!(["a", "b"]));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["channel_names"][1], "b");

        let back: MetaDict = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
