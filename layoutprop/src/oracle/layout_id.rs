use crate::common::DimSize;
use crate::layout::{Layout, LayoutError};
use crate::tensor::LayoutType;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a blocked [Layout] interned in a [LayoutIdManager].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct LayoutId(pub u32);

/// Deduplicating registry of layouts that have no strided form.
///
/// Layouts are canonicalized before interning, so two descriptors that agree on the physical
/// arrangement of a tensor always map to the same [LayoutId].
#[derive(Debug, Default)]
pub struct LayoutIdManager {
    layouts: Vec<Layout>,
    index: HashMap<Layout, LayoutId>,
}

impl LayoutIdManager {
    pub fn intern(&mut self, layout: Layout) -> LayoutId {
        if let Some(&id) = self.index.get(&layout) {
            return id;
        }
        let id = LayoutId(u32::try_from(self.layouts.len()).unwrap());
        self.layouts.push(layout.clone());
        self.index.insert(layout, id);
        id
    }

    pub fn get(&self, id: LayoutId) -> Option<&Layout> {
        self.layouts.get(usize::try_from(id.0).unwrap())
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Converts `layout`, as applied to `shape`, to the [LayoutType] tensors carry.
    ///
    /// Layouts that canonicalize to a permutation of dimensions become
    /// [LayoutType::Strided]; the rest are interned as [LayoutType::Opaque].
    pub fn layout_type(
        &mut self,
        layout: &Layout,
        shape: &[DimSize],
    ) -> Result<LayoutType, LayoutError> {
        let canon = layout.canonicalize(shape)?;
        if canon.is_plain() {
            Ok(LayoutType::Strided(canon.strides(shape)?))
        } else {
            Ok(LayoutType::Opaque(self.intern(canon)))
        }
    }

    /// Recovers the [Layout] of `layout_type` applied to `shape`. Returns `None` for
    /// [LayoutType::Any].
    pub fn layout_of(
        &self,
        layout_type: &LayoutType,
        shape: &[DimSize],
    ) -> Result<Option<Layout>, LayoutError> {
        match layout_type {
            LayoutType::Any => Ok(None),
            LayoutType::Strided(strides) => Layout::from_strides(shape, strides).map(Some),
            LayoutType::Opaque(id) => self
                .get(*id)
                .cloned()
                .map(Some)
                .ok_or(LayoutError::UnknownOpaque(id.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{nhwc, row_major};
    use crate::{layout, shape};

    #[test]
    fn test_blocked_layouts_are_deduplicated() {
        let mut ids = LayoutIdManager::default();
        let s = shape![1, 32, 7, 7];
        let a = ids.layout_type(&layout![0, 1, 2, 3, 1 p(8)], &s).unwrap();
        // Same physical arrangement, spelled with an explicit size-one dimension removed.
        let b = ids.layout_type(&layout![1, 2, 3, 1 p(8)], &s).unwrap();
        assert_eq!(a, b);
        assert!(matches!(a, LayoutType::Opaque(_)));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_plain_layouts_become_strided() {
        let mut ids = LayoutIdManager::default();
        let s = shape![2, 8, 4, 4];
        let lt = ids.layout_type(&nhwc(&s), &s).unwrap();
        assert_eq!(lt, LayoutType::Strided(smallvec::smallvec![128, 1, 32, 8]));
        assert!(ids.is_empty());
    }

    #[test]
    fn test_fully_blocked_channels_become_strided() {
        let mut ids = LayoutIdManager::default();
        let s = shape![2, 8, 4, 4];
        let lt = ids.layout_type(&layout![0, 1, 2, 3, 1 p(8)], &s).unwrap();
        assert_eq!(lt, ids.layout_type(&nhwc(&s), &s).unwrap());
    }

    #[test]
    fn test_layout_of_round_trips_strided_and_opaque() {
        let mut ids = LayoutIdManager::default();
        let s = shape![2, 16, 4, 4];
        let blocked = layout![0, 1, 2, 3, 1 p(8)];
        let opaque = ids.layout_type(&blocked, &s).unwrap();
        assert_eq!(ids.layout_of(&opaque, &s).unwrap(), Some(blocked));
        let strided = ids.layout_type(&row_major(&s), &s).unwrap();
        assert_eq!(ids.layout_of(&strided, &s).unwrap(), Some(row_major(&s)));
        assert_eq!(ids.layout_of(&LayoutType::Any, &s).unwrap(), None);
        assert_eq!(
            ids.layout_of(&LayoutType::Opaque(LayoutId(9)), &s),
            Err(LayoutError::UnknownOpaque(9))
        );
    }
}
