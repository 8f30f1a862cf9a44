use super::PrimitiveDesc;
use crate::graph::OpId;

use std::collections::HashMap;
use std::rc::Rc;

/// Primitive descriptors keyed by the op they were created for.
///
/// Keys are arena indices, so an entry stays valid as the subgraph around its op is edited. When
/// an op is replaced, its entry must be moved with [PdCache::transfer].
#[derive(Debug, Default)]
pub struct PdCache {
    entries: HashMap<OpId, Rc<PrimitiveDesc>>,
    creations: usize,
}

impl PdCache {
    pub fn get(&self, op: OpId) -> Option<Rc<PrimitiveDesc>> {
        self.entries.get(&op).cloned()
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.entries.contains_key(&op)
    }

    /// Caches a newly created descriptor.
    pub fn insert(&mut self, op: OpId, pd: PrimitiveDesc) -> Rc<PrimitiveDesc> {
        let pd = Rc::new(pd);
        let prev = self.entries.insert(op, Rc::clone(&pd));
        debug_assert!(prev.is_none(), "{op} already had a descriptor");
        self.creations += 1;
        pd
    }

    /// Moves the entry of `from`, if any, to `to`. Returns `true` if an entry moved.
    pub fn transfer(&mut self, from: OpId, to: OpId) -> bool {
        match self.entries.remove(&from) {
            Some(pd) => {
                self.entries.insert(to, pd);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, op: OpId) -> Option<Rc<PrimitiveDesc>> {
        self.entries.remove(&op)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors created over the lifetime of this cache. Transfers don't count.
    pub fn creations(&self) -> usize {
        self.creations
    }
}
