use crate::common::{DimSize, Dtype};
use crate::graph::OpKind;
use crate::oracle::{DescriptorError, DescriptorRequest, Engine, PrimitiveDesc};
use crate::target::{CpuEngine, X86Target};
use crate::tensor::{LogicalTensor, TensorId};

use std::cell::RefCell;
use std::collections::HashMap;

/// Wraps an [Engine], counting the descriptors it creates for each [OpKind].
#[derive(Debug, Default)]
pub struct CountingEngine<E> {
    inner: E,
    created: RefCell<HashMap<OpKind, usize>>,
}

impl<E> CountingEngine<E> {
    pub fn new(inner: E) -> Self {
        CountingEngine {
            inner,
            created: RefCell::new(HashMap::new()),
        }
    }

    pub fn created(&self, kind: OpKind) -> usize {
        self.created.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.created.borrow().values().sum()
    }
}

impl<E: Engine> Engine for CountingEngine<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_descriptor(
        &self,
        request: &DescriptorRequest,
    ) -> Result<PrimitiveDesc, DescriptorError> {
        let pd = self.inner.create_descriptor(request)?;
        *self.created.borrow_mut().entry(request.kind).or_default() += 1;
        Ok(pd)
    }
}

pub type TestEngine = CountingEngine<CpuEngine<X86Target>>;

pub fn engine() -> TestEngine {
    CountingEngine::new(CpuEngine::new())
}

/// A tensor with a known dtype and shape and an undecided layout.
pub fn t(id: u64, dtype: Dtype, shape: &[DimSize]) -> LogicalTensor {
    LogicalTensor::any(TensorId(id), dtype, shape)
}

/// A row-major tensor.
pub fn rm(id: u64, dtype: Dtype, shape: &[DimSize]) -> LogicalTensor {
    LogicalTensor::row_major(TensorId(id), dtype, shape)
}
