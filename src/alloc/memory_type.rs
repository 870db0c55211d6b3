use super::{
    AllocError, BlockPool, DeviceLink, FreeSpan, FreeSpanIndex, MemoryBlock, Placement, Result,
};
use ash::vk;

/// Where a live buffer or image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationRecord {
    pub memory_type: u32,
    pub block: u32,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// Blocks and free space of one memory type.
pub struct MemoryTypeClass {
    memory_type: u32,
    spans: FreeSpanIndex,
    pool: BlockPool,
}

impl MemoryTypeClass {
    pub fn new(memory_type: u32, block_size: vk::DeviceSize) -> Self {
        Self {
            memory_type,
            spans: FreeSpanIndex::new(),
            pool: BlockPool::new(memory_type, block_size),
        }
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    pub fn spans(&self) -> &FreeSpanIndex {
        &self.spans
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn block(&self, index: u32) -> &MemoryBlock {
        self.pool.get(index)
    }

    /// Carves a range satisfying `requirements` out of an existing block, or
    /// out of a new block when no free span fits.
    pub fn allocate(
        &mut self,
        link: &DeviceLink,
        requirements: &vk::MemoryRequirements,
    ) -> Result<AllocationRecord> {
        let block_size = self.pool.block_size();
        let size = requirements.size.max(1);
        if size > block_size {
            return Err(AllocError::OversizeRequest {
                requested: requirements.size,
                block_size,
            });
        }

        let placement = match self.spans.find(size, requirements.alignment) {
            Some(placement) => placement,
            None => {
                let block = self.pool.grow(link)?;
                let span_block = self.spans.add_block(block_size);
                debug_assert_eq!(block, span_block);
                // a fresh block's base satisfies any alignment
                Placement {
                    span: FreeSpan {
                        size: block_size,
                        offset: 0,
                        block,
                    },
                    aligned_offset: 0,
                }
            }
        };
        self.spans.take(placement, size);

        let record = AllocationRecord {
            memory_type: self.memory_type,
            block: placement.span.block,
            offset: placement.aligned_offset,
            size,
        };
        log::trace!("Allocated {record:?}");
        Ok(record)
    }

    /// Returns a record's range to the free pool, merging free neighbours.
    pub fn free(&mut self, record: &AllocationRecord) {
        debug_assert_eq!(record.memory_type, self.memory_type);
        self.spans.release(record.block, record.offset, record.size);
        log::trace!("Freed {record:?}");
    }

    /// Frees every native block. Outstanding records become meaningless.
    pub fn release_all(&mut self, link: &DeviceLink) {
        self.pool.release_all(link);
        self.spans.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::FakeDevice;

    fn requirements(size: u64, alignment: u64) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size,
            alignment,
            memory_type_bits: u32::MAX,
        }
    }

    #[test]
    fn grows_only_when_no_span_fits() {
        let fake = FakeDevice::new();
        let link = DeviceLink::new(fake.clone());
        let mut class = MemoryTypeClass::new(0, 1024);

        let a = class.allocate(&link, &requirements(1000, 1)).unwrap();
        assert_eq!((a.block, a.offset), (0, 0));
        let b = class.allocate(&link, &requirements(24, 1)).unwrap();
        assert_eq!((b.block, b.offset), (0, 1000));
        assert_eq!(class.pool().len(), 1);

        let c = class.allocate(&link, &requirements(100, 1)).unwrap();
        assert_eq!((c.block, c.offset), (1, 0));
        assert_eq!(class.pool().len(), 2);
        assert_eq!(fake.counters().allocations, 2);

        // the first block is untouched by growth
        assert_eq!(class.spans().free_bytes(0), 0);
        class.spans().assert_consistent();
    }

    #[test]
    fn oversize_is_rejected_before_growing() {
        let fake = FakeDevice::new();
        let link = DeviceLink::new(fake.clone());
        let mut class = MemoryTypeClass::new(0, 1024);

        let err = class.allocate(&link, &requirements(1025, 1)).unwrap_err();
        assert_eq!(
            err,
            AllocError::OversizeRequest {
                requested: 1025,
                block_size: 1024
            }
        );
        assert_eq!(fake.counters().allocations, 0);
    }

    #[test]
    fn failed_growth_keeps_indices_consistent() {
        let fake = FakeDevice::new();
        let link = DeviceLink::new(fake.clone());
        let mut class = MemoryTypeClass::new(0, 1024);

        fake.fail_next_allocation();
        assert!(class.allocate(&link, &requirements(10, 1)).is_err());
        assert_eq!(class.spans().block_count(), 0);

        let r = class.allocate(&link, &requirements(10, 1)).unwrap();
        assert_eq!((r.block, r.offset), (0, 0));
    }
}
