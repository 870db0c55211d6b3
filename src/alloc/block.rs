use super::{DeviceLink, MappedPtr, MappingSlot, Result};
use ash::vk;
use std::sync::Arc;

/// One native allocation of fixed capacity, carved up by the allocators.
pub struct MemoryBlock {
    memory: vk::DeviceMemory,
    capacity: vk::DeviceSize,
    mapping: Arc<MappingSlot>,
}

impl MemoryBlock {
    pub fn allocate(link: &DeviceLink, memory_type: u32, capacity: vk::DeviceSize) -> Result<Self> {
        let memory = link.call("vkAllocateMemory", |d| {
            d.allocate_memory(memory_type, capacity)
        })?;
        Ok(Self {
            memory,
            capacity,
            mapping: Arc::new(MappingSlot::new(memory, capacity)),
        })
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    pub fn mapping(&self) -> &Arc<MappingSlot> {
        &self.mapping
    }

    pub fn map(
        &self,
        link: &Arc<DeviceLink>,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
    ) -> Result<MappedPtr> {
        self.mapping.map(link, offset, len)
    }

    fn release(self, link: &DeviceLink) {
        self.mapping.invalidate();
        link.call_void(|d| d.free_memory(self.memory));
    }
}

/// Every block obtained for one memory type. Grows on demand; blocks are
/// only returned to the device all at once.
pub struct BlockPool {
    memory_type: u32,
    block_size: vk::DeviceSize,
    blocks: Vec<MemoryBlock>,
}

impl BlockPool {
    pub fn new(memory_type: u32, block_size: vk::DeviceSize) -> Self {
        Self {
            memory_type,
            block_size,
            blocks: Vec::new(),
        }
    }

    pub fn block_size(&self) -> vk::DeviceSize {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u32) -> &MemoryBlock {
        &self.blocks[index as usize]
    }

    /// Appends a fresh block and returns its index.
    pub fn grow(&mut self, link: &DeviceLink) -> Result<u32> {
        let block = MemoryBlock::allocate(link, self.memory_type, self.block_size)?;
        let index = self.blocks.len() as u32;
        log::debug!(
            "Allocated block #{index} of memory type {} ({} bytes)",
            self.memory_type,
            self.block_size
        );
        self.blocks.push(block);
        Ok(index)
    }

    /// Frees every block of the pool.
    pub fn release_all(&mut self, link: &DeviceLink) {
        let count = self.blocks.len();
        for block in self.blocks.drain(..) {
            block.release(link);
        }
        if count > 0 {
            log::debug!(
                "Released {count} block(s) of memory type {}",
                self.memory_type
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{AllocError, FakeDevice};

    #[test]
    fn grows_one_block_at_a_time() {
        let fake = FakeDevice::new();
        let link = DeviceLink::new(fake.clone());
        let mut pool = BlockPool::new(0, 1024);

        assert_eq!(pool.grow(&link).unwrap(), 0);
        assert_eq!(pool.grow(&link).unwrap(), 1);
        assert_eq!(pool.len(), 2);
        assert_ne!(pool.get(0).memory(), pool.get(1).memory());
        assert_eq!(fake.counters().live_memory, 2);

        pool.release_all(&link);
        assert!(pool.is_empty());
        assert_eq!(fake.counters().live_memory, 0);
    }

    #[test]
    fn failed_growth_leaves_pool_untouched() {
        let fake = FakeDevice::new();
        let link = DeviceLink::new(fake.clone());
        let mut pool = BlockPool::new(0, 1024);
        pool.grow(&link).unwrap();

        fake.fail_next_allocation();
        assert!(matches!(
            pool.grow(&link),
            Err(AllocError::NativeCallFailure {
                op: "vkAllocateMemory",
                ..
            })
        ));
        assert_eq!(pool.len(), 1);
    }
}
