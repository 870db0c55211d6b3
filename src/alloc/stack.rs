use super::{
    align_up, buffer_create_info, find_memory_type, AllocError, AllocatorDesc, BlockPool, Buffer,
    DeviceLink, MappedPtr, Result,
};
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

/// Placement of one transient allocation. Valid until the next reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackAllocation {
    pub memory_type: u32,
    pub block: u32,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

struct StackArena {
    pool: BlockPool,
    used: Vec<vk::DeviceSize>,
    /// Block the bump pointer currently lives in. Blocks before it are full
    /// for this frame; blocks after it are still empty.
    current: usize,
}

impl StackArena {
    fn new(memory_type: u32, block_size: vk::DeviceSize) -> Self {
        Self {
            pool: BlockPool::new(memory_type, block_size),
            used: Vec::new(),
            current: 0,
        }
    }

    fn bump(
        &mut self,
        link: &DeviceLink,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Result<(u32, vk::DeviceSize)> {
        let capacity = self.pool.block_size();
        while let Some(used) = self.used.get_mut(self.current) {
            let offset = align_up(*used, alignment);
            if offset + size <= capacity {
                *used = offset + size;
                return Ok((self.current as u32, offset));
            }
            if self.current + 1 == self.used.len() {
                break;
            }
            self.current += 1;
        }

        let block = self.pool.grow(link)?;
        self.used.push(size);
        self.current = block as usize;
        Ok((block, 0))
    }

    fn rewind(&mut self) {
        self.used.iter_mut().for_each(|used| *used = 0);
        self.current = 0;
    }
}

/// Bump allocator for per-frame data.
///
/// Allocations are never freed one by one; [`StackAllocator::reset`] rewinds
/// every block at once and keeps the native memory for the next frame. Owned
/// by the render thread, hence `&mut self` throughout.
pub struct StackAllocator {
    link: Arc<DeviceLink>,
    block_size: vk::DeviceSize,
    arenas: HashMap<u32, StackArena>,
    live: HashMap<vk::Buffer, StackAllocation>,
}

impl StackAllocator {
    pub fn new(link: Arc<DeviceLink>, desc: &AllocatorDesc) -> Result<Self> {
        desc.validate()?;
        Ok(Self {
            link,
            block_size: desc.stack_block_size,
            arenas: HashMap::new(),
            live: HashMap::new(),
        })
    }

    /// Reserves `requirements.size` bytes at the arena's bump pointer, aligned
    /// up to `requirements.alignment`.
    pub fn allocate(
        &mut self,
        requirements: &vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, StackAllocation)> {
        let memory_type = find_memory_type(
            self.link.memory_types(),
            requirements.memory_type_bits,
            required,
            forbidden,
        )?;
        let size = requirements.size.max(1);
        if size > self.block_size {
            return Err(AllocError::OversizeRequest {
                requested: requirements.size,
                block_size: self.block_size,
            });
        }

        let block_size = self.block_size;
        let arena = self
            .arenas
            .entry(memory_type)
            .or_insert_with(|| StackArena::new(memory_type, block_size));
        let (block, offset) = arena.bump(&self.link, size, requirements.alignment)?;

        let allocation = StackAllocation {
            memory_type,
            block,
            offset,
            size,
        };
        log::trace!("Stack allocated {allocation:?}");
        Ok((arena.pool.get(block).memory(), allocation))
    }

    /// Creates a buffer that lives until the next [`StackAllocator::reset`].
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        let info = buffer_create_info(size, usage);
        let (buffer, requirements) = self
            .link
            .call("vkCreateBuffer", |d| d.create_buffer(&info))?;

        let bound = self
            .allocate(&requirements, required, forbidden)
            .and_then(|(memory, allocation)| {
                self.link
                    .call("vkBindBufferMemory", |d| {
                        d.bind_buffer_memory(buffer, memory, allocation.offset)
                    })
                    .map(|_| allocation)
            });

        match bound {
            Ok(allocation) => {
                self.live.insert(buffer, allocation);
                Ok(Buffer::new(buffer, size))
            }
            Err(e) => {
                // bumped space, if any, is reclaimed by the next reset
                self.link.call_void(|d| d.destroy_buffer(buffer));
                Err(e)
            }
        }
    }

    pub fn allocation(&self, buffer: &Buffer) -> Option<StackAllocation> {
        self.live.get(&buffer.as_raw()).copied()
    }

    /// Maps a transient buffer through its block's shared mapping.
    pub fn map(&self, buffer: &Buffer) -> Result<MappedPtr> {
        let allocation = self
            .allocation(buffer)
            .ok_or(AllocError::UnknownHandle { kind: "buffer" })?;
        let flags = self.link.memory_types()[allocation.memory_type as usize];
        if !flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(AllocError::NotHostVisible {
                memory_type: allocation.memory_type,
            });
        }
        self.arenas[&allocation.memory_type]
            .pool
            .get(allocation.block)
            .map(&self.link, allocation.offset, allocation.size)
    }

    /// Ends the frame: destroys the transient buffers and rewinds every block
    /// to empty. No native memory is freed.
    pub fn reset(&mut self) {
        let destroyed = self.live.len();
        {
            let _native = self.link.lock();
            for (buffer, _) in self.live.drain() {
                self.link.call_void(|d| d.destroy_buffer(buffer));
            }
        }
        for arena in self.arenas.values_mut() {
            arena.rewind();
        }
        log::debug!("Stack reset, destroyed {destroyed} transient buffer(s)");
    }

    /// Bump pointer of every block of `memory_type`, in block order.
    pub fn used_sizes(&self, memory_type: u32) -> Vec<vk::DeviceSize> {
        self.arenas
            .get(&memory_type)
            .map(|a| a.used.clone())
            .unwrap_or_default()
    }

    pub fn block_count(&self, memory_type: u32) -> usize {
        self.arenas
            .get(&memory_type)
            .map(|a| a.pool.len())
            .unwrap_or(0)
    }

    /// Destroys the transient buffers and frees every arena block.
    pub fn destroy(&mut self) {
        if !self.live.is_empty() {
            self.reset();
        }
        for arena in self.arenas.values_mut() {
            arena.pool.release_all(&self.link);
        }
        if !self.arenas.is_empty() {
            log::info!("Released all stack memory");
        }
        self.arenas.clear();
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        self.destroy();
    }
}
