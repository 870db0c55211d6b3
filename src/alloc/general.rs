use super::{
    buffer_create_info, find_memory_type, image_create_info, stats_table, texel_size,
    AllocError, AllocationRecord, AllocatorDesc, Buffer, DeviceLink, Image, MappedPtr,
    MemoryTypeClass, MemoryTypeStats, Result,
};
use ash::vk;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct AllocatorState {
    types: HashMap<u32, MemoryTypeClass>,
    buffers: HashMap<vk::Buffer, AllocationRecord>,
    images: HashMap<vk::Image, AllocationRecord>,
}

impl AllocatorState {
    fn allocate(
        &mut self,
        link: &DeviceLink,
        block_size: vk::DeviceSize,
        requirements: &vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, AllocationRecord)> {
        let memory_type = find_memory_type(
            link.memory_types(),
            requirements.memory_type_bits,
            required,
            forbidden,
        )?;

        let class = self.types.entry(memory_type).or_insert_with(|| {
            log::debug!("First allocation from memory type {memory_type}");
            MemoryTypeClass::new(memory_type, block_size)
        });
        let record = class.allocate(link, requirements)?;
        Ok((class.block(record.block).memory(), record))
    }

    fn free(&mut self, record: &AllocationRecord) {
        match self.types.get_mut(&record.memory_type) {
            Some(class) => class.free(record),
            None => unreachable!("record {record:?} has no memory type class"),
        }
    }

    fn live_records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.buffers.values().chain(self.images.values())
    }
}

/// General-purpose sub-allocator for resources with arbitrary lifetimes.
///
/// Memory comes from the device in blocks of `desc.block_size` bytes per
/// memory type; buffers and images are bound to ranges inside them. One
/// bookkeeping lock serializes every create and destroy, which is fine for
/// load-time traffic.
pub struct GpuAllocator {
    link: Arc<DeviceLink>,
    desc: AllocatorDesc,
    state: Mutex<AllocatorState>,
}

impl GpuAllocator {
    pub fn new(link: Arc<DeviceLink>, desc: AllocatorDesc) -> Result<Self> {
        desc.validate()?;
        log::info!(
            "Creating allocator \"{}\" with {} byte blocks",
            desc.name,
            desc.block_size
        );
        Ok(Self {
            link,
            desc,
            state: Mutex::new(AllocatorState::default()),
        })
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn desc(&self) -> &AllocatorDesc {
        &self.desc
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap()
    }

    /// Picks memory for `requirements` and binds it through `bind`. On bind
    /// failure the range goes straight back to the free pool.
    fn allocate_bound(
        &self,
        state: &mut AllocatorState,
        requirements: &vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
        bind: impl FnOnce(vk::DeviceMemory, vk::DeviceSize) -> Result<()>,
    ) -> Result<AllocationRecord> {
        let (memory, record) = state.allocate(
            &self.link,
            self.desc.block_size,
            requirements,
            required,
            forbidden,
        )?;
        if let Err(e) = bind(memory, record.offset) {
            state.free(&record);
            return Err(e);
        }
        Ok(record)
    }

    /// Creates a buffer and binds it to memory that has every `required`
    /// property and none of the `forbidden` ones.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        let info = buffer_create_info(size, usage);
        let (buffer, requirements) = self
            .link
            .call("vkCreateBuffer", |d| d.create_buffer(&info))?;

        let mut state = self.state();
        let bound = self.allocate_bound(
            &mut state,
            &requirements,
            required,
            forbidden,
            |memory, offset| {
                self.link.call("vkBindBufferMemory", |d| {
                    d.bind_buffer_memory(buffer, memory, offset)
                })
            },
        );

        match bound {
            Ok(record) => {
                state.buffers.insert(buffer, record);
                Ok(Buffer::new(buffer, size))
            }
            Err(e) => {
                self.link.call_void(|d| d.destroy_buffer(buffer));
                Err(e)
            }
        }
    }

    /// Destroys `buffer` and returns its memory range to the free pool.
    pub fn destroy_buffer(&self, buffer: Buffer) -> Result<()> {
        let mut state = self.state();
        let record = state
            .buffers
            .remove(&buffer.as_raw())
            .ok_or(AllocError::UnknownHandle { kind: "buffer" })?;
        self.link.call_void(|d| d.destroy_buffer(buffer.as_raw()));
        state.free(&record);
        Ok(())
    }

    /// Creates a single-mip 2D image with optimal tiling and binds it.
    pub fn create_image(
        &self,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    ) -> Result<Image> {
        let info = image_create_info(extent, format, usage);
        let (image, requirements) = self
            .link
            .call("vkCreateImage", |d| d.create_image(&info))?;

        let mut state = self.state();
        let bound = self.allocate_bound(
            &mut state,
            &requirements,
            required,
            forbidden,
            |memory, offset| {
                self.link.call("vkBindImageMemory", |d| {
                    d.bind_image_memory(image, memory, offset)
                })
            },
        );

        match bound {
            Ok(record) => {
                state.images.insert(image, record);
                Ok(Image::new(image, extent, format))
            }
            Err(e) => {
                self.link.call_void(|d| d.destroy_image(image));
                Err(e)
            }
        }
    }

    pub fn destroy_image(&self, image: Image) -> Result<()> {
        let mut state = self.state();
        let record = state
            .images
            .remove(&image.as_raw())
            .ok_or(AllocError::UnknownHandle { kind: "image" })?;
        self.link.call_void(|d| d.destroy_image(image.as_raw()));
        state.free(&record);
        Ok(())
    }

    /// Maps the buffer's memory range for host access.
    ///
    /// The whole block is mapped on first use and stays mapped while any
    /// returned pointer into it is alive.
    pub fn map_buffer(&self, buffer: &Buffer) -> Result<MappedPtr> {
        let (slot, record) = {
            let state = self.state();
            let record = *state
                .buffers
                .get(&buffer.as_raw())
                .ok_or(AllocError::UnknownHandle { kind: "buffer" })?;
            let host_visible = self.link.memory_types()[record.memory_type as usize]
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
            if !host_visible {
                return Err(AllocError::NotHostVisible {
                    memory_type: record.memory_type,
                });
            }
            let class = &state.types[&record.memory_type];
            (class.block(record.block).mapping().clone(), record)
        };
        slot.map(&self.link, record.offset, record.size)
    }

    /// Copies `size` bytes between buffers, blocking until the device is done.
    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) -> Result<()> {
        debug_assert!(size <= src.size() && size <= dst.size());
        log::trace!("Copying {size} bytes {:?} -> {:?}", src.as_raw(), dst.as_raw());
        self.link.call("vkQueueSubmit(copy_buffer)", |d| {
            d.copy_buffer(src.as_raw(), dst.as_raw(), size)
        })
    }

    /// Copies tightly packed texels from `src` into `dst` and leaves the image
    /// ready for sampling. Blocks until the device is done.
    pub fn copy_buffer_to_image(
        &self,
        src: &Buffer,
        size: vk::DeviceSize,
        dst: &Image,
        extent: vk::Extent3D,
    ) -> Result<()> {
        debug_assert!(size <= src.size());
        log::trace!(
            "Copying {size} bytes {:?} -> image {:?}",
            src.as_raw(),
            dst.as_raw()
        );
        self.link.call("vkQueueSubmit(copy_buffer_to_image)", |d| {
            d.copy_buffer_to_image(src.as_raw(), dst.as_raw(), extent)
        })
    }

    /// Runs `f` with a host-visible staging buffer holding `data`; the staging
    /// buffer is destroyed afterwards whatever `f` returns.
    fn with_staging<R>(&self, data: &[u8], f: impl FnOnce(&Buffer) -> Result<R>) -> Result<R> {
        let staging = self.create_buffer(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::empty(),
        )?;
        let result = self
            .map_buffer(&staging)
            .and_then(|mapped| mapped.write_bytes(0, data))
            .and_then(|_| f(&staging));
        self.destroy_buffer(staging)?;
        result
    }

    /// Creates a device-local buffer holding `data`, going through a staging
    /// buffer.
    pub fn upload_buffer(&self, data: &[u8], usage: vk::BufferUsageFlags) -> Result<Buffer> {
        if data.is_empty() {
            return Err(AllocError::InvalidUpload("buffer data is empty".to_string()));
        }
        let size = data.len() as vk::DeviceSize;
        self.with_staging(data, |staging| {
            let dst = self.create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            )?;
            if let Err(e) = self.copy_buffer(staging, &dst, size) {
                self.destroy_buffer(dst)?;
                return Err(e);
            }
            Ok(dst)
        })
    }

    pub fn upload_pod<T: bytemuck::Pod>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        self.upload_buffer(bytemuck::cast_slice(data), usage)
    }

    /// Creates a sampled, device-local image filled with `data`.
    ///
    /// `data` holds tightly packed texels and must cover `extent` exactly.
    pub fn upload_image(
        &self,
        data: &[u8],
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image> {
        let texel = texel_size(format).ok_or_else(|| {
            AllocError::InvalidUpload(format!("{format:?} is not an uploadable format"))
        })?;
        let expected = texel
            * extent.width as vk::DeviceSize
            * extent.height as vk::DeviceSize
            * extent.depth as vk::DeviceSize;
        if expected == 0 || data.len() as vk::DeviceSize != expected {
            return Err(AllocError::InvalidUpload(format!(
                "{} bytes given, {extent:?} of {format:?} takes {expected}",
                data.len()
            )));
        }

        self.with_staging(data, |staging| {
            let dst = self.create_image(
                extent,
                format,
                usage | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            )?;
            if let Err(e) = self.copy_buffer_to_image(staging, data.len() as _, &dst, extent) {
                self.destroy_image(dst)?;
                return Err(e);
            }
            Ok(dst)
        })
    }

    pub fn buffer_record(&self, buffer: &Buffer) -> Option<AllocationRecord> {
        self.state().buffers.get(&buffer.as_raw()).copied()
    }

    pub fn image_record(&self, image: &Image) -> Option<AllocationRecord> {
        self.state().images.get(&image.as_raw()).copied()
    }

    pub fn block_count(&self, memory_type: u32) -> usize {
        self.state()
            .types
            .get(&memory_type)
            .map(|c| c.pool().len())
            .unwrap_or(0)
    }

    /// Free spans of one block, in offset order, as `(offset, size)`.
    pub fn free_spans(
        &self,
        memory_type: u32,
        block: u32,
    ) -> Vec<(vk::DeviceSize, vk::DeviceSize)> {
        self.state()
            .types
            .get(&memory_type)
            .map(|c| c.spans().spans(block).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> Vec<MemoryTypeStats> {
        let state = self.state();
        let mut stats: Vec<MemoryTypeStats> = state
            .types
            .values()
            .map(|class| {
                let memory_type = class.memory_type();
                let (live_allocations, used_bytes) = state
                    .live_records()
                    .filter(|r| r.memory_type == memory_type)
                    .fold((0, 0), |(n, bytes), r| (n + 1, bytes + r.size));
                let blocks = class.pool().len();
                let free_bytes = (0..blocks as u32)
                    .map(|b| class.spans().free_bytes(b))
                    .sum();
                MemoryTypeStats {
                    memory_type,
                    property_flags: self.link.memory_types()[memory_type as usize],
                    blocks,
                    block_size: class.pool().block_size(),
                    live_allocations,
                    used_bytes,
                    free_bytes,
                    free_spans: class.spans().span_count(),
                    largest_free_span: class.spans().largest().map(|s| s.size).unwrap_or(0),
                }
            })
            .collect();
        stats.sort_by_key(|s| s.memory_type);
        stats
    }

    /// Renders [`GpuAllocator::stats`] as a table and logs it at debug level.
    pub fn report(&self) -> String {
        let table = stats_table(&format!("Allocator \"{}\"", self.desc.name), &self.stats());
        log::debug!("\n{table}");
        table
    }

    /// Destroys every remaining buffer and image and gives all blocks back
    /// to the device. The allocator is empty but usable afterwards.
    pub fn destroy(&self) {
        let mut state = self.state();
        let _native = self.link.lock();

        for (buffer, record) in state.buffers.drain() {
            log::warn!("Buffer {buffer:?} still alive at teardown ({record:?})");
            self.link.call_void(|d| d.destroy_buffer(buffer));
        }
        for (image, record) in state.images.drain() {
            log::warn!("Image {image:?} still alive at teardown ({record:?})");
            self.link.call_void(|d| d.destroy_image(image));
        }
        for class in state.types.values_mut() {
            class.release_all(&self.link);
        }
        if !state.types.is_empty() {
            log::info!("Released all memory of allocator \"{}\"", self.desc.name);
        }
        state.types.clear();
    }

    /// Checks no-overlap and capacity conservation for every block.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state();
        for class in state.types.values() {
            class.spans().assert_consistent();
            for block in 0..class.pool().len() as u32 {
                let mut ranges: Vec<(u64, u64)> = class.spans().spans(block).collect();
                ranges.extend(
                    state
                        .live_records()
                        .filter(|r| r.memory_type == class.memory_type() && r.block == block)
                        .map(|r| (r.offset, r.size)),
                );
                ranges.sort();
                let total: u64 = ranges.iter().map(|(_, s)| s).sum();
                assert_eq!(total, class.pool().block_size(), "capacity not conserved");
                for w in ranges.windows(2) {
                    assert!(w[0].0 + w[0].1 <= w[1].0, "overlap: {:?} / {:?}", w[0], w[1]);
                }
            }
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.destroy();
    }
}
