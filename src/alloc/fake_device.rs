//! Host-memory stand-in for a Vulkan device, used by the allocator tests.

use super::NativeDevice;
use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCounters {
    pub allocations: usize,
    pub frees: usize,
    pub live_memory: usize,
    pub maps: usize,
    pub unmaps: usize,
    pub live_buffers: usize,
    pub live_images: usize,
    pub buffer_copies: usize,
    pub image_copies: usize,
    pub max_concurrent_calls: usize,
}

struct FakeMemory {
    size: u64,
    data: Vec<u8>,
    mapped: bool,
}

impl FakeMemory {
    fn bytes(&mut self) -> &mut [u8] {
        if self.data.is_empty() {
            self.data = vec![0; self.size as usize];
        }
        &mut self.data
    }
}

struct FakeResource {
    size: u64,
    binding: Option<(vk::DeviceMemory, u64)>,
}

struct FakeState {
    memory_types: Vec<vk::MemoryPropertyFlags>,
    alignment: u64,
    type_bits: u32,
    fail_next_allocation: bool,
    next_handle: u64,
    memories: HashMap<vk::DeviceMemory, FakeMemory>,
    buffers: HashMap<vk::Buffer, FakeResource>,
    images: HashMap<vk::Image, FakeResource>,
    counters: FakeCounters,
}

impl FakeState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn requirements(&self, size: u64) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size,
            alignment: self.alignment,
            memory_type_bits: self.type_bits,
        }
    }

    fn bind(&mut self, memory: vk::DeviceMemory, offset: u64, size: u64) {
        let mem = self
            .memories
            .get(&memory)
            .expect("binding to memory that was never allocated");
        assert!(
            offset + size <= mem.size,
            "binding [{offset}, {}) past the end of a {} byte block",
            offset + size,
            mem.size
        );
        assert_eq!(offset % self.alignment.max(1), 0, "misaligned binding");
    }

    fn read(&mut self, binding: (vk::DeviceMemory, u64), len: u64) -> Vec<u8> {
        let (memory, offset) = binding;
        let mem = self.memories.get_mut(&memory).expect("unknown memory");
        mem.bytes()[offset as usize..(offset + len) as usize].to_vec()
    }

    fn write(&mut self, binding: (vk::DeviceMemory, u64), data: &[u8]) {
        let (memory, offset) = binding;
        let mem = self.memories.get_mut(&memory).expect("unknown memory");
        mem.bytes()[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }
}

struct FakeInner {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Cheap to clone; clones observe the same device.
#[derive(Clone)]
pub struct FakeDevice(Arc<FakeInner>);

struct CallGuard<'a>(&'a FakeInner);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        use vk::MemoryPropertyFlags as F;
        Self::with_memory_types(vec![
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
        ])
    }

    pub fn with_memory_types(memory_types: Vec<vk::MemoryPropertyFlags>) -> Self {
        Self(Arc::new(FakeInner {
            state: Mutex::new(FakeState {
                memory_types,
                alignment: 1,
                type_bits: u32::MAX,
                fail_next_allocation: false,
                next_handle: 0,
                memories: HashMap::new(),
                buffers: HashMap::new(),
                images: HashMap::new(),
                counters: FakeCounters::default(),
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }))
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.0.state.lock().unwrap()
    }

    /// Tracks how many driver calls overlap in time.
    fn enter(&self) -> CallGuard<'_> {
        let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::yield_now();
        CallGuard(&self.0)
    }

    /// Alignment reported for every buffer and image created from now on.
    pub fn set_alignment(&self, alignment: u64) {
        self.state().alignment = alignment;
    }

    /// `memoryTypeBits` reported for every buffer and image created from now on.
    pub fn set_type_bits(&self, type_bits: u32) {
        self.state().type_bits = type_bits;
    }

    pub fn fail_next_allocation(&self) {
        self.state().fail_next_allocation = true;
    }

    pub fn counters(&self) -> FakeCounters {
        let mut counters = self.state().counters;
        counters.max_concurrent_calls = self.0.max_in_flight.load(Ordering::SeqCst);
        counters
    }

    pub fn is_mapped(&self, memory: vk::DeviceMemory) -> bool {
        self.state()
            .memories
            .get(&memory)
            .map(|m| m.mapped)
            .unwrap_or(false)
    }

    pub fn buffer_binding(&self, buffer: vk::Buffer) -> Option<(vk::DeviceMemory, u64)> {
        self.state().buffers.get(&buffer).and_then(|b| b.binding)
    }

    /// Reads back what the device holds behind `buffer`.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        let mut state = self.state();
        let res = state.buffers.get(&buffer).expect("unknown buffer");
        let (binding, size) = (res.binding.expect("unbound buffer"), res.size);
        state.read(binding, size)
    }

    pub fn image_contents(&self, image: vk::Image) -> Vec<u8> {
        let mut state = self.state();
        let res = state.images.get(&image).expect("unknown image");
        let (binding, size) = (res.binding.expect("unbound image"), res.size);
        state.read(binding, size)
    }
}

impl NativeDevice for FakeDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.state().memory_types.clone()
    }

    fn allocate_memory(
        &self,
        memory_type: u32,
        size: vk::DeviceSize,
    ) -> VkResult<vk::DeviceMemory> {
        let _call = self.enter();
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_allocation) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        assert!((memory_type as usize) < state.memory_types.len());

        let memory = vk::DeviceMemory::from_raw(state.next_handle());
        state.memories.insert(
            memory,
            FakeMemory {
                size,
                data: Vec::new(),
                mapped: false,
            },
        );
        state.counters.allocations += 1;
        state.counters.live_memory += 1;
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let _call = self.enter();
        let mut state = self.state();
        state
            .memories
            .remove(&memory)
            .expect("freeing memory that is not allocated");
        state.counters.frees += 1;
        state.counters.live_memory -= 1;
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<*mut u8> {
        let _call = self.enter();
        let mut state = self.state();
        let mem = state
            .memories
            .get_mut(&memory)
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        if mem.mapped || size > mem.size {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        mem.mapped = true;
        let ptr = mem.bytes().as_mut_ptr();
        state.counters.maps += 1;
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let _call = self.enter();
        let mut state = self.state();
        let mem = state.memories.get_mut(&memory).expect("unknown memory");
        assert!(mem.mapped, "unmapping memory that is not mapped");
        mem.mapped = false;
        state.counters.unmaps += 1;
    }

    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
    ) -> VkResult<(vk::Buffer, vk::MemoryRequirements)> {
        let _call = self.enter();
        let mut state = self.state();
        let buffer = vk::Buffer::from_raw(state.next_handle());
        state.buffers.insert(
            buffer,
            FakeResource {
                size: info.size,
                binding: None,
            },
        );
        state.counters.live_buffers += 1;
        Ok((buffer, state.requirements(info.size)))
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let _call = self.enter();
        let mut state = self.state();
        let size = state.buffers.get(&buffer).expect("unknown buffer").size;
        state.bind(memory, offset, size);
        state.buffers.get_mut(&buffer).unwrap().binding = Some((memory, offset));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let _call = self.enter();
        let mut state = self.state();
        state
            .buffers
            .remove(&buffer)
            .expect("destroying a buffer that does not exist");
        state.counters.live_buffers -= 1;
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
    ) -> VkResult<(vk::Image, vk::MemoryRequirements)> {
        let _call = self.enter();
        let mut state = self.state();
        let image = vk::Image::from_raw(state.next_handle());
        let e = info.extent;
        // every test format is four bytes per texel
        let size = e.width as u64 * e.height as u64 * e.depth as u64 * 4;
        state.images.insert(
            image,
            FakeResource {
                size,
                binding: None,
            },
        );
        state.counters.live_images += 1;
        Ok((image, state.requirements(size)))
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let _call = self.enter();
        let mut state = self.state();
        let size = state.images.get(&image).expect("unknown image").size;
        state.bind(memory, offset, size);
        state.images.get_mut(&image).unwrap().binding = Some((memory, offset));
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let _call = self.enter();
        let mut state = self.state();
        state
            .images
            .remove(&image)
            .expect("destroying an image that does not exist");
        state.counters.live_images -= 1;
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VkResult<()> {
        let _call = self.enter();
        let mut state = self.state();
        let src = state.buffers.get(&src).and_then(|b| b.binding);
        let dst = state.buffers.get(&dst).and_then(|b| b.binding);
        let (Some(src), Some(dst)) = (src, dst) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let bytes = state.read(src, size);
        state.write(dst, &bytes);
        state.counters.buffer_copies += 1;
        Ok(())
    }

    fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) -> VkResult<()> {
        let _call = self.enter();
        let mut state = self.state();
        let size = extent.width as u64 * extent.height as u64 * extent.depth as u64 * 4;
        let src = state.buffers.get(&src).and_then(|b| b.binding);
        let dst = state.images.get(&dst).and_then(|i| i.binding);
        let (Some(src), Some(dst)) = (src, dst) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let bytes = state.read(src, size);
        state.write(dst, &bytes);
        state.counters.image_copies += 1;
        Ok(())
    }
}
