use super::{AllocError, Result};
use ash::{prelude::VkResult, vk};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Every call the allocator makes into the driver.
///
/// Implementations do not need to be internally synchronized: callers only
/// reach them through [`DeviceLink`], which serializes all calls.
pub trait NativeDevice: Send + Sync {
    /// Property flags of every memory type, in device order.
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags>;

    fn allocate_memory(&self, memory_type: u32, size: vk::DeviceSize)
        -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);

    /// Maps `[0, size)` of `memory` and returns the host base address.
    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
    ) -> VkResult<(vk::Buffer, vk::MemoryRequirements)>;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
    ) -> VkResult<(vk::Image, vk::MemoryRequirements)>;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn destroy_image(&self, image: vk::Image);

    /// Copies `size` bytes from the start of `src` to the start of `dst` and
    /// returns once the device has finished.
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VkResult<()>;

    /// Copies tightly packed texels from `src` into `dst`, leaving `dst` in
    /// `SHADER_READ_ONLY_OPTIMAL`, and returns once the device has finished.
    fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) -> VkResult<()>;
}

/// The allocator's connection to the driver, guarded by the native-call lock.
///
/// The lock is re-entrant so a call chain that already holds it (a mapping
/// being created, a transfer in flight) can issue further driver calls.
///
/// Lock order: the allocator's bookkeeping lock may be held while taking this
/// one, never the other way round.
pub struct DeviceLink {
    device: Box<dyn NativeDevice>,
    memory_types: Vec<vk::MemoryPropertyFlags>,
    lock: ReentrantMutex<()>,
}

impl DeviceLink {
    pub fn new(device: impl NativeDevice + 'static) -> Self {
        let memory_types = device.memory_types();
        log::debug!("Device exposes {} memory types", memory_types.len());
        Self {
            device: Box::new(device),
            memory_types,
            lock: ReentrantMutex::new(()),
        }
    }

    pub fn memory_types(&self) -> &[vk::MemoryPropertyFlags] {
        &self.memory_types
    }

    /// Holds the native-call lock across several calls.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Runs one fallible driver call under the native-call lock.
    pub fn call<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn NativeDevice) -> VkResult<R>,
    ) -> Result<R> {
        let _guard = self.lock.lock();
        f(self.device.as_ref()).map_err(|result| {
            log::error!("{op} failed: {result}");
            AllocError::NativeCallFailure { op, result }
        })
    }

    /// Runs a driver call that cannot report failure (destroy, free, unmap).
    pub fn call_void(&self, f: impl FnOnce(&dyn NativeDevice)) {
        let _guard = self.lock.lock();
        f(self.device.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::FakeDevice;
    use std::sync::Arc;

    #[test]
    fn failures_name_the_operation() {
        let fake = FakeDevice::new();
        fake.fail_next_allocation();
        let link = DeviceLink::new(fake.clone());

        let err = link
            .call("vkAllocateMemory", |d| d.allocate_memory(0, 1024))
            .unwrap_err();
        assert_eq!(
            err,
            AllocError::NativeCallFailure {
                op: "vkAllocateMemory",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            }
        );
    }

    #[test]
    fn native_lock_is_reentrant() {
        let link = DeviceLink::new(FakeDevice::new());
        let _outer = link.lock();
        let memory = link
            .call("vkAllocateMemory", |d| d.allocate_memory(0, 64))
            .unwrap();
        link.call_void(|d| {
            // nested call from inside a call
            link.call_void(|inner| inner.free_memory(memory));
            let _ = d.memory_types();
        });
    }

    #[test]
    fn calls_from_many_threads_are_serialized() {
        let fake = FakeDevice::new();
        let link = Arc::new(DeviceLink::new(fake.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let link = link.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let m = link
                            .call("vkAllocateMemory", |d| d.allocate_memory(0, 16))
                            .unwrap();
                        link.call_void(|d| d.free_memory(m));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fake.counters().allocations, 200);
        assert_eq!(fake.counters().live_memory, 0);
        assert_eq!(fake.counters().max_concurrent_calls, 1);
    }
}
