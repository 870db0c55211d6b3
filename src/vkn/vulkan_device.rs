use super::{
    execute_one_time_command, record_image_transition_barrier, CommandPool, Device, Queue,
    VulkanContext,
};
use crate::alloc::NativeDevice;
use ash::{prelude::VkResult, vk};

/// [`NativeDevice`] over a real `ash` device.
///
/// Transfers go to the general queue and block the caller on a fence. The
/// command pool is not synchronized here; `DeviceLink` serializes every call.
pub struct VulkanDevice {
    device: Device,
    memory_types: Vec<vk::MemoryPropertyFlags>,
    queue: Queue,
    command_pool: CommandPool,
}

impl VulkanDevice {
    pub fn new(context: &VulkanContext) -> VkResult<Self> {
        let device = context.device().clone();
        let general = context.queue_family_indices().general;
        let command_pool = CommandPool::new(&device, general)?;
        Ok(Self {
            memory_types: context.physical_device().memory_type_flags(),
            queue: device.get_queue(general),
            command_pool,
            device,
        })
    }

    fn one_time(&self, record: impl FnOnce(vk::CommandBuffer)) -> VkResult<()> {
        execute_one_time_command(&self.device, &self.command_pool, &self.queue, |cmdbuf| {
            record(cmdbuf.as_raw())
        })
    }
}

impl NativeDevice for VulkanDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.memory_types.clone()
    }

    fn allocate_memory(
        &self,
        memory_type: u32,
        size: vk::DeviceSize,
    ) -> VkResult<vk::DeviceMemory> {
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type);
        unsafe { self.device.allocate_memory(&allocate_info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
        };
        Ok(ptr.cast())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
    ) -> VkResult<(vk::Buffer, vk::MemoryRequirements)> {
        unsafe {
            let buffer = self.device.create_buffer(info, None)?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            Ok((buffer, requirements))
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
    ) -> VkResult<(vk::Image, vk::MemoryRequirements)> {
        unsafe {
            let image = self.device.create_image(info, None)?;
            let requirements = self.device.get_image_memory_requirements(image);
            Ok((image, requirements))
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VkResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.one_time(|cmdbuf| unsafe {
            self.device.cmd_copy_buffer(cmdbuf, src, dst, &[region]);
        })
    }

    fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) -> VkResult<()> {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(extent);

        self.one_time(|cmdbuf| {
            record_image_transition_barrier(
                &self.device,
                cmdbuf,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                dst,
            );
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    cmdbuf,
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            record_image_transition_barrier(
                &self.device,
                cmdbuf,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                dst,
            );
        })
    }
}
