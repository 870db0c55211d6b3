use super::{Instance, PhysicalDevice, Queue, QueueFamilyIndices};
use anyhow::Result;
use ash::{prelude::VkResult, vk};
use std::sync::Arc;

struct DeviceInner {
    device: ash::Device,
    // keeps the instance alive for as long as any clone of the device exists
    _instance: Instance,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed before device destruction: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}

#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl std::ops::Deref for Device {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}

impl Device {
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        queue_family_indices: &QueueFamilyIndices,
    ) -> Result<Self> {
        let device = create_device(
            instance.as_raw(),
            physical_device.as_raw(),
            queue_family_indices,
        )?;
        Ok(Self(Arc::new(DeviceInner {
            device,
            _instance: instance.clone(),
        })))
    }

    pub fn as_raw(&self) -> &ash::Device {
        &self.0.device
    }

    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.as_raw().device_wait_idle() }
    }

    /// Get a queue from the device, only the first queue is returned in current implementation
    pub fn get_queue(&self, queue_family_index: u32) -> Queue {
        let queue = unsafe { self.as_raw().get_device_queue(queue_family_index, 0) };
        Queue::new(queue)
    }
}

fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_indices: &QueueFamilyIndices,
) -> VkResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_indices.general)
        .queue_priorities(&queue_priorities)];

    // no extensions: the allocator only needs core 1.0 memory and transfer calls
    let device_create_info =
        vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);

    unsafe { instance.create_device(physical_device, &device_create_info, None) }
}
