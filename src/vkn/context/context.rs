use super::{Device, Instance, PhysicalDevice, QueueFamilyIndices};
use anyhow::Result;
use ash::Entry;

pub struct ContextCreateInfo {
    pub name: String,
}

/// Headless Vulkan context: no surface, no swapchain.
pub struct VulkanContext {
    device: Device,
    physical_device: PhysicalDevice,
    queue_family_indices: QueueFamilyIndices,
    instance: Instance,
}

impl VulkanContext {
    pub fn new(create_info: ContextCreateInfo) -> Result<Self> {
        let entry = unsafe { Entry::load()? };
        let instance = Instance::new(&entry, &create_info.name)?;
        let (physical_device, queue_family_indices) = PhysicalDevice::new(&instance)?;
        let device = Device::new(&instance, &physical_device, &queue_family_indices)?;

        Ok(Self {
            device,
            physical_device,
            queue_family_indices,
            instance,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn queue_family_indices(&self) -> &QueueFamilyIndices {
        &self.queue_family_indices
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan Context");
    }
}
