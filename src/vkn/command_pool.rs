use super::Device;
use ash::{prelude::VkResult, vk};
use std::sync::Arc;

struct CommandPoolInner {
    device: Device,
    command_pool: vk::CommandPool,
}

impl Drop for CommandPoolInner {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Pool for short-lived, one-shot command buffers.
///
/// Not internally synchronized; callers serialize access.
#[derive(Clone)]
pub struct CommandPool(Arc<CommandPoolInner>);

impl CommandPool {
    pub fn new(device: &Device, queue_family_index: u32) -> VkResult<Self> {
        let command_pool = create_command_pool(device, queue_family_index)?;
        Ok(Self(Arc::new(CommandPoolInner {
            device: device.clone(),
            command_pool,
        })))
    }

    pub fn as_raw(&self) -> vk::CommandPool {
        self.0.command_pool
    }
}

fn create_command_pool(device: &ash::Device, queue_family_index: u32) -> VkResult<vk::CommandPool> {
    let command_pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);
    unsafe { device.create_command_pool(&command_pool_info, None) }
}
