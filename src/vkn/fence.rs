use super::Device;
use ash::{prelude::VkResult, vk};

pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

impl Fence {
    pub fn new(device: &Device, is_signaled: bool) -> VkResult<Self> {
        let fence = Self::create_fence(device, is_signaled)?;
        Ok(Self {
            device: device.clone(),
            fence,
        })
    }

    pub fn as_raw(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks without timeout until the fence is signaled.
    pub fn wait(&self) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, u64::MAX) }
    }

    fn create_fence(device: &Device, is_signaled: bool) -> VkResult<vk::Fence> {
        let fence_create_flags = if is_signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(fence_create_flags);
        unsafe { device.create_fence(&create_info, None) }
    }
}
