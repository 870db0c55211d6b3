use super::{CommandPool, Device, Fence, Queue};
use ash::{prelude::VkResult, vk};

pub struct CommandBuffer {
    device: Device,
    command_pool: CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool.as_raw(), &[self.command_buffer]);
        }
    }
}

impl std::ops::Deref for CommandBuffer {
    type Target = vk::CommandBuffer;
    fn deref(&self) -> &Self::Target {
        &self.command_buffer
    }
}

impl CommandBuffer {
    pub fn new(device: &Device, command_pool: &CommandPool) -> VkResult<Self> {
        let command_buffer = create_cmdbuf(device, command_pool.as_raw())?;
        Ok(Self {
            device: device.clone(),
            command_pool: command_pool.clone(),
            command_buffer,
        })
    }

    pub fn as_raw(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn begin(&self, is_onetime: bool) -> VkResult<()> {
        let flags = if is_onetime {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };

        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
        }
    }

    pub fn end(&self) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer) }
    }

    pub fn submit(&self, queue: &Queue, fence: Option<&Fence>) -> VkResult<()> {
        let command_buffers = [self.as_raw()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let vk_fence = fence.map(|f| f.as_raw()).unwrap_or(vk::Fence::null());
        unsafe {
            self.device
                .queue_submit(queue.as_raw(), &[submit_info], vk_fence)
        }
    }
}

fn create_cmdbuf(device: &Device, command_pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(command_pool)
        .command_buffer_count(1);
    let buffers = unsafe { device.allocate_command_buffers(&allocate_info)? };
    Ok(buffers[0])
}

/// Records `executor` into a fresh command buffer, submits it and blocks on a
/// fence until the device has finished.
pub fn execute_one_time_command<R>(
    device: &Device,
    pool: &CommandPool,
    queue: &Queue,
    executor: impl FnOnce(&CommandBuffer) -> R,
) -> VkResult<R> {
    let command_buffer = CommandBuffer::new(device, pool)?;

    command_buffer.begin(true)?;
    let result = executor(&command_buffer);
    command_buffer.end()?;

    let fence = Fence::new(device, false)?;
    command_buffer.submit(queue, Some(&fence))?;
    fence.wait()?;
    Ok(result)
}
