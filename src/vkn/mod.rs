mod context;
pub use context::*;

mod command_pool;
pub use command_pool::*;

mod command_buffer;
pub use command_buffer::*;

mod fence;
pub use fence::*;

mod barrier;
pub use barrier::*;

mod vulkan_device;
pub use vulkan_device::*;
