use super::{AllocError, Result};
use ash::vk;

/// Capacity of every block requested from the device.
pub const DEFAULT_BLOCK_SIZE: vk::DeviceSize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AllocatorDesc {
    pub name: String,
    /// Capacity of general-purpose blocks; also the largest single request.
    pub block_size: vk::DeviceSize,
    /// Capacity of per-frame stack blocks.
    pub stack_block_size: vk::DeviceSize,
}

impl Default for AllocatorDesc {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            stack_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl AllocatorDesc {
    /// Both block sizes set to `block_size`.
    pub fn with_block_size(block_size: vk::DeviceSize) -> Self {
        Self {
            block_size,
            stack_block_size: block_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (what, size) in [
            ("block_size", self.block_size),
            ("stack_block_size", self.stack_block_size),
        ] {
            if size == 0 {
                return Err(AllocError::InvalidDesc(format!("{what} must be non-zero")));
            }
        }
        Ok(())
    }
}
