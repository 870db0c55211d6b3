use super::{AllocError, Result};
use ash::vk;

/// Picks the first memory type (in device order) that is allowed by
/// `type_filter`, has every `required` property and none of the `forbidden`
/// ones.
///
/// Device order matters: drivers list the preferred type for a given property
/// set first, so there is no scoring here.
pub fn find_memory_type(
    memory_types: &[vk::MemoryPropertyFlags],
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
    forbidden: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_types
        .iter()
        .enumerate()
        .take(vk::MAX_MEMORY_TYPES)
        .find(|(i, flags)| {
            type_filter & (1 << i) != 0 && flags.contains(required) && !flags.intersects(forbidden)
        })
        .map(|(i, _)| i as u32)
        .ok_or(AllocError::NoSuitableHeap {
            type_filter,
            required,
            forbidden,
        })
}
