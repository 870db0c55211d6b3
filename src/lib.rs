pub mod alloc;
pub mod vkn;
