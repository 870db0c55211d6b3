//! Device-memory sub-allocation: large native blocks per memory type, carved
//! into buffer and image ranges.

mod error;
pub use error::*;

mod desc;
pub use desc::*;

mod heap;
pub use heap::*;

mod span_index;
pub use span_index::*;

mod device_link;
pub use device_link::*;

mod mapping;
pub use mapping::*;

mod block;
pub use block::*;

mod memory_type;
pub use memory_type::*;

mod resource;
pub use resource::*;

mod stats;
pub use stats::*;

mod general;
pub use general::*;

mod stack;
pub use stack::*;

#[cfg(test)]
mod fake_device;
#[cfg(test)]
pub use fake_device::*;

#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
