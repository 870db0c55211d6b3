use ash::vk;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error(
        "no memory type matches filter {type_filter:#b} (required: {required:?}, forbidden: {forbidden:?})"
    )]
    NoSuitableHeap {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
        forbidden: vk::MemoryPropertyFlags,
    },

    #[error("requested {requested} bytes but a block only holds {block_size} bytes")]
    OversizeRequest { requested: u64, block_size: u64 },

    #[error("native call `{op}` failed: {result}")]
    NativeCallFailure { op: &'static str, result: vk::Result },

    #[error("{kind} handle is not owned by this allocator (double free?)")]
    UnknownHandle { kind: &'static str },

    #[error("memory type {memory_type} is not host visible")]
    NotHostVisible { memory_type: u32 },

    #[error("mapped write of {len} bytes at {offset} exceeds the {size} byte allocation")]
    MappedRangeOverflow { offset: u64, len: u64, size: u64 },

    #[error("block memory {memory:?} was released while still mapped")]
    MappingReleased { memory: vk::DeviceMemory },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("invalid allocator description: {0}")]
    InvalidDesc(String),
}

pub type Result<T> = std::result::Result<T, AllocError>;

/// Terminates the caller on allocator failure.
///
/// Device memory exhaustion or driver failure leaves no valid continuation
/// for a resource load, so the resource layer logs and aborts instead of
/// threading the error further up.
pub trait OrFatal<T> {
    fn or_fatal(self, op: &str) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    #[track_caller]
    fn or_fatal(self, op: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => {
                log::error!("{op} failed: {e}");
                panic!("{op} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_operation() {
        let e = AllocError::NativeCallFailure {
            op: "vkAllocateMemory",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        assert!(e.to_string().contains("vkAllocateMemory"));
    }

    #[test]
    #[should_panic(expected = "load texture failed")]
    fn or_fatal_panics_on_error() {
        let r: Result<()> = Err(AllocError::OversizeRequest {
            requested: 2048,
            block_size: 1024,
        });
        r.or_fatal("load texture");
    }

    #[test]
    fn or_fatal_passes_values_through() {
        let r: Result<u32> = Ok(7);
        assert_eq!(r.or_fatal("noop"), 7);
    }
}
