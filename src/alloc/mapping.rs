use super::{AllocError, DeviceLink, Result};
use ash::vk;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, Weak};

/// Host address of a mapped block.
#[derive(Clone, Copy)]
struct HostPtr(NonNull<u8>);

// The pointer is only dereferenced through `MappedPtr`, whose accesses are
// bounded to the caller's own allocation and made under the slot lock.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

struct SlotState {
    current: Weak<Mapping>,
    /// Set while the native mapping exists, even if `current` already died
    /// and its unmap has not run yet.
    base: Option<HostPtr>,
    generation: u64,
    /// The block's memory is gone; every outstanding `MappedPtr` is dead.
    released: bool,
}

/// Per-block cache of the block's host mapping.
///
/// The block only keeps a weak reference; the mapping lives as long as the
/// longest-lived [`MappedPtr`] and is unmapped when the last one drops.
pub struct MappingSlot {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    state: Mutex<SlotState>,
}

struct Mapping {
    slot: Arc<MappingSlot>,
    link: Arc<DeviceLink>,
    base: HostPtr,
    generation: u64,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let _native = self.link.lock();
        let mut state = self.slot.state.lock().unwrap();
        // a newer mapping may have adopted the native mapping while this one
        // was waiting for the lock, or the block was released underneath us
        if state.generation != self.generation || state.base.is_none() {
            return;
        }
        self.link
            .call_void(|d| d.unmap_memory(self.slot.memory));
        state.base = None;
        log::trace!("Unmapped block memory {:?}", self.slot.memory);
    }
}

impl MappingSlot {
    pub fn new(memory: vk::DeviceMemory, size: vk::DeviceSize) -> Self {
        Self {
            memory,
            size,
            state: Mutex::new(SlotState {
                current: Weak::new(),
                base: None,
                generation: 0,
                released: false,
            }),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.state.lock().unwrap().base.is_some()
    }

    /// Returns a pointer `offset` bytes into the block, mapping the whole
    /// block first if nobody currently holds a mapping.
    ///
    /// `len` bounds the writes made through the returned pointer.
    pub fn map(
        self: &Arc<Self>,
        link: &Arc<DeviceLink>,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
    ) -> Result<MappedPtr> {
        if offset + len > self.size {
            return Err(AllocError::MappedRangeOverflow {
                offset,
                len,
                size: self.size,
            });
        }

        let _native = link.lock();
        let mut state = self.state.lock().unwrap();
        if state.released {
            return Err(AllocError::MappingReleased {
                memory: self.memory,
            });
        }

        let mapping = match state.current.upgrade() {
            Some(mapping) => mapping,
            None => {
                let base = match state.base {
                    Some(base) => base,
                    None => {
                        let ptr = link.call("vkMapMemory", |d| {
                            d.map_memory(self.memory, self.size)
                        })?;
                        let ptr = NonNull::new(ptr).ok_or(AllocError::NativeCallFailure {
                            op: "vkMapMemory",
                            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
                        })?;
                        log::trace!("Mapped block memory {:?}", self.memory);
                        HostPtr(ptr)
                    }
                };
                state.generation += 1;
                state.base = Some(base);
                let mapping = Arc::new(Mapping {
                    slot: self.clone(),
                    link: link.clone(),
                    base,
                    generation: state.generation,
                });
                state.current = Arc::downgrade(&mapping);
                mapping
            }
        };

        Ok(MappedPtr {
            mapping,
            offset,
            len,
        })
    }

    /// Forgets the native mapping ahead of the block's memory being freed.
    ///
    /// Outstanding `MappedPtr`s fail every later access with
    /// [`AllocError::MappingReleased`], and their drops skip the unmap. An
    /// access in flight on another thread finishes before this returns.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        if state.current.strong_count() > 0 {
            log::warn!(
                "Block memory {:?} released while still mapped by {} holder(s)",
                self.memory,
                state.current.strong_count()
            );
        }
        state.current = Weak::new();
        state.base = None;
        state.generation += 1;
        state.released = true;
    }
}

/// A host-visible view into an allocation.
///
/// Clones share the block mapping; the block is unmapped once every
/// `MappedPtr` into it has been dropped.
#[derive(Clone)]
pub struct MappedPtr {
    mapping: Arc<Mapping>,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
}

impl MappedPtr {
    /// Host address of the first byte of the allocation.
    ///
    /// The address is only valid until the owning allocator releases the
    /// block; prefer the bounds-checked accessors.
    pub fn as_ptr(&self) -> Result<*mut u8> {
        self.with_live(|base| unsafe { base.add(self.offset as usize) })
    }

    /// Host address of the start of the whole block.
    pub fn block_base(&self) -> Result<*mut u8> {
        self.with_live(|base| base)
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn len(&self) -> vk::DeviceSize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Runs `f` on the block base while holding the slot lock, so the block
    /// cannot be released mid-access.
    fn with_live<R>(&self, f: impl FnOnce(*mut u8) -> R) -> Result<R> {
        let state = self.mapping.slot.state.lock().unwrap();
        if state.released {
            return Err(AllocError::MappingReleased {
                memory: self.mapping.slot.memory,
            });
        }
        Ok(f(self.mapping.base.0.as_ptr()))
    }

    fn check_range(&self, at: u64, len: u64) -> Result<()> {
        if at + len > self.len {
            return Err(AllocError::MappedRangeOverflow {
                offset: at,
                len,
                size: self.len,
            });
        }
        Ok(())
    }

    /// Copies `data` to `at` bytes into the allocation.
    pub fn write_bytes(&self, at: u64, data: &[u8]) -> Result<()> {
        self.check_range(at, data.len() as u64)?;
        self.with_live(|base| unsafe {
            let target_ptr = base.add((self.offset + at) as usize);
            let mut align = ash::util::Align::new(
                target_ptr.cast(),
                std::mem::align_of::<u8>() as vk::DeviceSize,
                data.len() as vk::DeviceSize,
            );
            align.copy_from_slice(data);
        })
    }

    /// Copies a slice of plain-old-data values to `at` bytes into the allocation.
    pub fn write_pod<T: bytemuck::Pod>(&self, at: u64, data: &[T]) -> Result<()> {
        self.write_bytes(at, bytemuck::cast_slice(data))
    }

    pub fn read_bytes(&self, at: u64, len: u64) -> Result<Vec<u8>> {
        self.check_range(at, len)?;
        let mut data = vec![0u8; len as usize];
        self.with_live(|base| unsafe {
            std::ptr::copy_nonoverlapping(
                base.add((self.offset + at) as usize),
                data.as_mut_ptr(),
                len as usize,
            );
        })?;
        Ok(data)
    }
}

impl std::fmt::Debug for MappedPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedPtr")
            .field("memory", &self.mapping.slot.memory)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
