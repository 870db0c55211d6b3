use ash::vk;
use std::ops::Deref;

/// A buffer bound to sub-allocated memory.
///
/// Plain handle: destroying it is an explicit call on the allocator that
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
}

impl Deref for Buffer {
    type Target = vk::Buffer;
    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl Buffer {
    pub(crate) fn new(buffer: vk::Buffer, size: vk::DeviceSize) -> Self {
        Self { buffer, size }
    }

    /// Returns the raw Vulkan buffer handle.
    pub fn as_raw(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size the buffer was created with, not the size of its memory range.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

/// A 2D image bound to sub-allocated memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Image {
    image: vk::Image,
    extent: vk::Extent3D,
    format: vk::Format,
}

impl Deref for Image {
    type Target = vk::Image;
    fn deref(&self) -> &Self::Target {
        &self.image
    }
}

impl Image {
    pub(crate) fn new(image: vk::Image, extent: vk::Extent3D, format: vk::Format) -> Self {
        Self {
            image,
            extent,
            format,
        }
    }

    pub fn as_raw(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

/// Image create info for a single-mip, single-layer, optimally tiled 2D image.
pub fn image_create_info<'a>(
    extent: vk::Extent3D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo<'a> {
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(extent)
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1)
        .flags(vk::ImageCreateFlags::empty())
}

/// Bytes per texel of the uncompressed formats `upload_image` accepts.
pub fn texel_size(format: vk::Format) -> Option<vk::DeviceSize> {
    use vk::Format as F;
    let size = match format {
        F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SRGB => 1,
        F::R8G8_UNORM | F::R8G8_UINT | F::R16_UNORM | F::R16_UINT | F::R16_SFLOAT => 2,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::R8G8B8A8_UINT
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::A2B10G10R10_UNORM_PACK32
        | F::R16G16_SFLOAT
        | F::R32_UINT
        | F::R32_SFLOAT => 4,
        F::R16G16B16A16_UNORM | F::R16G16B16A16_SFLOAT | F::R32G32_SFLOAT => 8,
        F::R32G32B32A32_UINT | F::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

pub fn buffer_create_info<'a>(
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> vk::BufferCreateInfo<'a> {
    vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}
