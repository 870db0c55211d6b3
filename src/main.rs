use anyhow::Result;
use ash::vk;
use flora_mem::alloc::{AllocatorDesc, DeviceLink, GpuAllocator, OrFatal, StackAllocator};
use flora_mem::vkn::{ContextCreateInfo, VulkanContext, VulkanDevice};
use std::sync::Arc;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

fn quad() -> [Vertex; 4] {
    [
        Vertex {
            position: [-1.0, -1.0, 0.0],
            uv: [0.0, 0.0],
        },
        Vertex {
            position: [1.0, -1.0, 0.0],
            uv: [1.0, 0.0],
        },
        Vertex {
            position: [1.0, 1.0, 0.0],
            uv: [1.0, 1.0],
        },
        Vertex {
            position: [-1.0, 1.0, 0.0],
            uv: [0.0, 1.0],
        },
    ]
}

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let v = if (x / 8 + y / 8) % 2 == 0 { 255 } else { 32 };
            [v, v, v, 255]
        })
        .collect()
}

pub fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let context = VulkanContext::new(ContextCreateInfo {
        name: "flora-mem-demo".to_string(),
    })?;
    let link = Arc::new(DeviceLink::new(VulkanDevice::new(&context)?));

    let allocator = GpuAllocator::new(link.clone(), AllocatorDesc::default())?;
    let mut frame_stack = StackAllocator::new(link, allocator.desc())?;

    let vertices = allocator
        .upload_pod(&quad(), vk::BufferUsageFlags::VERTEX_BUFFER)
        .or_fatal("upload vertex buffer");
    let indices = allocator
        .upload_pod(&[0u32, 1, 2, 2, 3, 0], vk::BufferUsageFlags::INDEX_BUFFER)
        .or_fatal("upload index buffer");

    let extent = vk::Extent3D {
        width: 64,
        height: 64,
        depth: 1,
    };
    let texture = allocator
        .upload_image(
            &checkerboard(extent.width),
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::empty(),
        )
        .or_fatal("upload texture");

    for frame in 0..3u32 {
        let uniforms = frame_stack.create_buffer(
            256,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::empty(),
        )?;
        frame_stack
            .map(&uniforms)?
            .write_pod(0, &[frame as f32; 16])?;
        frame_stack.reset();
    }

    allocator.report();

    allocator.destroy_image(texture)?;
    allocator.destroy_buffer(indices)?;
    allocator.destroy_buffer(vertices)?;
    drop(frame_stack);
    allocator.destroy();

    context.device().wait_idle()?;
    Ok(())
}
