use super::{Instance, QueueFamilyIndices};
use anyhow::{anyhow, Result};
use ash::vk;
use std::ffi::CStr;

#[derive(Clone)]
pub struct PhysicalDevice {
    device: vk::PhysicalDevice,
    name: String,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDevice {
    /// Scores every device, reports the evaluation and picks the best one.
    pub fn new(instance: &Instance) -> Result<(Self, QueueFamilyIndices)> {
        let (device, name, queue_family_indices) = create_physical_device(instance.as_raw())?;
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(device) };
        let physical_device = Self {
            device,
            name,
            memory_properties,
        };
        log::info!("\n{}", physical_device.memory_types_table());
        Ok((physical_device, queue_family_indices))
    }

    pub fn as_raw(&self) -> vk::PhysicalDevice {
        self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Property flags of each memory type, indexed by memory type index.
    pub fn memory_type_flags(&self) -> Vec<vk::MemoryPropertyFlags> {
        let props = &self.memory_properties;
        props.memory_types[..props.memory_type_count as usize]
            .iter()
            .map(|t| t.property_flags)
            .collect()
    }

    pub fn memory_types_table(&self) -> String {
        let props = &self.memory_properties;
        let mut table = comfy_table::Table::new();
        table.set_header(vec!["Memory Type", "Heap", "Heap Size (MB)", "Properties"]);

        for (index, ty) in props.memory_types[..props.memory_type_count as usize]
            .iter()
            .enumerate()
        {
            let heap = props.memory_heaps[ty.heap_index as usize];
            table.add_row(vec![
                index.to_string(),
                ty.heap_index.to_string(),
                format!("{:.2}", heap.size as f64 / (1024.0 * 1024.0)),
                format!("{:?}", ty.property_flags),
            ]);
        }
        format!("--- Memory Types of {} ---\n{table}", self.name)
    }
}

#[derive(Debug, Clone)]
struct DeviceInfo {
    device: vk::PhysicalDevice,
    score: i32,
    total_memory: f64,
    device_name: String,
    device_type: vk::PhysicalDeviceType,
}

/// Discrete beats integrated beats everything else; memory breaks ties.
fn device_score(device_type: vk::PhysicalDeviceType, total_memory_mb: f64) -> i32 {
    let gpu_type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 50,
        _ => 10,
    };
    let mem_score = (total_memory_mb / 256.0).floor() as i32;
    gpu_type_score + mem_score
}

#[derive(Debug, Default)]
struct QueueFamilyIndexCandidates {
    graphics: Vec<u32>,
    compute: Vec<u32>,
}

impl QueueFamilyIndexCandidates {
    fn from_properties(props: &[vk::QueueFamilyProperties]) -> Self {
        let mut candidates = Self::default();
        for (idx, family) in props.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = idx as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                candidates.graphics.push(index);
            }
            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                candidates.compute.push(index);
            }
        }
        candidates
    }
}

fn pick_best_queue_family_indices(
    candidates: &QueueFamilyIndexCandidates,
) -> Option<QueueFamilyIndices> {
    // graphics and compute families support transfers implicitly
    let general_idx = *candidates
        .graphics
        .iter()
        .find(|idx| candidates.compute.contains(idx))?;

    Some(QueueFamilyIndices {
        general: general_idx,
    })
}

fn print_device_evaluation_table(evaluations: &[(DeviceInfo, bool)], selected: Option<usize>) {
    let mut table = comfy_table::Table::new();
    table.set_header(vec!["Device", "Type", "Memory (MB)", "Score", "Suitability", "Selected?"]);

    if evaluations.is_empty() {
        table.add_row(vec!["No Vulkan-capable physical devices found.".to_string()]);
    }
    for (idx, (info, suitable)) in evaluations.iter().enumerate() {
        table.add_row(vec![
            info.device_name.clone(),
            format!("{:?}", info.device_type),
            format!("{:.2}", info.total_memory),
            info.score.to_string(),
            if *suitable {
                "Suitable"
            } else {
                "No general queue family"
            }
            .to_string(),
            if Some(idx) == selected { "Yes" } else { "" }.to_string(),
        ]);
    }
    log::info!("\n--- Physical Device Evaluation Report ---\n{table}");
}

fn create_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, String, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let evaluations: Vec<(DeviceInfo, Option<QueueFamilyIndices>)> = devices
        .iter()
        .map(|&dev| {
            let props = unsafe { instance.get_physical_device_properties(dev) };
            let mem_props = unsafe { instance.get_physical_device_memory_properties(dev) };
            let queue_props =
                unsafe { instance.get_physical_device_queue_family_properties(dev) };

            let device_name = unsafe {
                CStr::from_ptr(props.device_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            };
            let total_vram: u64 = mem_props.memory_heaps[..mem_props.memory_heap_count as usize]
                .iter()
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size)
                .sum();
            let total_memory = total_vram as f64 / (1024.0 * 1024.0);

            let queue_family_indices = pick_best_queue_family_indices(
                &QueueFamilyIndexCandidates::from_properties(&queue_props),
            );
            let info = DeviceInfo {
                device: dev,
                score: device_score(props.device_type, total_memory),
                total_memory,
                device_name,
                device_type: props.device_type,
            };
            (info, queue_family_indices)
        })
        .collect();

    let selected = evaluations
        .iter()
        .enumerate()
        .filter(|(_, (_, indices))| indices.is_some())
        .max_by_key(|(_, (info, _))| info.score)
        .map(|(idx, _)| idx);

    let report: Vec<(DeviceInfo, bool)> = evaluations
        .iter()
        .map(|(info, indices)| (info.clone(), indices.is_some()))
        .collect();
    print_device_evaluation_table(&report, selected);

    let (info, indices) = selected
        .and_then(|idx| {
            let (info, indices) = &evaluations[idx];
            indices.map(|indices| (info.clone(), indices))
        })
        .ok_or_else(|| anyhow!("No suitable physical device found, see the evaluation report"))?;

    log::info!(
        "Selected physical device: {} (queue families: {:?})",
        info.device_name,
        indices
    );
    Ok((info.device, info.device_name, indices))
}
