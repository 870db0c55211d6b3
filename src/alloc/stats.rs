use ash::vk;

/// Snapshot of one memory type's blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTypeStats {
    pub memory_type: u32,
    pub property_flags: vk::MemoryPropertyFlags,
    pub blocks: usize,
    pub block_size: vk::DeviceSize,
    pub live_allocations: usize,
    pub used_bytes: vk::DeviceSize,
    pub free_bytes: vk::DeviceSize,
    pub free_spans: usize,
    pub largest_free_span: vk::DeviceSize,
}

impl MemoryTypeStats {
    pub fn capacity(&self) -> vk::DeviceSize {
        self.blocks as vk::DeviceSize * self.block_size
    }
}

fn mib(bytes: vk::DeviceSize) -> String {
    format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
}

pub fn stats_table(title: &str, stats: &[MemoryTypeStats]) -> String {
    let mut table = comfy_table::Table::new();
    table.set_header(vec![
        "Memory Type",
        "Properties",
        "Blocks",
        "Live",
        "Used (MB)",
        "Free (MB)",
        "Free Spans",
        "Largest Free (MB)",
    ]);

    if stats.is_empty() {
        table.add_row(vec!["No memory allocated.".to_string()]);
    }
    for s in stats {
        table.add_row(vec![
            s.memory_type.to_string(),
            format!("{:?}", s.property_flags),
            s.blocks.to_string(),
            s.live_allocations.to_string(),
            mib(s.used_bytes),
            mib(s.free_bytes),
            s.free_spans.to_string(),
            mib(s.largest_free_span),
        ]);
    }

    format!("--- {title} ---\n{table}")
}
