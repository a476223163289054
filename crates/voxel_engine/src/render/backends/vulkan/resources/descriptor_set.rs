//! Descriptor set layouts, pools and writes
//!
//! Materials describe their bindings through [`DescriptorSetLayoutBuilder`]; the same
//! binding list sizes the pool, so a material's pool holds exactly what its set needs.

use ash::{vk, Device};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout builder
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding of any type
    pub fn add_binding(mut self, binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build()
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Bindings collected so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Pool sizes needed to allocate `sets` sets of this layout
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize { ty: binding.descriptor_type, descriptor_count: count }),
            }
        }
        sizes
    }

    /// Build the descriptor set layout
    pub fn build(&self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings.clone(),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a descriptor pool with explicit sizes
    pub fn new(device: Device, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(Self { pool, device })
    }

    /// Allocate descriptor sets from this pool
    pub fn allocate_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Buffer {
        binding: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
}

/// Collects descriptor writes for one set and applies them in a single update
#[derive(Debug, Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a buffer range to a uniform or dynamic uniform binding
    pub fn write_buffer(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.pending.push(PendingWrite::Buffer {
            binding,
            descriptor_type,
            info: vk::DescriptorBufferInfo { buffer, offset, range },
        });
        self
    }

    /// Write an image to a sampler, storage or input attachment binding
    pub fn write_image(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.pending.push(PendingWrite::Image {
            binding,
            descriptor_type,
            info: vk::DescriptorImageInfo { sampler, image_view, image_layout: layout },
        });
        self
    }

    /// Number of writes collected
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no writes were collected
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every collected write to `descriptor_set`
    pub fn update(self, device: &Device, descriptor_set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .map(|pending| match pending {
                PendingWrite::Buffer { binding, descriptor_type, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
                PendingWrite::Image { binding, descriptor_type, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(*descriptor_type)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_aggregate_by_type() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(3, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, vk::ShaderStageFlags::VERTEX);

        let sizes = builder.pool_sizes(2);
        assert_eq!(sizes.len(), 3);

        let count = |ty| sizes.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count);
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(2));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(4));
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC), Some(2));
    }

    #[test]
    fn test_writer_collects_writes() {
        let writer = DescriptorSetWriter::new()
            .write_buffer(0, vk::DescriptorType::UNIFORM_BUFFER, vk::Buffer::null(), 0, 64)
            .write_image(
                1,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
            );
        assert_eq!(writer.len(), 2);
        assert!(!writer.is_empty());
    }
}
