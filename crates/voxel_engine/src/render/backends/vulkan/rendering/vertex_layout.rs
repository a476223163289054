//! Vertex format shared by every mesh pipeline

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Mesh vertex as laid out in vertex buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Tangent
    pub tangent: [f32; 3],
    /// Bitangent
    pub bitangent: [f32; 3],
}

/// Vertex input state for the [`Vertex`] format
pub struct VertexLayout;

impl VertexLayout {
    /// Single interleaved binding at index 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attributes at locations 0 through 5
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 6] {
        let attribute = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
            binding: 0,
            location,
            format,
            offset: offset as u32,
        };
        let vec3 = vk::Format::R32G32B32_SFLOAT;
        [
            attribute(0, vec3, 0),
            attribute(1, vec3, 12),
            attribute(2, vk::Format::R32G32_SFLOAT, 24),
            attribute(3, vec3, 32),
            attribute(4, vec3, 44),
            attribute(5, vec3, 56),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_match_struct() {
        assert_eq!(std::mem::size_of::<Vertex>(), 68);
        let vertex = Vertex::default();
        let base = std::ptr::addr_of!(vertex) as usize;
        let offsets = [
            std::ptr::addr_of!(vertex.position) as usize - base,
            std::ptr::addr_of!(vertex.color) as usize - base,
            std::ptr::addr_of!(vertex.tex_coord) as usize - base,
            std::ptr::addr_of!(vertex.normal) as usize - base,
            std::ptr::addr_of!(vertex.tangent) as usize - base,
            std::ptr::addr_of!(vertex.bitangent) as usize - base,
        ];
        let described: Vec<usize> = VertexLayout::attribute_descriptions()
            .iter()
            .map(|a| a.offset as usize)
            .collect();
        assert_eq!(described, offsets);
        assert_eq!(VertexLayout::binding_description().stride, 68);
    }
}
