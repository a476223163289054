//! Attachment groups: the images a render pass draws into
//!
//! Attachments are kept in the order they were added; subpasses refer to them
//! by that index. The depth attachment, if any, always comes last.

use ash::vk;

use crate::render::backends::vulkan::resources::image::{ImageKind, ImageResource, ResourceSet};

/// Most attachments a group may hold, depth included
pub const MAX_ATTACHMENTS: usize = 10;

/// Value an attachment is cleared to when its load op is CLEAR
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

impl ClearValue {
    /// Vulkan clear value
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// One attachment: an image per swap image plus its load/store behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    name: String,
    images: ResourceSet,
    clear: bool,
    store: bool,
    clear_value: ClearValue,
}

impl Attachment {
    /// Attachment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-swap-image images
    pub fn images(&self) -> &ResourceSet {
        &self.images
    }

    /// Image metadata shared by every entry
    pub fn image(&self) -> &ImageResource {
        self.images.first()
    }

    /// Whether the attachment is cleared when the pass begins
    pub fn should_clear(&self) -> bool {
        self.clear
    }

    /// Whether the attachment's contents are kept when the pass ends
    pub fn should_store(&self) -> bool {
        self.store
    }

    /// Whether the attachment has more than one sample per texel
    pub fn is_multisampled(&self) -> bool {
        self.image().multisampled
    }

    /// Whether this is the depth attachment
    pub fn is_depth(&self) -> bool {
        self.image().is_depth()
    }

    /// Clear value used when the pass begins
    pub fn clear_value(&self) -> ClearValue {
        self.clear_value
    }
}

/// Ordered attachments sharing one width and height
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentGroup {
    width: u32,
    height: u32,
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
}

impl AttachmentGroup {
    /// Create an empty group for attachments of `width` x `height`
    ///
    /// # Panics
    ///
    /// Panics on a zero dimension.
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "attachment group needs a non-zero size, got {}x{}", width, height);
        Self {
            width,
            height,
            colors: Vec::new(),
            depth: None,
        }
    }

    fn check_images(&self, name: &str, images: &ResourceSet) {
        assert!(
            self.len() < MAX_ATTACHMENTS,
            "attachment '{}' exceeds the limit of {} attachments",
            name, MAX_ATTACHMENTS
        );
        for image in images.iter() {
            assert!(
                image.width == self.width && image.height == self.height,
                "attachment '{}' is {}x{} but the group is {}x{}",
                name, image.width, image.height, self.width, self.height
            );
        }
    }

    /// Append a color attachment and return its index
    ///
    /// # Panics
    ///
    /// Panics if the images are depth images, have the wrong size, or the group is full.
    pub fn add_attachment(&mut self, name: &str, images: ResourceSet, clear: bool, store: bool) -> u32 {
        self.check_images(name, &images);
        assert!(
            images.iter().all(|image| !image.is_depth()),
            "depth image '{}' must be added with set_depth_attachment",
            name
        );
        assert!(
            self.depth.is_none(),
            "color attachment '{}' added after the depth attachment",
            name
        );

        self.colors.push(Attachment {
            name: name.to_string(),
            images,
            clear,
            store,
            clear_value: ClearValue::Color([0.0; 4]),
        });
        (self.colors.len() - 1) as u32
    }

    /// Set the depth attachment, which always takes the last index
    ///
    /// # Panics
    ///
    /// Panics if a depth attachment is already set or the images are not depth images.
    pub fn set_depth_attachment(&mut self, name: &str, images: ResourceSet, clear: bool, store: bool) -> u32 {
        assert!(self.depth.is_none(), "attachment group already has a depth attachment");
        self.check_images(name, &images);
        assert!(
            images.iter().all(|image| image.kind == ImageKind::Depth),
            "attachment '{}' is not a depth image",
            name
        );

        self.depth = Some(Attachment {
            name: name.to_string(),
            images,
            clear,
            store,
            clear_value: ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
        });
        self.colors.len() as u32
    }

    /// Clear every color attachment to `color`
    pub fn set_clear_color(&mut self, color: [f32; 4]) -> &mut Self {
        for attachment in &mut self.colors {
            attachment.clear_value = ClearValue::Color(color);
        }
        self
    }

    /// Clear the depth attachment to `depth`
    pub fn set_clear_depth(&mut self, depth: f32, stencil: u32) -> &mut Self {
        if let Some(attachment) = &mut self.depth {
            attachment.clear_value = ClearValue::DepthStencil { depth, stencil };
        }
        self
    }

    /// Width shared by every attachment
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height shared by every attachment
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Render area covering the whole group
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Number of attachments, depth included
    pub fn len(&self) -> usize {
        self.colors.len() + usize::from(self.depth.is_some())
    }

    /// Whether the group has no attachments
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of color attachments
    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    /// Index of the depth attachment
    pub fn depth_index(&self) -> Option<u32> {
        self.depth.as_ref().map(|_| self.colors.len() as u32)
    }

    /// The depth attachment
    pub fn depth(&self) -> Option<&Attachment> {
        self.depth.as_ref()
    }

    /// Attachment at `index`
    pub fn get(&self, index: u32) -> Option<&Attachment> {
        let index = index as usize;
        self.colors.get(index).or_else(|| {
            if index == self.colors.len() {
                self.depth.as_ref()
            } else {
                None
            }
        })
    }

    /// Index of the attachment called `name`
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.iter().position(|a| a.name == name).map(|i| i as u32)
    }

    /// Attachments in index order, depth last
    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.colors.iter().chain(self.depth.iter())
    }

    /// Whether any attachment is multisampled
    pub fn any_multisampled(&self) -> bool {
        self.iter().any(Attachment::is_multisampled)
    }

    /// Number of distinct swap images the group holds images for
    pub fn swap_count(&self) -> usize {
        self.iter().map(|a| a.images.len()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(w: u32, h: u32) -> ResourceSet {
        ResourceSet::shared(ImageResource::new(ImageKind::RenderTarget, vk::Format::R8G8B8A8_UNORM, w, h), 2)
    }

    fn depth(w: u32, h: u32) -> ResourceSet {
        ResourceSet::shared(ImageResource::new(ImageKind::Depth, vk::Format::D32_SFLOAT, w, h), 2)
    }

    #[test]
    fn test_depth_is_last() {
        let mut group = AttachmentGroup::new(64, 32);
        assert_eq!(group.add_attachment("albedo", color(64, 32), true, true), 0);
        assert_eq!(group.add_attachment("normals", color(64, 32), true, true), 1);
        assert_eq!(group.set_depth_attachment("depth", depth(64, 32), true, false), 2);

        assert_eq!(group.len(), 3);
        assert_eq!(group.depth_index(), Some(2));
        assert_eq!(group.index_of("normals"), Some(1));
        assert!(group.get(2).unwrap().is_depth());
        assert!(group.get(3).is_none());
        assert_eq!(group.swap_count(), 2);
    }

    #[test]
    #[should_panic(expected = "but the group is 64x32")]
    fn test_mismatched_size_panics() {
        let mut group = AttachmentGroup::new(64, 32);
        group.add_attachment("albedo", color(32, 32), true, true);
    }

    #[test]
    #[should_panic(expected = "non-zero size")]
    fn test_zero_size_panics() {
        AttachmentGroup::new(0, 32);
    }

    #[test]
    #[should_panic(expected = "already has a depth attachment")]
    fn test_single_depth() {
        let mut group = AttachmentGroup::new(8, 8);
        group.set_depth_attachment("depth", depth(8, 8), true, false);
        group.set_depth_attachment("depth2", depth(8, 8), true, false);
    }

    #[test]
    #[should_panic(expected = "exceeds the limit")]
    fn test_attachment_limit() {
        let mut group = AttachmentGroup::new(8, 8);
        for i in 0..=MAX_ATTACHMENTS {
            group.add_attachment(&format!("target{}", i), color(8, 8), false, true);
        }
    }

    #[test]
    fn test_clear_values() {
        let mut group = AttachmentGroup::new(8, 8);
        group.add_attachment("voxel_view", color(8, 8), true, false);
        group.set_depth_attachment("depth", depth(8, 8), true, false);
        group.set_clear_color([1.0, 1.0, 1.0, 0.0]).set_clear_depth(1.0, 0);

        assert_eq!(group.get(0).unwrap().clear_value(), ClearValue::Color([1.0, 1.0, 1.0, 0.0]));
        assert_eq!(
            group.depth().unwrap().clear_value(),
            ClearValue::DepthStencil { depth: 1.0, stencil: 0 }
        );
    }
}
