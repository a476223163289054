//! Shader parameters and std140 packing
//!
//! A [`ParameterGroup`] holds the values of one uniform block as an
//! insertion-ordered list of named slots. The order entries were first looked up
//! in is the order they are packed in, so a group's layout must mirror the
//! declaration order of the block in the shader:
//!
//! ```text
//! layout(std140, binding = 0) uniform Object {   group.set("model", Mat4::identity());
//!     mat4 model;     // offset 0                group.set("color", Vec3::x());
//!     vec4 color;     // offset 64               group.set("count", 4);
//!     int count;      // offset 80
//! };
//! ```
//!
//! Every value type carries its own std140 alignment. Writing aligns the cursor
//! against the real address of the destination memory, not against the start of
//! the slice, so a group can be written into a sub-range of a mapped buffer.
//! `vec3` values occupy a full 16-byte slot with a zeroed fourth component; a
//! scalar following a `vec3` therefore starts on the next 16-byte boundary.
//! GLSL's own std140 rules would let that scalar share the vec3's last four
//! bytes (a `vec3 color` would put `count` at 76), so shaders declare such
//! members as `vec4` or add explicit padding to match this layout.
//!
//! Once a slot has been assigned a type it keeps it. Assigning a value of a
//! different type is a programming error: [`ParameterSlot::set`] panics,
//! [`ParameterSlot::try_assign`] reports [`ParameterError::TypeMismatch`].

use thiserror::Error;

use crate::foundation::math::{Mat4, Vec2, Vec3, Vec4};
use crate::render::backends::vulkan::resources::image::ImageBinding;

/// Largest vec4 array a single parameter may hold, in bytes
pub const MAX_UNIFORM_BUFFER_SIZE: usize = 512;

const VEC4_SIZE: usize = 16;

/// Worst-case bytes needed to place `bytes` at an address aligned to `alignment`
pub fn aligned_size(alignment: usize, bytes: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "alignment must be a non-zero power of two, got {}",
        alignment
    );
    (alignment - 1) + bytes
}

/// Round `size` up to a multiple of `alignment`; an alignment of 0 leaves it unchanged
pub fn round_up(size: usize, alignment: usize) -> usize {
    if alignment == 0 {
        size
    } else {
        size.div_ceil(alignment) * alignment
    }
}

/// Type tag of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// 4x4 float matrix
    Mat4,
    /// 4-component float vector
    Vec4,
    /// 3-component float vector
    Vec3,
    /// 2-component float vector
    Vec2,
    /// 32-bit float
    Float,
    /// 32-bit signed int
    Int,
    /// 32-bit unsigned int
    UInt,
    /// Boolean, stored as a 32-bit value
    Bool,
    /// Fixed-length array of vec4
    Vec4Array,
    /// Image reference bound through the descriptor set
    Sampler,
}

impl ParameterKind {
    /// std140 base alignment
    pub fn std140_alignment(self) -> usize {
        match self {
            Self::Mat4 | Self::Vec4 | Self::Vec3 | Self::Vec4Array => 16,
            Self::Vec2 => 8,
            Self::Float | Self::Int | Self::UInt | Self::Bool => 4,
            Self::Sampler => 1,
        }
    }
}

/// A typed shader parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// 4x4 float matrix, column major
    Mat4(Mat4),
    /// 4-component vector
    Vec4(Vec4),
    /// 3-component vector
    Vec3(Vec3),
    /// 2-component vector
    Vec2(Vec2),
    /// Float scalar
    Float(f32),
    /// Signed int scalar
    Int(i32),
    /// Unsigned int scalar
    UInt(u32),
    /// Boolean
    Bool(bool),
    /// Fixed-length vec4 array
    Vec4Array(Vec<Vec4>),
    /// Image bound as sampler, storage image or input attachment
    Sampler(ImageBinding),
}

impl ParameterValue {
    /// Type tag
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Mat4(_) => ParameterKind::Mat4,
            Self::Vec4(_) => ParameterKind::Vec4,
            Self::Vec3(_) => ParameterKind::Vec3,
            Self::Vec2(_) => ParameterKind::Vec2,
            Self::Float(_) => ParameterKind::Float,
            Self::Int(_) => ParameterKind::Int,
            Self::UInt(_) => ParameterKind::UInt,
            Self::Bool(_) => ParameterKind::Bool,
            Self::Vec4Array(_) => ParameterKind::Vec4Array,
            Self::Sampler(_) => ParameterKind::Sampler,
        }
    }

    /// Size of the value's data in bytes
    pub fn raw_size(&self) -> usize {
        match self {
            Self::Mat4(_) => 64,
            Self::Vec4(_) => 16,
            Self::Vec3(_) => 12,
            Self::Vec2(_) => 8,
            Self::Float(_) | Self::Int(_) | Self::UInt(_) | Self::Bool(_) => 4,
            Self::Vec4Array(values) => values.len() * VEC4_SIZE,
            Self::Sampler(_) => 0,
        }
    }

    /// std140 base alignment
    pub fn std140_alignment(&self) -> usize {
        self.kind().std140_alignment()
    }

    /// Bytes reserved for this value in a uniform buffer
    pub fn aligned_size(&self) -> usize {
        match self {
            Self::Vec4Array(values) => values.len() * aligned_size(16, VEC4_SIZE),
            Self::Sampler(_) => 0,
            _ => aligned_size(self.std140_alignment(), self.raw_size()),
        }
    }

    /// Whether the value lives in a uniform buffer
    pub fn is_uniform_data(&self) -> bool {
        !matches!(self, Self::Sampler(_))
    }

    fn footprint(&self) -> usize {
        match self {
            Self::Vec3(_) => VEC4_SIZE,
            _ => self.raw_size(),
        }
    }
}

impl From<Mat4> for ParameterValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value)
    }
}

impl From<Vec4> for ParameterValue {
    fn from(value: Vec4) -> Self {
        Self::Vec4(value)
    }
}

impl From<Vec3> for ParameterValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value)
    }
}

impl From<Vec2> for ParameterValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value)
    }
}

impl From<f32> for ParameterValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParameterValue {
    fn from(value: u32) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<Vec4>> for ParameterValue {
    fn from(value: Vec<Vec4>) -> Self {
        Self::Vec4Array(value)
    }
}

impl From<&[Vec4]> for ParameterValue {
    fn from(value: &[Vec4]) -> Self {
        Self::Vec4Array(value.to_vec())
    }
}

impl From<ImageBinding> for ParameterValue {
    fn from(value: ImageBinding) -> Self {
        Self::Sampler(value)
    }
}

/// Parameter assignment errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// The slot already holds a value of another type
    #[error("Parameter '{name}' holds {expected:?}, cannot assign {found:?}")]
    TypeMismatch {
        /// Parameter name
        name: String,
        /// Type fixed by the first assignment
        expected: ParameterKind,
        /// Type of the rejected value
        found: ParameterKind,
    },

    /// The group is frozen and the name is not in it
    #[error("Parameter group is frozen, cannot add '{name}'")]
    Frozen {
        /// Parameter name
        name: String,
    },

    /// A vec4 array changed length after its buffer was sized
    #[error("Parameter '{name}' holds {expected} vec4s, cannot assign {found}")]
    ArrayLength {
        /// Parameter name
        name: String,
        /// Element count fixed by the first assignment
        expected: usize,
        /// Element count of the rejected value
        found: usize,
    },

    /// A vec4 array exceeds the uniform array limit
    #[error("Parameter '{name}' needs {bytes} bytes, arrays must stay below {MAX_UNIFORM_BUFFER_SIZE}")]
    ArrayTooLarge {
        /// Parameter name
        name: String,
        /// Size of the rejected array
        bytes: usize,
    },
}

/// A named, type-stable parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    name: String,
    value: Option<ParameterValue>,
}

impl ParameterSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
        }
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value, `None` until first assigned
    pub fn value(&self) -> Option<&ParameterValue> {
        self.value.as_ref()
    }

    /// Type fixed by the first assignment
    pub fn kind(&self) -> Option<ParameterKind> {
        self.value.as_ref().map(ParameterValue::kind)
    }

    /// Assign a value, rejecting a change of type
    pub fn try_assign(&mut self, value: impl Into<ParameterValue>) -> Result<(), ParameterError> {
        let value = value.into();

        if let ParameterValue::Vec4Array(values) = &value {
            let bytes = values.len() * VEC4_SIZE;
            if bytes >= MAX_UNIFORM_BUFFER_SIZE {
                return Err(ParameterError::ArrayTooLarge { name: self.name.clone(), bytes });
            }
        }

        if let Some(current) = &self.value {
            if current.kind() != value.kind() {
                return Err(ParameterError::TypeMismatch {
                    name: self.name.clone(),
                    expected: current.kind(),
                    found: value.kind(),
                });
            }
            if let (ParameterValue::Vec4Array(current), ParameterValue::Vec4Array(new)) = (current, &value) {
                if current.len() != new.len() {
                    return Err(ParameterError::ArrayLength {
                        name: self.name.clone(),
                        expected: current.len(),
                        found: new.len(),
                    });
                }
            }
        }

        self.value = Some(value);
        Ok(())
    }

    /// Assign a value
    ///
    /// # Panics
    ///
    /// Panics if the value's type differs from the type the slot was first given.
    pub fn set(&mut self, value: impl Into<ParameterValue>) -> &mut Self {
        if let Err(e) = self.try_assign(value) {
            log::error!("{}", e);
            panic!("{}", e);
        }
        self
    }
}

/// Insertion-ordered parameters of one uniform block
///
/// Groups hold a handful of entries, so lookups scan the slot list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGroup {
    slots: Vec<ParameterSlot>,
    frozen: bool,
}

impl ParameterGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    /// Slot for `name`, appending an empty one if the name is new
    pub fn try_slot(&mut self, name: &str) -> Result<&mut ParameterSlot, ParameterError> {
        let index = match self.position(name) {
            Some(index) => index,
            None if self.frozen => return Err(ParameterError::Frozen { name: name.to_string() }),
            None => {
                self.slots.push(ParameterSlot::new(name));
                self.slots.len() - 1
            }
        };
        Ok(&mut self.slots[index])
    }

    /// Slot for `name`, appending an empty one if the name is new
    ///
    /// # Panics
    ///
    /// Panics if the group is frozen and `name` is not in it.
    pub fn slot(&mut self, name: &str) -> &mut ParameterSlot {
        match self.try_slot(name) {
            Ok(slot) => slot,
            Err(e) => {
                log::error!("{}", e);
                panic!("{}", e);
            }
        }
    }

    /// Assign `value` to `name`
    pub fn try_set(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), ParameterError> {
        self.try_slot(name)?.try_assign(value)
    }

    /// Assign `value` to `name`, panicking on a type change or a frozen group
    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        self.slot(name).set(value);
        self
    }

    /// Value of `name`, if present and assigned
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.position(name).and_then(|index| self.slots[index].value())
    }

    /// Forbid adding new names; existing ones stay assignable
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn thaw(&mut self) {
        self.frozen = false;
    }

    /// Whether the group is frozen
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of slots, assigned or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the group has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSlot> {
        self.slots.iter()
    }

    /// Assigned uniform values in insertion order
    pub fn uniform_values(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value().map(|value| (slot.name(), value)))
            .filter(|(_, value)| value.is_uniform_data())
    }

    /// Assigned image bindings in insertion order
    pub fn samplers(&self) -> impl Iterator<Item = (&str, &ImageBinding)> {
        self.slots.iter().filter_map(|slot| match slot.value() {
            Some(ParameterValue::Sampler(binding)) => Some((slot.name(), binding)),
            _ => None,
        })
    }

    /// Whether any uniform data is assigned
    pub fn has_uniform_data(&self) -> bool {
        self.uniform_values().next().is_some()
    }

    /// Buffer size needed to hold the group at any base address
    pub fn packed_size(&self) -> usize {
        self.uniform_values().map(|(_, value)| value.aligned_size()).sum()
    }

    /// Write every assigned uniform value into `bytes` in insertion order
    ///
    /// Returns the offset of each written value relative to the start of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is too small for the group.
    pub fn write_std140(&self, bytes: &mut [u8]) -> Vec<usize> {
        let mut cursor = 0;
        let mut offsets = Vec::with_capacity(self.slots.len());

        for (name, value) in self.uniform_values() {
            let start = align_cursor(bytes, cursor, value.std140_alignment());
            let end = start + value.footprint();
            assert!(
                end <= bytes.len(),
                "parameter '{}' needs bytes {}..{} but the buffer holds {}",
                name, start, end, bytes.len()
            );
            write_value(value, &mut bytes[start..end]);
            offsets.push(start);
            cursor = end;
        }

        offsets
    }
}

fn align_cursor(bytes: &[u8], cursor: usize, alignment: usize) -> usize {
    let padding = bytes[cursor.min(bytes.len())..].as_ptr().align_offset(alignment);
    cursor + padding
}

fn write_value(value: &ParameterValue, dst: &mut [u8]) {
    match value {
        ParameterValue::Mat4(m) => dst.copy_from_slice(bytemuck::cast_slice(m.as_slice())),
        ParameterValue::Vec4(v) => dst.copy_from_slice(bytemuck::cast_slice(v.as_slice())),
        ParameterValue::Vec3(v) => {
            dst[..12].copy_from_slice(bytemuck::cast_slice(v.as_slice()));
            dst[12..].fill(0);
        }
        ParameterValue::Vec2(v) => dst.copy_from_slice(bytemuck::cast_slice(v.as_slice())),
        ParameterValue::Float(f) => dst.copy_from_slice(&f.to_ne_bytes()),
        ParameterValue::Int(i) => dst.copy_from_slice(&i.to_ne_bytes()),
        ParameterValue::UInt(u) => dst.copy_from_slice(&u.to_ne_bytes()),
        ParameterValue::Bool(b) => dst.copy_from_slice(&u32::from(*b).to_ne_bytes()),
        ParameterValue::Vec4Array(values) => {
            // Each element sits on its own 16-byte boundary
            for (chunk, v) in dst.chunks_exact_mut(VEC4_SIZE).zip(values) {
                chunk.copy_from_slice(bytemuck::cast_slice(v.as_slice()));
            }
        }
        ParameterValue::Sampler(_) => {}
    }
}

/// Per-object parameter groups behind one dynamic uniform binding
///
/// Every object gets the same block layout at a stride rounded up to the
/// device's minimum uniform buffer offset alignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicParameters {
    objects: Vec<ParameterGroup>,
}

impl DynamicParameters {
    /// Create `count` empty object groups
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "dynamic parameters need at least one object");
        Self {
            objects: vec![ParameterGroup::new(); count],
        }
    }

    /// Group of object `index`
    pub fn object(&mut self, index: usize) -> &mut ParameterGroup {
        let count = self.objects.len();
        assert!(index < count, "object {} out of range, {} objects", index, count);
        &mut self.objects[index]
    }

    /// All object groups
    pub fn objects(&self) -> &[ParameterGroup] {
        &self.objects
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether there are no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Freeze every object group
    pub fn freeze(&mut self) {
        self.objects.iter_mut().for_each(ParameterGroup::freeze);
    }

    pub(crate) fn thaw(&mut self) {
        self.objects.iter_mut().for_each(ParameterGroup::thaw);
    }

    /// Distance between consecutive objects in the buffer
    pub fn stride(&self, min_offset_alignment: usize) -> usize {
        let largest = self.objects.iter().map(ParameterGroup::packed_size).max().unwrap_or(0);
        round_up(largest.max(1), min_offset_alignment)
    }

    /// Total buffer size for every object
    pub fn buffer_size(&self, min_offset_alignment: usize) -> usize {
        self.stride(min_offset_alignment) * self.objects.len()
    }

    /// Dynamic offset to bind for object `index`
    pub fn dynamic_offset(&self, index: usize, min_offset_alignment: usize) -> u32 {
        u32::try_from(index * self.stride(min_offset_alignment)).unwrap_or(u32::MAX)
    }

    /// Write every object at its stride
    pub fn write_std140(&self, bytes: &mut [u8], min_offset_alignment: usize) {
        let stride = self.stride(min_offset_alignment);
        for (object, chunk) in self.objects.iter().zip(bytes.chunks_mut(stride)) {
            object.write_std140(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use crate::render::backends::vulkan::resources::image::{ImageKind, UsageType};

    #[repr(C, align(16))]
    struct AlignedBytes([u8; 512]);

    impl AlignedBytes {
        fn new() -> Self {
            Self([0xAA; 512])
        }
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_i32(bytes: &[u8], offset: usize) -> i32 {
        i32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn sample_binding() -> ImageBinding {
        ImageBinding {
            kind: ImageKind::RenderTarget,
            usage: UsageType::CombinedImageSampler,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(16, 64), 79);
        assert_eq!(aligned_size(16, 12), 27);
        assert_eq!(aligned_size(4, 4), 7);
        assert_eq!(aligned_size(1, 0), 0);
        for (alignment, size) in [(4, 4), (8, 8), (16, 12), (16, 64)] {
            assert!(aligned_size(alignment, size) >= size);
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_aligned_size_rejects_non_power_of_two() {
        let _ = aligned_size(12, 4);
    }

    #[test]
    fn test_model_color_count_layout() {
        let mut group = ParameterGroup::new();
        group.set("model", Mat4::identity());
        group.set("color", Vec3::new(1.0, 0.0, 0.0));
        group.set("count", 4);

        assert_eq!(group.packed_size(), 79 + 27 + 7);

        let mut buffer = AlignedBytes::new();
        let bytes = &mut buffer.0[..group.packed_size()];
        let offsets = group.write_std140(bytes);
        assert_eq!(offsets, vec![0, 64, 80]);

        assert_eq!(read_f32(bytes, 0), 1.0);
        assert_eq!(read_f32(bytes, 4), 0.0);
        assert_eq!(read_f32(bytes, 20), 1.0);
        assert_eq!(read_f32(bytes, 64), 1.0);
        assert_eq!(read_f32(bytes, 68), 0.0);
        assert_eq!(read_f32(bytes, 76), 0.0);
        assert_eq!(read_i32(bytes, 80), 4);
    }

    #[test]
    fn test_alignment_follows_real_address() {
        let mut group = ParameterGroup::new();
        group.set("count", 7u32);
        group.set("offset", Vec2::new(0.5, 0.25));
        group.set("model", Mat4::identity());
        group.set("flag", true);

        let mut buffer = AlignedBytes::new();
        for shift in 1..16 {
            let bytes = &mut buffer.0[shift..shift + group.packed_size()];
            let base = bytes.as_ptr() as usize;
            let offsets = group.write_std140(bytes);
            let alignments = [4, 8, 16, 4];
            for (offset, alignment) in offsets.iter().zip(alignments) {
                assert_eq!((base + offset) % alignment, 0, "shift {shift}");
            }
        }
    }

    #[test]
    fn test_insertion_order_is_lookup_order() {
        let mut group = ParameterGroup::new();
        group.slot("first");
        group.slot("second");
        group.set("second", Vec4::new(1.0, 2.0, 3.0, 4.0));
        group.set("first", 2.5f32);

        let names: Vec<&str> = group.iter().map(ParameterSlot::name).collect();
        assert_eq!(names, vec!["first", "second"]);

        let mut buffer = AlignedBytes::new();
        let offsets = group.write_std140(&mut buffer.0[..group.packed_size()]);
        assert_eq!(offsets, vec![0, 16]);
        assert_eq!(read_f32(&buffer.0, 0), 2.5);
        assert_eq!(read_f32(&buffer.0, 28), 4.0);
    }

    #[test]
    fn test_unassigned_slots_take_no_space() {
        let mut group = ParameterGroup::new();
        group.slot("pending");
        group.set("value", 1.0f32);
        assert_eq!(group.len(), 2);
        assert_eq!(group.packed_size(), 7);
    }

    #[test]
    fn test_type_is_fixed_by_first_assignment() {
        let mut group = ParameterGroup::new();
        group.set("x", 1.0f32);
        group.set("x", 2.0f32);
        assert_eq!(group.get("x"), Some(&ParameterValue::Float(2.0)));

        let err = group.try_set("x", Vec3::zeros()).unwrap_err();
        assert_eq!(
            err,
            ParameterError::TypeMismatch {
                name: "x".to_string(),
                expected: ParameterKind::Float,
                found: ParameterKind::Vec3,
            }
        );
        assert_eq!(group.get("x"), Some(&ParameterValue::Float(2.0)));
    }

    #[test]
    #[should_panic(expected = "cannot assign Vec3")]
    fn test_set_panics_on_type_change() {
        let mut group = ParameterGroup::new();
        group.set("x", 1.0f32);
        group.set("x", Vec3::zeros());
    }

    #[test]
    fn test_frozen_group_rejects_new_names() {
        let mut group = ParameterGroup::new();
        group.set("a", 1);
        group.freeze();

        assert_eq!(group.try_set("b", 2), Err(ParameterError::Frozen { name: "b".to_string() }));
        group.set("a", 5);
        assert_eq!(group.get("a"), Some(&ParameterValue::Int(5)));
        assert_eq!(group.len(), 1);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn test_frozen_group_lookup_panics() {
        let mut group = ParameterGroup::new();
        group.freeze();
        group.slot("missing");
    }

    #[test]
    fn test_vec4_array_elements_are_16_aligned() {
        let rays: Vec<Vec4> = (0..5).map(|i| Vec4::new(i as f32, 1.0, 0.0, 0.0)).collect();
        let mut group = ParameterGroup::new();
        group.set("mode", 1);
        group.set("rays", rays.clone());
        assert_eq!(group.packed_size(), 7 + 5 * 31);

        let mut buffer = AlignedBytes::new();
        let offsets = group.write_std140(&mut buffer.0[..group.packed_size()]);
        assert_eq!(offsets, vec![0, 16]);
        for (i, ray) in rays.iter().enumerate() {
            assert_eq!(read_f32(&buffer.0, 16 + i * 16), ray.x);
        }
    }

    #[test]
    fn test_vec4_array_limits() {
        let mut group = ParameterGroup::new();
        group.set("rays", vec![Vec4::zeros(); 5]);
        assert!(matches!(
            group.try_set("rays", vec![Vec4::zeros(); 4]),
            Err(ParameterError::ArrayLength { expected: 5, found: 4, .. })
        ));
        assert!(matches!(
            group.try_set("big", vec![Vec4::zeros(); 32]),
            Err(ParameterError::ArrayTooLarge { bytes: 512, .. })
        ));
    }

    #[test]
    fn test_samplers_are_not_packed() {
        let mut group = ParameterGroup::new();
        group.set("albedo", sample_binding());
        assert!(!group.has_uniform_data());
        assert_eq!(group.packed_size(), 0);
        let names: Vec<&str> = group.samplers().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["albedo"]);
    }

    #[test]
    fn test_bool_is_four_bytes() {
        let mut group = ParameterGroup::new();
        group.set("enabled", true);
        group.set("after", 3);
        let mut buffer = AlignedBytes::new();
        let offsets = group.write_std140(&mut buffer.0[..group.packed_size()]);
        assert_eq!(offsets, vec![0, 4]);
        assert_eq!(read_i32(&buffer.0, 0), 1);
    }

    #[test]
    fn test_dynamic_parameters_stride() {
        let mut dynamic = DynamicParameters::new(3);
        for i in 0..3 {
            dynamic.object(i).set("model", Mat4::identity() * (i as f32 + 1.0));
        }
        assert_eq!(dynamic.stride(256), 256);
        assert_eq!(dynamic.stride(0), 79);
        assert_eq!(dynamic.buffer_size(64), 3 * 128);
        assert_eq!(dynamic.dynamic_offset(2, 256), 512);

        let mut buffer = vec![0u8; dynamic.buffer_size(256) + 16];
        let start = buffer.as_ptr().align_offset(16);
        let size = dynamic.buffer_size(256);
        dynamic.write_std140(&mut buffer[start..start + size], 256);
        assert_eq!(read_f32(&buffer[start..], 0), 1.0);
        assert_eq!(read_f32(&buffer[start..], 256), 2.0);
        assert_eq!(read_f32(&buffer[start..], 512), 3.0);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(113, 64), 128);
        assert_eq!(round_up(128, 64), 128);
        assert_eq!(round_up(5, 0), 5);
    }
}
