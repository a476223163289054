//! Math utilities and types
//!
//! Provides the vector and matrix aliases used by shader parameters and the
//! camera helpers for the orthographic voxelization views.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix4,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Converts OpenGL style clip space (Y up, depth in [-1, 1]) into Vulkan clip
/// space (Y down, depth in [0, 1]).
#[rustfmt::skip]
pub fn vulkan_clip_correction() -> Mat4 {
    Mat4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.5,
        0.0,  0.0, 0.0, 1.0,
    )
}

/// Orthographic projection centred on the view axis, covering `width` x `height`
/// and `depth` units in front of the eye, in Vulkan clip space.
pub fn orthographic_box(width: f32, height: f32, depth: f32) -> Mat4 {
    let half_w = width * 0.5;
    let half_h = height * 0.5;
    vulkan_clip_correction() * Mat4::new_orthographic(-half_w, half_w, -half_h, half_h, 0.0, depth)
}

/// Right handed view matrix looking from `eye` towards `target`
pub fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
}

/// Extension methods for Vec3
pub trait Vec3Ext {
    /// Promote to a homogeneous vector with the given w
    fn extend(&self, w: f32) -> Vec4;
}

impl Vec3Ext for Vec3 {
    fn extend(&self, w: f32) -> Vec4 {
        Vec4::new(self.x, self.y, self.z, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_orthographic_box_maps_to_vulkan_clip_space() {
        let proj = orthographic_box(10.0, 10.0, 16.0);

        let near_corner = proj * Vec4::new(5.0, 5.0, 0.0, 1.0);
        assert_relative_eq!(near_corner.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(near_corner.y, -1.0, epsilon = 1e-5);
        assert_relative_eq!(near_corner.z, 0.0, epsilon = 1e-5);

        let far_centre = proj * Vec4::new(0.0, 0.0, -16.0, 1.0);
        assert_relative_eq!(far_centre.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_puts_target_on_negative_z() {
        let view = look_at(&Vec3::new(0.0, 0.0, -8.0), &Vec3::zeros(), &Vec3::y());
        let origin = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(origin.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(origin.z, -8.0, epsilon = 1e-5);
    }

    #[test]
    fn test_extend() {
        let v = Vec3::new(1.0, 2.0, 3.0).extend(0.0);
        assert_eq!(v, Vec4::new(1.0, 2.0, 3.0, 0.0));
    }
}
