//! Cameras of the three voxelization passes and the cone directions of the composite

use crate::core::config::VoxelConfig;
use crate::foundation::math::{look_at, orthographic_box, Mat4, Vec3, Vec4};

use super::schedule::VoxelAxis;

/// Orthographic camera looking at the volume along one axis
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelView {
    /// Axis the camera looks along
    pub axis: VoxelAxis,
    /// Camera position
    pub eye: Vec3,
    /// Camera up vector
    pub up: Vec3,
    /// World to view
    pub view: Mat4,
    /// View to clip, covering the volume's cross-section
    pub projection: Mat4,
}

impl VoxelView {
    /// Projection times view
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Inverse of [`Self::view_projection`]
    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection().try_inverse().unwrap_or_else(Mat4::identity)
    }
}

/// Camera for `axis`, placed `camera_distance` from the origin and looking at it
pub fn voxel_view(axis: VoxelAxis, voxels: &VoxelConfig) -> VoxelView {
    let d = voxels.camera_distance;
    let [wx, wy, wz] = voxels.world_dimensions;

    // (eye, up, screen width, screen height)
    let (eye, up, width, height) = match axis {
        VoxelAxis::Z => (Vec3::new(0.0, 0.0, -d), Vec3::y(), wx, wy),
        VoxelAxis::Y => (Vec3::new(0.0, d, 0.0), -Vec3::x(), wz, wx),
        VoxelAxis::X => (Vec3::new(d, 0.0, 0.0), Vec3::y(), wz, wy),
    };

    VoxelView {
        axis,
        eye,
        up,
        view: look_at(&eye, &Vec3::zeros(), &up),
        projection: orthographic_box(width, height, 2.0 * d),
    }
}

/// Views for all three axes in submission order
pub fn voxel_views(voxels: &VoxelConfig) -> [VoxelView; 3] {
    VoxelAxis::ORDER.map(|axis| voxel_view(axis, voxels))
}

/// The five cone directions the composite traces, in tangent space
pub fn sampling_rays() -> [Vec4; 5] {
    [
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(1.0, 1.0, 0.0, 0.0).normalize(),
        Vec4::new(-1.0, 1.0, 0.0, 0.0).normalize(),
        Vec4::new(0.0, 1.0, 1.0, 0.0).normalize(),
        Vec4::new(0.0, 1.0, -1.0, 0.0).normalize(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(view: &VoxelView, point: Vec3) -> Vec4 {
        view.view_projection() * Vec4::new(point.x, point.y, point.z, 1.0)
    }

    #[test]
    fn test_camera_placement() {
        let voxels = VoxelConfig::default();
        let [z, y, x] = voxel_views(&voxels);
        assert_eq!(z.eye, Vec3::new(0.0, 0.0, -8.0));
        assert_eq!(y.eye, Vec3::new(0.0, 8.0, 0.0));
        assert_eq!(x.eye, Vec3::new(8.0, 0.0, 0.0));
        assert_eq!(y.up, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(z.axis, VoxelAxis::Z);
    }

    #[test]
    fn test_origin_projects_to_volume_centre() {
        let voxels = VoxelConfig::default();
        for view in voxel_views(&voxels) {
            let clip = project(&view, Vec3::zeros());
            assert_relative_eq!(clip.x, 0.0, epsilon = 1e-5);
            assert_relative_eq!(clip.y, 0.0, epsilon = 1e-5);
            assert_relative_eq!(clip.z, 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_cross_section_fills_the_screen() {
        let voxels = VoxelConfig {
            world_dimensions: [4.0, 6.0, 8.0],
            ..VoxelConfig::default()
        };
        let corner = Vec3::new(2.0, 3.0, 4.0);
        for view in voxel_views(&voxels) {
            let clip = project(&view, corner);
            assert_relative_eq!(clip.x.abs(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(clip.y.abs(), 1.0, epsilon = 1e-5);
            assert!(clip.z > 0.0 && clip.z < 1.0);
        }
    }

    #[test]
    fn test_inverse_round_trips_a_corner() {
        let view = voxel_view(VoxelAxis::Y, &VoxelConfig::default());
        let point = Vec4::new(1.0, -2.0, 3.0, 1.0);
        let back = view.inverse_view_projection() * (view.view_projection() * point);
        assert_relative_eq!(back, point, epsilon = 1e-4);
    }

    #[test]
    fn test_sampling_rays_are_unit_and_upward() {
        let rays = sampling_rays();
        assert_eq!(rays[0], Vec4::y());
        for ray in rays {
            assert_relative_eq!(ray.norm(), 1.0, epsilon = 1e-6);
            assert!(ray.y > 0.0);
            assert_eq!(ray.w, 0.0);
        }
    }
}
