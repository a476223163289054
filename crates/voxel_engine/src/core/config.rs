//! # Renderer Configuration
//!
//! Configuration structures for the voxel renderer: frame pacing, the voxel
//! volume, lighting, the initial debug view and the shader library that
//! materials are built from.
//!
//! ## Configuration Categories
//!
//! - **Frame Config**: frames in flight and the fence wait bound
//! - **Voxel Config**: cube resolution, world extent, LOD count, camera distance
//! - **Lighting Config**: single point light
//! - **Shader Library**: compiled SPIR-V per named material

use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};

use crate::foundation::math::{Vec3, Vec4};

pub use crate::config::{Config, ConfigError};

/// Which intermediate result the composite pass shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RenderingMode {
    /// G-buffer albedo
    Albedo,
    /// G-buffer normals
    Normals,
    /// World-space positions
    Positions,
    /// Depth buffer
    Depth,
    /// Direct and indirect lighting combined
    #[default]
    FullRendering,
    /// Cone traced ambient occlusion only
    AmbientOcclusion,
    /// Indirect light only
    AmbientLight,
    /// Direct light only
    DirectLight,
}

impl RenderingMode {
    /// Every mode in shader order
    pub const ALL: [Self; 8] = [
        Self::Albedo,
        Self::Normals,
        Self::Positions,
        Self::Depth,
        Self::FullRendering,
        Self::AmbientOcclusion,
        Self::AmbientLight,
        Self::DirectLight,
    ];

    /// Value written into the composite shader's `mode` parameter
    pub fn shader_value(self) -> i32 {
        match self {
            Self::Albedo => 0,
            Self::Normals => 1,
            Self::Positions => 2,
            Self::Depth => 3,
            Self::FullRendering => 4,
            Self::AmbientOcclusion => 5,
            Self::AmbientLight => 6,
            Self::DirectLight => 7,
        }
    }

    /// The mode after this one, wrapping around
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

/// # Voxel Volume Configuration
///
/// The voxel cube covers `world_dimensions` in world space and is rendered from
/// three orthographic cameras placed `camera_distance` away from the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelConfig {
    /// Edge length of the finest voxel level, in voxels
    pub cube_dimensions: u32,
    /// World-space extent covered by the voxel cube
    pub world_dimensions: [f32; 3],
    /// Number of mip levels in the voxel volumes
    pub lod_count: u32,
    /// Distance of each voxelization camera from the origin
    pub camera_distance: f32,
    /// Compute shader local group size along each axis
    pub local_group_size: u32,
}

impl VoxelConfig {
    /// World extent as a vector
    pub fn world_extent(&self) -> Vec3 {
        Vec3::from(self.world_dimensions)
    }

    /// Edge length of a voxel in world units for a given LOD
    pub fn voxel_size(&self, lod: u32) -> Vec3 {
        let voxels = (self.cube_dimensions >> lod).max(1) as f32;
        self.world_extent() / voxels
    }

    /// Edge length in voxels of a given LOD
    pub fn lod_dimensions(&self, lod: u32) -> u32 {
        self.cube_dimensions >> lod
    }

    fn validate(&self) -> Result<(), String> {
        if self.lod_count == 0 {
            return Err("Voxel volume needs at least one LOD".to_string());
        }
        if self.local_group_size == 0 || !self.local_group_size.is_power_of_two() {
            return Err(format!("Local group size {} must be a power of two", self.local_group_size));
        }
        let coarsest = self.cube_dimensions >> (self.lod_count - 1);
        if coarsest == 0 || coarsest % self.local_group_size != 0 {
            return Err(format!(
                "LOD {} of a {}^3 cube has {} voxels per edge, not divisible by the local group size {}",
                self.lod_count - 1, self.cube_dimensions, coarsest, self.local_group_size
            ));
        }
        if self.world_dimensions.iter().any(|d| *d <= 0.0) {
            return Err("World dimensions must be positive".to_string());
        }
        if self.camera_distance <= 0.0 {
            return Err("Voxel camera distance must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            cube_dimensions: 256,
            world_dimensions: [10.0, 10.0, 10.0],
            lod_count: 6,
            camera_distance: 8.0,
            local_group_size: 8,
        }
    }
}

/// Single point light used by the voxelizer and the composite pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingConfig {
    /// Light position in world space
    pub position: [f32; 3],
    /// Light color, RGBA
    pub color: [f32; 4],
}

impl LightingConfig {
    /// Light position as a vector
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    /// Light color as a vector
    pub fn color(&self) -> Vec4 {
        Vec4::from(self.color)
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.8, 0.0],
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Compiled shader stages for one named material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialShaders {
    /// Material name, used as the lookup key in the material store
    pub name: String,
    /// Vertex stage SPIR-V, relative to the shader root
    pub vertex: Option<String>,
    /// Fragment stage SPIR-V, relative to the shader root
    pub fragment: Option<String>,
    /// Compute stage SPIR-V, relative to the shader root
    pub compute: Option<String>,
}

impl MaterialShaders {
    /// A vertex + fragment material
    pub fn visual(name: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertex: Some(vertex.into()),
            fragment: Some(fragment.into()),
            compute: None,
        }
    }

    /// A compute material
    pub fn compute(name: impl Into<String>, compute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertex: None,
            fragment: None,
            compute: Some(compute.into()),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let stages = (self.vertex.is_some(), self.fragment.is_some(), self.compute.is_some());
        match stages {
            (true, true, false) | (false, false, true) => Ok(()),
            _ => Err(format!(
                "Material '{}' needs either vertex + fragment stages or a single compute stage",
                self.name
            )),
        }
    }
}

/// # Shader Library Configuration
///
/// Maps material names onto compiled SPIR-V files below `shader_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderLibraryConfig {
    /// Directory holding the compiled shaders
    pub shader_root: String,
    /// Material table
    pub materials: Vec<MaterialShaders>,
}

impl ShaderLibraryConfig {
    /// Look up a material entry by name
    pub fn material(&self, name: &str) -> Option<&MaterialShaders> {
        self.materials.iter().find(|m| m.name == name)
    }

    /// Resolve a shader file against the shader root
    pub fn resolve(&self, file: &str) -> PathBuf {
        Path::new(&self.shader_root).join(file)
    }

    fn validate(&self) -> Result<(), String> {
        for (i, material) in self.materials.iter().enumerate() {
            material.validate()?;
            if self.materials[..i].iter().any(|m| m.name == material.name) {
                return Err(format!("Material '{}' is listed twice", material.name));
            }
        }
        Ok(())
    }
}

impl Default for ShaderLibraryConfig {
    fn default() -> Self {
        Self {
            shader_root: "shaders".to_string(),
            materials: vec![
                MaterialShaders::visual("mrt", "mrt.vert.spv", "mrt.frag.spv"),
                MaterialShaders::visual("voxelizer", "voxelizer.vert.spv", "voxelizer.frag.spv"),
                MaterialShaders::visual("deferred_output", "fullscreen.vert.spv", "deferred_output.frag.spv"),
                MaterialShaders::compute("clear_3d_texture", "clear_3d_texture.comp.spv"),
                MaterialShaders::compute("downsize", "downsize.comp.spv"),
            ],
        }
    }
}

/// # Renderer Configuration
///
/// Top-level configuration for the deferred voxel renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name, used in log output
    pub application_name: String,
    /// Maximum frames in flight
    pub max_frames_in_flight: usize,
    /// Upper bound for every fence wait, in nanoseconds
    pub fence_timeout_ns: u64,
    /// Initial composite output
    pub rendering_mode: RenderingMode,
    /// Voxel volume settings
    pub voxels: VoxelConfig,
    /// Light settings
    pub lighting: LightingConfig,
    /// Shader library
    pub shaders: ShaderLibraryConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            max_frames_in_flight: 2,
            fence_timeout_ns: 5_000_000_000,
            rendering_mode: RenderingMode::default(),
            voxels: VoxelConfig::default(),
            lighting: LightingConfig::default(),
            shaders: ShaderLibraryConfig::default(),
        }
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Set the fence wait bound
    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Set voxel volume settings
    pub fn with_voxels(mut self, voxels: VoxelConfig) -> Self {
        self.voxels = voxels;
        self
    }

    /// Set lighting
    pub fn with_lighting(mut self, lighting: LightingConfig) -> Self {
        self.lighting = lighting;
        self
    }

    /// Set the initial rendering mode
    pub fn with_rendering_mode(mut self, mode: RenderingMode) -> Self {
        self.rendering_mode = mode;
        self
    }

    /// Set the shader library
    pub fn with_shaders(mut self, shaders: ShaderLibraryConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.max_frames_in_flight == 0 {
            return Err("Max frames in flight must be at least 1".to_string());
        }

        if self.max_frames_in_flight > 8 {
            return Err("Max frames in flight should not exceed 8".to_string());
        }

        if self.fence_timeout_ns == 0 {
            return Err("Fence timeout must be non-zero".to_string());
        }

        self.voxels.validate()?;
        self.shaders.validate()?;

        Ok(())
    }

    /// Load and validate a configuration file
    pub fn load_validated(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Voxel Engine Application")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.voxels.cube_dimensions, 256);
        assert_eq!(config.voxels.lod_count, 6);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_max_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_max_frames_in_flight(9).validate().is_err());
        assert!(RendererConfig::default().with_max_frames_in_flight(3).validate().is_ok());
    }

    #[test]
    fn test_lod_chain_must_match_group_size() {
        let voxels = VoxelConfig { lod_count: 7, ..VoxelConfig::default() };
        // 256 >> 6 = 4 voxels, not a multiple of 8
        assert!(RendererConfig::default().with_voxels(voxels).validate().is_err());
    }

    #[test]
    fn test_voxel_size_per_lod() {
        let voxels = VoxelConfig::default();
        assert_relative_eq!(voxels.voxel_size(0).x, 10.0 / 256.0);
        assert_relative_eq!(voxels.voxel_size(2).y, 10.0 / 64.0);
        assert_eq!(voxels.lod_dimensions(5), 8);
    }

    #[test]
    fn test_material_table_rejects_mixed_stages() {
        let mut shaders = ShaderLibraryConfig::default();
        shaders.materials.push(MaterialShaders {
            name: "broken".to_string(),
            vertex: Some("a.spv".to_string()),
            fragment: None,
            compute: Some("b.spv".to_string()),
        });
        assert!(RendererConfig::default().with_shaders(shaders).validate().is_err());
    }

    #[test]
    fn test_material_table_rejects_partial_stage_sets() {
        let entry = |vertex: Option<&str>, fragment: Option<&str>, compute: Option<&str>| MaterialShaders {
            name: "partial".to_string(),
            vertex: vertex.map(str::to_string),
            fragment: fragment.map(str::to_string),
            compute: compute.map(str::to_string),
        };
        let rejected = [
            entry(None, Some("f.spv"), Some("c.spv")),
            entry(Some("v.spv"), Some("f.spv"), Some("c.spv")),
            entry(Some("v.spv"), None, None),
            entry(None, None, None),
        ];
        for material in rejected {
            let mut shaders = ShaderLibraryConfig::default();
            shaders.materials.push(material);
            assert!(RendererConfig::default().with_shaders(shaders).validate().is_err());
        }
    }

    #[test]
    fn test_material_table_rejects_duplicates() {
        let mut shaders = ShaderLibraryConfig::default();
        shaders.materials.push(MaterialShaders::compute("downsize", "other.comp.spv"));
        assert!(RendererConfig::default().with_shaders(shaders).validate().is_err());
    }

    #[test]
    fn test_rendering_mode_cycle() {
        assert_eq!(RenderingMode::DirectLight.next(), RenderingMode::Albedo);
        assert_eq!(RenderingMode::FullRendering.shader_value(), 4);
        let values: Vec<i32> = RenderingMode::ALL.iter().map(|m| m.shader_value()).collect();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");

        let config = RendererConfig::new("round trip")
            .with_max_frames_in_flight(3)
            .with_rendering_mode(RenderingMode::AmbientOcclusion);
        config.save_to_file(&path).unwrap();

        let loaded = RendererConfig::load_validated(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.ron");

        let config = RendererConfig::default().with_lighting(LightingConfig {
            position: [1.0, 2.0, 3.0],
            color: [0.5, 0.5, 0.5, 1.0],
        });
        config.save_to_file(&path).unwrap();

        let loaded = RendererConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_validated_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");
        RendererConfig::default().with_max_frames_in_flight(0).save_to_file(&path).unwrap();

        assert!(matches!(RendererConfig::load_validated(&path), Err(ConfigError::Invalid(_))));
    }
}
