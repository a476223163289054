//! Named materials and the shader modules behind them
//!
//! The store keeps prototype materials in a slot map. Renderers ask for a
//! fresh instance per in-flight slot with [`MaterialStore::create_material`];
//! the instance shares the prototype's shader modules but owns its own
//! parameters and descriptor set. Shader modules are loaded once per path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::Device;
use slotmap::{new_key_type, SlotMap};

use crate::core::config::{MaterialShaders, ShaderLibraryConfig};
use crate::render::backends::vulkan::resources::material::{Material, MaterialKind};
use crate::render::backends::vulkan::rendering::shader::{ShaderModule, ShaderStage};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

new_key_type! {
    /// Stable handle to a loaded shader module
    pub struct ShaderKey;
    /// Stable handle to a prototype material
    pub struct MaterialKey;
}

/// Prototype materials by name, plus de-duplicated shader modules
#[derive(Default)]
pub struct MaterialStore {
    shaders: SlotMap<ShaderKey, Arc<ShaderModule>>,
    shader_paths: HashMap<PathBuf, ShaderKey>,
    materials: SlotMap<MaterialKey, Material>,
    names: HashMap<String, MaterialKey>,
}

impl MaterialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every material listed in the shader library
    pub fn from_config(device: &Device, library: &ShaderLibraryConfig) -> VulkanResult<Self> {
        let mut store = Self::new();
        for entry in &library.materials {
            store.load_material(device, library, entry)?;
        }
        log::debug!(
            "Material store ready: {} materials, {} shader modules",
            store.materials.len(),
            store.shaders.len()
        );
        Ok(store)
    }

    fn load_material(
        &mut self,
        device: &Device,
        library: &ShaderLibraryConfig,
        entry: &MaterialShaders,
    ) -> VulkanResult<MaterialKey> {
        let stages = [
            (entry.vertex.as_deref(), ShaderStage::Vertex),
            (entry.fragment.as_deref(), ShaderStage::Fragment),
            (entry.compute.as_deref(), ShaderStage::Compute),
        ];
        let kind = if entry.compute.is_some() {
            MaterialKind::Compute
        } else {
            MaterialKind::Visual
        };

        let mut material = Material::new(entry.name.clone(), kind);
        for (file, stage) in stages {
            if let Some(file) = file {
                let shader = self.add_shader(device, library.resolve(file), stage)?;
                material = material.with_shader(shader);
            }
        }
        Ok(self.add_material(material))
    }

    /// Load a shader, reusing the module if the path was loaded before
    pub fn add_shader(
        &mut self,
        device: &Device,
        path: impl AsRef<Path>,
        stage: ShaderStage,
    ) -> VulkanResult<Arc<ShaderModule>> {
        let path = path.as_ref();
        if let Some(shader) = self.find_shader(path) {
            if shader.stage() != stage {
                return Err(VulkanError::ShaderLoad {
                    path: path.display().to_string(),
                    reason: format!("already loaded as a {:?} stage, requested {:?}", shader.stage(), stage),
                });
            }
            return Ok(shader);
        }

        let shader = Arc::new(ShaderModule::from_file(device, path, stage)?);
        let key = self.shaders.insert(Arc::clone(&shader));
        self.shader_paths.insert(path.to_path_buf(), key);
        Ok(shader)
    }

    /// Shader previously loaded from `path`
    pub fn find_shader(&self, path: impl AsRef<Path>) -> Option<Arc<ShaderModule>> {
        self.shader_paths
            .get(path.as_ref())
            .and_then(|key| self.shaders.get(*key))
            .cloned()
    }

    /// Number of distinct shader modules
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    /// Register a prototype under its name, replacing any previous one
    pub fn add_material(&mut self, material: Material) -> MaterialKey {
        let name = material.name().to_string();
        if let Some(old) = self.names.get(&name).copied() {
            log::warn!("Material '{}' registered twice, replacing the earlier one", name);
            self.materials.remove(old);
        }
        let key = self.materials.insert(material);
        self.names.insert(name, key);
        key
    }

    /// Handle of a named prototype
    pub fn key(&self, name: &str) -> Option<MaterialKey> {
        self.names.get(name).copied()
    }

    /// Prototype by handle
    pub fn get(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    /// Prototype by name
    pub fn material(&self, name: &str) -> Option<&Material> {
        self.key(name).and_then(|key| self.materials.get(key))
    }

    /// A fresh, uncommitted instance of a named material
    pub fn create_material(&self, name: &str) -> VulkanResult<Material> {
        self.material(name).cloned().ok_or_else(|| {
            log::error!("Material '{}' is not in the store", name);
            VulkanError::InvalidOperation {
                reason: format!("unknown material '{}'", name),
            }
        })
    }

    /// `count` fresh instances, one per in-flight slot
    pub fn create_materials(&self, name: &str, count: usize) -> VulkanResult<Vec<Material>> {
        (0..count).map(|_| self.create_material(name)).collect()
    }

    /// Drop a prototype
    pub fn remove(&mut self, key: MaterialKey) -> Option<Material> {
        let material = self.materials.remove(key)?;
        self.names.remove(material.name());
        Some(material)
    }

    /// Number of prototypes
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether the store holds no materials
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() {
        let mut store = MaterialStore::new();
        let mut prototype = Material::new("voxelizer", MaterialKind::Visual);
        prototype.parameters(ShaderStage::Vertex, 0).set("voxel_size", 1.0_f32);
        store.add_material(prototype);

        let mut first = store.create_material("voxelizer").unwrap();
        let mut second = store.create_material("voxelizer").unwrap();
        first.parameters(ShaderStage::Vertex, 0).set("voxel_size", 2.0_f32);

        assert_eq!(
            second.parameters(ShaderStage::Vertex, 0).get("voxel_size").cloned(),
            Some(1.0_f32.into())
        );
        assert_eq!(store.create_materials("voxelizer", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_material() {
        let store = MaterialStore::new();
        assert!(store.is_empty());
        assert!(matches!(
            store.create_material("missing"),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_replace_and_remove() {
        let mut store = MaterialStore::new();
        let old = store.add_material(Material::new("downsize", MaterialKind::Compute));
        let new = store.add_material(Material::new("downsize", MaterialKind::Compute));
        assert_eq!(store.len(), 1);
        assert!(store.get(old).is_none());
        assert_eq!(store.key("downsize"), Some(new));

        assert!(store.remove(new).is_some());
        assert!(store.material("downsize").is_none());
        assert_eq!(store.shader_count(), 0);
        assert!(store.find_shader("shaders/downsize.comp.spv").is_none());
    }
}
